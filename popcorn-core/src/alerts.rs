//! Spike / drop detection
//!
//! Detectors look at a subject's ordered history whose last entry is the score
//! that was just appended, and raise at most one alert for it. Spike and drop
//! are mutually exclusive outcomes of the same comparison.
//!
//! - `ThresholdDetector`: single-step delta against the previous score
//! - `ZScoreDetector`: deviation from the mean of a trailing window

use crate::config::AlertConfig;
use crate::error::PopcornError;
use crate::models::{Alert, AlertKind, HistoryEntry};

/// Absorbs float noise such as `0.8 - 0.55 = 0.25000000000000006`.
const EPSILON: f64 = 1e-9;

pub trait AlertDetector: Send + Sync {
    /// Alerts caused by the last entry of `history` (zero or one).
    fn evaluate(&self, subject: &str, history: &[HistoryEntry]) -> Vec<Alert>;

    fn name(&self) -> &str;
}

/// Build the detector selected by `[alerts] detector`.
pub fn create_detector(config: &AlertConfig) -> Result<Box<dyn AlertDetector>, PopcornError> {
    match config.detector.as_str() {
        "threshold" => Ok(Box::new(ThresholdDetector::new(
            config.spike_threshold,
            config.drop_threshold,
        ))),
        "zscore" => Ok(Box::new(ZScoreDetector {
            window: config.window.max(1),
            z_threshold: config.z_threshold,
            min_samples: config.min_samples.max(1),
            min_std: config.min_std,
        })),
        other => Err(PopcornError::UnknownDetector(other.to_string())),
    }
}

// ============================================================================
// ThresholdDetector
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ThresholdDetector {
    pub spike_threshold: f64,
    pub drop_threshold: f64,
}

impl Default for ThresholdDetector {
    fn default() -> Self {
        Self::new(0.25, 0.25)
    }
}

impl ThresholdDetector {
    pub fn new(spike_threshold: f64, drop_threshold: f64) -> Self {
        Self {
            spike_threshold,
            drop_threshold,
        }
    }
}

impl AlertDetector for ThresholdDetector {
    fn evaluate(&self, subject: &str, history: &[HistoryEntry]) -> Vec<Alert> {
        let [.., prior, latest] = history else {
            return Vec::new();
        };

        let delta = latest.score.value() - prior.score.value();
        let alert = if delta + EPSILON >= self.spike_threshold {
            Some(Alert::new(AlertKind::Spike, subject, latest.sequence, delta))
        } else if -delta + EPSILON >= self.drop_threshold {
            Some(Alert::new(AlertKind::Drop, subject, latest.sequence, -delta))
        } else {
            None
        };

        if let Some(a) = &alert {
            tracing::info!(
                subject = %subject,
                kind = a.kind.as_str(),
                sequence = a.at_sequence,
                magnitude = a.magnitude,
                "Sentiment alert raised"
            );
        }
        alert.into_iter().collect()
    }

    fn name(&self) -> &str {
        "threshold"
    }
}

// ============================================================================
// ZScoreDetector
// ============================================================================

/// Flags a score that sits `z_threshold` standard deviations away from the
/// mean of the preceding `window` scores. Quiet until `min_samples` prior
/// scores exist. The deviation is floored at `min_std` so a perfectly flat
/// history does not turn every small wobble into an alert.
#[derive(Debug, Clone, Copy)]
pub struct ZScoreDetector {
    pub window: usize,
    pub z_threshold: f64,
    pub min_samples: usize,
    pub min_std: f64,
}

impl AlertDetector for ZScoreDetector {
    fn evaluate(&self, subject: &str, history: &[HistoryEntry]) -> Vec<Alert> {
        let Some((latest, prior)) = history.split_last() else {
            return Vec::new();
        };
        let start = prior.len().saturating_sub(self.window);
        let window = &prior[start..];
        if window.len() < self.min_samples {
            return Vec::new();
        }

        let n = window.len() as f64;
        let mean = window.iter().map(|e| e.score.value()).sum::<f64>() / n;
        let variance = window
            .iter()
            .map(|e| (e.score.value() - mean).powi(2))
            .sum::<f64>()
            / n;
        let std = variance.sqrt().max(self.min_std);

        let deviation = latest.score.value() - mean;
        if deviation.abs() < EPSILON {
            return Vec::new();
        }
        // Infinite when an unfloored std is zero: any move off a flat window fires.
        let z = deviation / std;
        if z.is_nan() || z.abs() + EPSILON < self.z_threshold {
            return Vec::new();
        }

        let kind = if deviation > 0.0 {
            AlertKind::Spike
        } else {
            AlertKind::Drop
        };
        tracing::info!(
            subject = %subject,
            kind = kind.as_str(),
            sequence = latest.sequence,
            z = z,
            "Sentiment alert raised"
        );
        vec![Alert::new(kind, subject, latest.sequence, deviation.abs())]
    }

    fn name(&self) -> &str {
        "zscore"
    }
}
