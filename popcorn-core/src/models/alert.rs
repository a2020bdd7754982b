use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Spike,
    Drop,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::Spike => "spike",
            AlertKind::Drop => "drop",
        }
    }
}

/// A sharp single-step (or windowed) move in a subject's sentiment.
///
/// Alerts are immutable once raised and are never retracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    pub subject_id: String,
    #[serde(rename = "atIndex")]
    pub at_sequence: u64,
    pub magnitude: f64,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: AlertKind, subject_id: &str, at_sequence: u64, magnitude: f64) -> Self {
        let verb = match kind {
            AlertKind::Spike => "spiked",
            AlertKind::Drop => "dropped",
        };
        Self {
            kind,
            subject_id: subject_id.to_string(),
            at_sequence,
            magnitude,
            message: format!(
                "Sentiment for '{}' {} by {:.2} at review #{}",
                subject_id, verb, magnitude, at_sequence
            ),
            raised_at: Utc::now(),
        }
    }
}
