use serde::{Deserialize, Serialize};

use super::{Alert, HistoryEntry};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SeriesPoint {
    pub index: u64,
    pub score: f64,
}

/// Read model handed to the dashboard. Recomputed on demand, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateView {
    pub subject_id: String,
    pub overall_score: f64,
    pub series: Vec<SeriesPoint>,
    /// Alerts raised by the request that produced this view.
    pub alerts: Vec<Alert>,
    /// Every alert raised for the subject so far, oldest first.
    pub alert_history: Vec<Alert>,
    /// Score recorded by the submit that produced this view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl AggregateView {
    pub fn build(
        subject_id: &str,
        history: &[HistoryEntry],
        baseline: f64,
        alerts: Vec<Alert>,
        alert_history: Vec<Alert>,
    ) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            overall_score: overall_score(history, baseline),
            series: history
                .iter()
                .map(|e| SeriesPoint {
                    index: e.sequence,
                    score: e.score.value(),
                })
                .collect(),
            alerts,
            alert_history,
            score: None,
            sequence: None,
        }
    }

    /// Tag the view with the entry a submit just appended.
    pub fn with_recorded(mut self, entry: &HistoryEntry) -> Self {
        self.score = Some(entry.score.value());
        self.sequence = Some(entry.sequence);
        self
    }
}

/// Unweighted mean of the history, or `baseline` when there is none.
pub fn overall_score(history: &[HistoryEntry], baseline: f64) -> f64 {
    if history.is_empty() {
        return baseline;
    }
    let sum: f64 = history.iter().map(|e| e.score.value()).sum();
    sum / history.len() as f64
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSummary {
    pub subject_id: String,
    pub reviews: usize,
    pub alerts: usize,
}
