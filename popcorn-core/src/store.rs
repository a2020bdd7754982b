//! In-memory sentiment store
//!
//! One append-only history per subject. Appends to the same subject are
//! serialized by that subject's mutex; different subjects only share the brief
//! map lookup. Sequence numbers start at 1 and are assigned under the subject
//! lock, so they reflect admission order and are never reused.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use thiserror::Error;

use crate::alerts::AlertDetector;
use crate::models::{Alert, HistoryEntry, Score, SubjectSummary};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store lock poisoned: {0}")]
    Poisoned(String),
}

#[derive(Debug, Default)]
struct SubjectHistory {
    entries: Vec<HistoryEntry>,
    alerts: Vec<Alert>,
}

impl SubjectHistory {
    fn push(&mut self, score: Score) -> HistoryEntry {
        let sequence = self.entries.last().map_or(1, |e| e.sequence + 1);
        let entry = HistoryEntry {
            sequence,
            score,
            observed_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        entry
    }
}

/// Result of an append that also ran alert detection.
#[derive(Debug, Clone)]
pub struct Appended {
    pub entry: HistoryEntry,
    pub new_alerts: Vec<Alert>,
    pub history: Vec<HistoryEntry>,
    pub alert_history: Vec<Alert>,
}

#[derive(Debug, Default)]
pub struct SentimentStore {
    subjects: RwLock<HashMap<String, Arc<Mutex<SubjectHistory>>>>,
}

impl SentimentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing(&self, subject: &str) -> Result<Option<Arc<Mutex<SubjectHistory>>>, StoreError> {
        let map = self
            .subjects
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(map.get(subject).cloned())
    }

    fn get_or_create(&self, subject: &str) -> Result<Arc<Mutex<SubjectHistory>>, StoreError> {
        if let Some(history) = self.existing(subject)? {
            return Ok(history);
        }
        let mut map = self
            .subjects
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        let history = map.entry(subject.to_string()).or_insert_with(|| {
            tracing::info!(subject = %subject, "Tracking new subject");
            Arc::default()
        });
        Ok(Arc::clone(history))
    }

    /// Append a score and return its sequence number.
    pub fn append(&self, subject: &str, score: Score) -> Result<u64, StoreError> {
        let history = self.get_or_create(subject)?;
        let mut guard = history
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(guard.push(score).sequence)
    }

    /// Append a score and run `detector` on the history ending with it.
    ///
    /// Detection happens inside the subject's exclusive section so the detector
    /// always sees the new entry as the last one, and raised alerts are logged
    /// in the same order as the entries that caused them.
    pub fn append_and_evaluate(
        &self,
        subject: &str,
        score: Score,
        detector: &dyn AlertDetector,
    ) -> Result<Appended, StoreError> {
        let history = self.get_or_create(subject)?;
        let mut guard = history
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;

        let entry = guard.push(score);
        let new_alerts = detector.evaluate(subject, &guard.entries);
        guard.alerts.extend(new_alerts.iter().cloned());

        Ok(Appended {
            entry,
            new_alerts,
            history: guard.entries.clone(),
            alert_history: guard.alerts.clone(),
        })
    }

    /// Point-in-time copy of a subject's history. Unknown subjects are empty.
    pub fn snapshot(&self, subject: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        match self.existing(subject)? {
            Some(history) => {
                let guard = history
                    .lock()
                    .map_err(|e| StoreError::Poisoned(e.to_string()))?;
                Ok(guard.entries.clone())
            }
            None => Ok(Vec::new()),
        }
    }

    /// History and alert log read under one lock.
    pub fn snapshot_with_alerts(
        &self,
        subject: &str,
    ) -> Result<(Vec<HistoryEntry>, Vec<Alert>), StoreError> {
        match self.existing(subject)? {
            Some(history) => {
                let guard = history
                    .lock()
                    .map_err(|e| StoreError::Poisoned(e.to_string()))?;
                Ok((guard.entries.clone(), guard.alerts.clone()))
            }
            None => Ok((Vec::new(), Vec::new())),
        }
    }

    pub fn alerts(&self, subject: &str) -> Result<Vec<Alert>, StoreError> {
        Ok(self.snapshot_with_alerts(subject)?.1)
    }

    /// Tracked subjects, sorted by id.
    pub fn subjects(&self) -> Result<Vec<SubjectSummary>, StoreError> {
        let histories: Vec<(String, Arc<Mutex<SubjectHistory>>)> = {
            let map = self
                .subjects
                .read()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            map.iter()
                .map(|(k, v)| (k.clone(), Arc::clone(v)))
                .collect()
        };

        let mut summaries = Vec::with_capacity(histories.len());
        for (subject_id, history) in histories {
            let guard = history
                .lock()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            summaries.push(SubjectSummary {
                subject_id,
                reviews: guard.entries.len(),
                alerts: guard.alerts.len(),
            });
        }
        summaries.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));
        Ok(summaries)
    }
}
