//! Aggregation service: the review pipeline
//!
//! validate -> score (external engine) -> append + detect -> view
//!
//! A failed scoring attempt never reaches the store: the history either grows
//! by exactly one entry or is left untouched. The store is only locked after a
//! score is in hand, so a slow engine never blocks other subjects or readers.
//! Dropping the future returned by `submit_review` before the score arrives
//! kills the engine process.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::alerts::{create_detector, AlertDetector};
use crate::config::PopcornConfig;
use crate::error::PopcornError;
use crate::models::{AggregateView, SubjectSummary};
use crate::parser::ParseError;
use crate::scorer::{ProcessScorer, Scorer, ScorerError, ScoringError};
use crate::store::{SentimentStore, StoreError};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Scoring failed: {0}")]
    ScoringFailed(#[source] ScorerError),

    #[error("Unreadable score: {0}")]
    UnreadableScore(#[source] ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ScoringError> for ServiceError {
    fn from(e: ScoringError) -> Self {
        match e {
            ScoringError::Scorer(ScorerError::InvalidInput) => {
                ServiceError::InvalidInput("review text is empty".to_string())
            }
            ScoringError::Scorer(e) => ServiceError::ScoringFailed(e),
            ScoringError::Parse(e) => ServiceError::UnreadableScore(e),
        }
    }
}

pub struct AggregationService {
    scorer: Arc<dyn Scorer>,
    detector: Arc<dyn AlertDetector>,
    store: Arc<SentimentStore>,
}

impl AggregationService {
    pub fn new(scorer: Arc<dyn Scorer>, detector: Arc<dyn AlertDetector>) -> Self {
        Self::with_store(scorer, detector, Arc::new(SentimentStore::new()))
    }

    pub fn with_store(
        scorer: Arc<dyn Scorer>,
        detector: Arc<dyn AlertDetector>,
        store: Arc<SentimentStore>,
    ) -> Self {
        Self {
            scorer,
            detector,
            store,
        }
    }

    /// Process-backed scorer and the configured detector over a fresh store.
    pub fn from_config(config: &PopcornConfig) -> Result<Self, PopcornError> {
        config.validate()?;
        let scorer: Arc<dyn Scorer> = Arc::new(ProcessScorer::new(&config.scorer));
        let detector: Arc<dyn AlertDetector> = Arc::from(create_detector(&config.alerts)?);
        tracing::info!(
            program = %config.scorer.program,
            timeout_ms = config.scorer.timeout_ms,
            detector = detector.name(),
            "Aggregation service configured"
        );
        Ok(Self::new(scorer, detector))
    }

    pub fn store(&self) -> &SentimentStore {
        &self.store
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// Score one review for `subject` and return the updated view.
    ///
    /// `alerts` in the returned view holds only what this review raised;
    /// `alert_history` holds everything raised for the subject so far.
    #[tracing::instrument(
        name = "submit_review",
        skip(self, text),
        fields(review_id = %Uuid::new_v4(), chars = text.len())
    )]
    pub async fn submit_review(
        &self,
        subject: &str,
        text: &str,
    ) -> Result<AggregateView, ServiceError> {
        if subject.trim().is_empty() {
            return Err(ServiceError::InvalidInput("subject id is empty".to_string()));
        }
        if text.trim().is_empty() {
            return Err(ServiceError::InvalidInput("review text is empty".to_string()));
        }

        let score = match self.scorer.score(text).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(scorer = self.scorer.name(), error = %e, "Review not recorded");
                return Err(e.into());
            }
        };

        let appended = self
            .store
            .append_and_evaluate(subject, score, self.detector.as_ref())?;
        tracing::info!(
            sequence = appended.entry.sequence,
            score = score.value(),
            new_alerts = appended.new_alerts.len(),
            "Review recorded"
        );

        // History is never empty here, so the baseline is irrelevant.
        Ok(AggregateView::build(
            subject,
            &appended.history,
            0.0,
            appended.new_alerts,
            appended.alert_history,
        )
        .with_recorded(&appended.entry))
    }

    /// Current view of a subject without submitting anything.
    pub fn view(&self, subject: &str, baseline: f64) -> Result<AggregateView, ServiceError> {
        let (history, alerts) = self.store.snapshot_with_alerts(subject)?;
        Ok(AggregateView::build(
            subject,
            &history,
            baseline,
            Vec::new(),
            alerts,
        ))
    }

    pub fn subjects(&self) -> Result<Vec<SubjectSummary>, ServiceError> {
        Ok(self.store.subjects()?)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::ThresholdDetector;
    use crate::config::ScorerConfig;
    use crate::models::{AlertKind, Score};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::{Duration, Instant};

    /// Reads the score straight out of the review text, e.g. "0.8".
    struct EchoScorer;

    #[async_trait]
    impl Scorer for EchoScorer {
        async fn score(&self, text: &str) -> Result<Score, ScoringError> {
            let v: f64 = text
                .trim()
                .parse()
                .map_err(|_| ParseError::NoStructuredResult)?;
            Score::new(v).map_err(|e| {
                ParseError::MalformedResult {
                    line: text.to_string(),
                    reason: e.to_string(),
                }
                .into()
            })
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct BrokenScorer;

    #[async_trait]
    impl Scorer for BrokenScorer {
        async fn score(&self, _text: &str) -> Result<Score, ScoringError> {
            Err(ScorerError::NonZeroExit {
                code: Some(1),
                stderr: "Traceback: model not found".to_string(),
            }
            .into())
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    /// Sleeps a text-dependent amount so concurrent calls finish out of order.
    struct JitteryScorer;

    #[async_trait]
    impl Scorer for JitteryScorer {
        async fn score(&self, text: &str) -> Result<Score, ScoringError> {
            let n: u64 = text.bytes().map(u64::from).sum();
            tokio::time::sleep(Duration::from_millis(n % 17)).await;
            Ok(Score::new(0.5).unwrap())
        }

        fn name(&self) -> &str {
            "jittery"
        }
    }

    fn service(scorer: impl Scorer + 'static) -> AggregationService {
        AggregationService::new(Arc::new(scorer), Arc::new(ThresholdDetector::default()))
    }

    #[tokio::test]
    async fn test_submit_grows_history_by_one() {
        let svc = service(EchoScorer);

        let view = svc.submit_review("movie_1", "0.5").await.unwrap();
        assert_eq!(view.series.len(), 1);
        assert_eq!(view.series[0].index, 1);

        let view = svc.submit_review("movie_1", "0.6").await.unwrap();
        assert_eq!(view.score, Some(0.6));
        assert_eq!(view.sequence, Some(2));
        assert_eq!(view.series.len(), 2);
        assert!(view.series[1].index > view.series[0].index);
        assert!((view.overall_score - 0.55).abs() < 1e-9);
        assert_eq!(svc.store().snapshot("movie_1").unwrap().len(), 2);
        assert_eq!(svc.view("movie_1", 0.5).unwrap().score, None);
    }

    #[tokio::test]
    async fn test_submit_returns_new_alerts_and_history() {
        let svc = service(EchoScorer);
        svc.submit_review("m", "0.5").await.unwrap();

        let view = svc.submit_review("m", "0.8").await.unwrap();
        assert_eq!(view.alerts.len(), 1);
        assert_eq!(view.alerts[0].kind, AlertKind::Spike);
        assert_eq!(view.alerts[0].at_sequence, 2);

        // Moderation afterwards raises nothing new and retracts nothing.
        let view = svc.submit_review("m", "0.7").await.unwrap();
        assert!(view.alerts.is_empty());
        assert_eq!(view.alert_history.len(), 1);
    }

    #[tokio::test]
    async fn test_scorer_failure_leaves_history_unchanged() {
        let store = Arc::new(SentimentStore::new());
        store.append("m", Score::new(0.4).unwrap()).unwrap();
        let svc = AggregationService::with_store(
            Arc::new(BrokenScorer),
            Arc::new(ThresholdDetector::default()),
            Arc::clone(&store),
        );

        let before = store.snapshot("m").unwrap();
        let err = svc.submit_review("m", "great film").await.unwrap_err();
        match &err {
            ServiceError::ScoringFailed(ScorerError::NonZeroExit { stderr, .. }) => {
                assert!(stderr.contains("Traceback"))
            }
            other => panic!("Expected ScoringFailed, got {:?}", other),
        }
        assert!(err.to_string().contains("model not found"));
        let after = store.snapshot("m").unwrap();
        assert_eq!(before.len(), after.len());
        assert_eq!(after[0].sequence, 1);
    }

    #[tokio::test]
    async fn test_parse_failure_leaves_history_unchanged() {
        let svc = service(EchoScorer);
        svc.submit_review("m", "0.3").await.unwrap();

        let err = svc.submit_review("m", "not a number").await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::UnreadableScore(ParseError::NoStructuredResult)
        ));
        let err = svc.submit_review("m", "1.7").await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::UnreadableScore(ParseError::MalformedResult { .. })
        ));
        assert_eq!(svc.store().snapshot("m").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blank_input_rejected_before_scoring() {
        let svc = service(BrokenScorer);
        assert!(matches!(
            svc.submit_review("m", "  \n").await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            svc.submit_review(" ", "fine").await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(svc.subjects().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_same_subject() {
        let svc = Arc::new(service(JitteryScorer));
        let n = 64;

        let tasks = (0..n).map(|i| {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.submit_review("shared", &format!("review {i}")).await })
        });
        for res in futures::future::join_all(tasks).await {
            res.unwrap().unwrap();
        }

        let history = svc.store().snapshot("shared").unwrap();
        assert_eq!(history.len(), n);
        let seqs: HashSet<u64> = history.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, (1..=n as u64).collect::<HashSet<u64>>());
    }

    #[test]
    fn test_view_empty_subject_uses_baseline() {
        let svc = service(EchoScorer);
        let view = svc.view("unseen", 0.42).unwrap();
        assert_eq!(view.overall_score, 0.42);
        assert!(view.series.is_empty());
    }

    #[tokio::test]
    async fn test_view_mean_of_history() {
        let svc = service(EchoScorer);
        for s in ["0.2", "0.4", "0.6"] {
            svc.submit_review("m", s).await.unwrap();
        }
        let view = svc.view("m", 0.9).unwrap();
        assert!((view.overall_score - 0.4).abs() < 1e-9);
        assert!(view.alerts.is_empty());
    }

    #[cfg(unix)]
    fn sh_service(script: &str, timeout_ms: u64) -> AggregationService {
        let scorer = ProcessScorer::new(&ScorerConfig {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "scorer".to_string()],
            working_dir: None,
            timeout_ms,
            score_scale: 1.0,
        });
        service(scorer)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_scorer_fails_within_budget() {
        let svc = sh_service("sleep 10", 300);
        let start = Instant::now();
        let err = svc.submit_review("m", "anything").await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::ScoringFailed(ScorerError::Timeout { .. })
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(svc.store().snapshot("m").unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_submit_kills_scorer() {
        let marker = std::env::temp_dir().join(format!("popcorn-cancel-{}", Uuid::new_v4()));
        let svc = sh_service("sleep 1; touch \"$1\"", 10_000);
        let text = marker.to_string_lossy().into_owned();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), svc.submit_review("m", &text)).await;
        assert!(cancelled.is_err(), "submit should still be waiting on the scorer");

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(!marker.exists(), "scorer kept running after cancellation");
        assert!(svc.store().snapshot("m").unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_pipeline_end_to_end() {
        let svc = sh_service("echo 'loading'; echo '{\"score\": 0.73}'; echo 'done' >&2", 5_000);
        let view = svc.submit_review("movie_1", "loved it").await.unwrap();
        assert_eq!(view.series.len(), 1);
        assert_eq!(view.series[0].score, 0.73);
        assert_eq!(view.overall_score, 0.73);
    }
}
