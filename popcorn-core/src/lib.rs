pub mod alerts;
pub mod config;
pub mod error;
pub mod models;
pub mod parser;
pub mod scorer;
pub mod service;
pub mod store;

pub use alerts::{create_detector, AlertDetector, ThresholdDetector, ZScoreDetector};
pub use config::PopcornConfig;
pub use error::PopcornError;
pub use models::{AggregateView, Alert, AlertKind, HistoryEntry, Score, SeriesPoint};
pub use parser::{OutputParser, ParseError};
pub use scorer::{ProcessScorer, RawOutput, Scorer, ScorerError, ScoringError};
pub use service::{AggregationService, ServiceError};
pub use store::{SentimentStore, StoreError};
