pub mod alert;
pub mod score;
pub mod view;

pub use alert::{Alert, AlertKind};
pub use score::{HistoryEntry, InvalidScore, Score};
pub use view::{overall_score, AggregateView, SeriesPoint, SubjectSummary};
