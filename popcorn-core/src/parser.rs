//! Scorer output parser
//!
//! The scoring engine is free to print diagnostics (model loading banners,
//! library warnings) on stdout alongside its result. The result is the first
//! line whose trimmed content opens a JSON object; anything before or after it
//! is ignored, including further object-looking lines.

use serde_json::Value;
use thiserror::Error;

use crate::models::Score;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("No structured result line in scorer output")]
    NoStructuredResult,

    #[error("Malformed scorer result ({reason}): {line}")]
    MalformedResult { line: String, reason: String },
}

fn malformed(line: &str, reason: impl Into<String>) -> ParseError {
    ParseError::MalformedResult {
        line: line.to_string(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OutputParser {
    scale: f64,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

impl OutputParser {
    /// Parser for engines that report on `[0, scale]` instead of `[0, 1]`.
    pub fn with_scale(scale: f64) -> Self {
        Self { scale }
    }

    pub fn parse(&self, raw: &str) -> Result<Score, ParseError> {
        let line = raw
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with('{'))
            .ok_or(ParseError::NoStructuredResult)?;

        let value: Value =
            serde_json::from_str(line).map_err(|e| malformed(line, e.to_string()))?;
        let record = value
            .as_object()
            .ok_or_else(|| malformed(line, "not a JSON object"))?;

        // Exact key first, then any casing of it.
        let field = record
            .get("score")
            .or_else(|| {
                record
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("score"))
                    .map(|(_, v)| v)
            })
            .ok_or_else(|| malformed(line, "missing `score` field"))?;

        let reported = field
            .as_f64()
            .ok_or_else(|| malformed(line, format!("`score` is not numeric: {field}")))?;

        Score::new(reported / self.scale).map_err(|e| malformed(line, e.to_string()))
    }
}
