//! Scoring bridge: runs the external sentiment engine out-of-process
//!
//! Provides a `Scorer` trait so the aggregation service never depends on how a
//! score is produced, and `ProcessScorer`, which launches one engine process per
//! review:
//!
//! - the review text is passed as the last positional argument
//! - stdout and stderr are drained concurrently until the process exits
//! - the wall-clock budget is enforced; on expiry (or when the caller drops the
//!   future) the child is killed
//! - stdout is handed to `OutputParser`; stderr is only diagnostics
//!
//! Nothing here retries. One call, one outcome.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use shellexpand::tilde;
use thiserror::Error;
use tokio::process::Command;

use crate::config::ScorerConfig;
use crate::models::Score;
use crate::parser::{OutputParser, ParseError};

// ============================================================================
// Scorer trait
// ============================================================================

/// Abstraction over sentiment engines.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Score a single review text.
    async fn score(&self, text: &str) -> Result<Score, ScoringError>;

    /// Scorer name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

/// Failures of the external process itself.
#[derive(Error, Debug)]
pub enum ScorerError {
    #[error("Review text is empty")]
    InvalidInput,

    #[error("Failed to launch scorer `{program}`: {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Scorer exited with {}: {stderr}", exit_label(.code))]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Scorer timed out after {}ms", millis(.after))]
    Timeout { after: Duration },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {}", c),
        None => "no status (killed by signal)".to_string(),
    }
}

fn millis(d: &Duration) -> u128 {
    d.as_millis()
}

/// Anything that can go wrong between review text and a usable score.
#[derive(Error, Debug)]
pub enum ScoringError {
    #[error(transparent)]
    Scorer(#[from] ScorerError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

// ============================================================================
// ProcessScorer
// ============================================================================

/// Captured output of one completed engine run.
#[derive(Debug, Clone)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct ProcessScorer {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    parser: OutputParser,
}

impl ProcessScorer {
    pub fn new(config: &ScorerConfig) -> Self {
        Self {
            program: tilde(&config.program).into_owned(),
            args: config.args.iter().map(|a| tilde(a).into_owned()).collect(),
            working_dir: config
                .working_dir
                .as_deref()
                .map(|d| PathBuf::from(tilde(d).into_owned())),
            timeout: Duration::from_millis(config.timeout_ms),
            parser: OutputParser::with_scale(config.score_scale),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the engine once and capture everything it printed.
    pub async fn invoke(&self, text: &str) -> Result<RawOutput, ScorerError> {
        if text.trim().is_empty() {
            return Err(ScorerError::InvalidInput);
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let start = Instant::now();
        let child = command.spawn().map_err(|source| ScorerError::LaunchFailed {
            program: self.program.clone(),
            source,
        })?;

        // Dropping the wait future drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(res) => res.map_err(|source| ScorerError::LaunchFailed {
                program: self.program.clone(),
                source,
            })?,
            Err(_) => {
                tracing::warn!(
                    program = %self.program,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Scorer exceeded its time budget, killed"
                );
                return Err(ScorerError::Timeout {
                    after: self.timeout,
                });
            }
        };

        let elapsed = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            tracing::error!(
                program = %self.program,
                code = ?output.status.code(),
                stderr = %stderr.trim(),
                "Scorer exited unsuccessfully"
            );
            return Err(ScorerError::NonZeroExit {
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        if !stderr.trim().is_empty() {
            tracing::debug!(program = %self.program, stderr = %stderr.trim(), "Scorer diagnostics");
        }
        tracing::debug!(
            program = %self.program,
            elapsed_ms = elapsed.as_millis() as u64,
            "Scorer finished"
        );

        Ok(RawOutput {
            stdout,
            stderr,
            elapsed,
        })
    }
}

#[async_trait]
impl Scorer for ProcessScorer {
    async fn score(&self, text: &str) -> Result<Score, ScoringError> {
        let raw = self.invoke(text).await?;
        let score = self.parser.parse(&raw.stdout).map_err(|e| {
            tracing::warn!(program = %self.program, error = %e, "Unreadable scorer output");
            e
        })?;
        Ok(score)
    }

    fn name(&self) -> &str {
        "process"
    }
}

// ============================================================================
// TESTS
// ============================================================================
