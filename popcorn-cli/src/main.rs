//! popcorn-cli: command-line client for the Popcorn sentiment API
//!
//! # Subcommands
//! - `submit <text> [--subject S] [--retries N] [--json]`: score a review
//! - `view <subject> [--baseline B] [--json]`            : show a subject's trend
//! - `subjects`                                          : list tracked subjects
//! - `status`                                            : show server health
//!
//! The server never retries a failed scoring attempt. `--retries` is the
//! caller-side policy: only 502 responses (engine crashed, timed out or printed
//! garbage) are retried, with a linear back-off.

use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:5080";
const RETRY_BACKOFF_MS: u64 = 500;
const BAR_WIDTH: usize = 30;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "popcorn-cli",
    version,
    about = "Popcorn sentiment pulse: submit reviews and inspect trends"
)]
struct Cli {
    /// Popcorn HTTP server URL (overrides POPCORN_HTTP_URL env var)
    #[arg(long, env = "POPCORN_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Score a review and record it for a subject
    Submit {
        /// Review text
        text: String,

        /// Subject (movie) id; the server default is used when omitted
        #[arg(short, long)]
        subject: Option<String>,

        /// Extra attempts when the scoring engine fails
        #[arg(long, default_value_t = 0)]
        retries: u32,

        /// Print the raw JSON view
        #[arg(long)]
        json: bool,
    },

    /// Show the sentiment trend for a subject
    View {
        subject: String,

        /// Overall score to report when the subject has no reviews
        #[arg(long)]
        baseline: Option<f64>,

        /// Print the raw JSON view
        #[arg(long)]
        json: bool,
    },

    /// List tracked subjects
    Subjects,

    /// Show Popcorn server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SeriesPoint {
    pub index: u64,
    pub score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDto {
    pub kind: String,
    pub at_index: u64,
    pub magnitude: f64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewResponse {
    pub subject_id: String,
    pub overall_score: f64,
    pub series: Vec<SeriesPoint>,
    #[serde(default)]
    pub alerts: Vec<AlertDto>,
    #[serde(default)]
    pub alert_history: Vec<AlertDto>,
    /// Present on submit responses only.
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub sequence: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDto {
    pub subject_id: String,
    pub reviews: usize,
    pub alerts: usize,
}

#[derive(Debug, Deserialize)]
pub struct SubjectsResponse {
    pub subjects: Vec<SubjectDto>,
}

// ============================================================================
// Rendering
// ============================================================================

/// Horizontal bar for a score in [0, 1].
pub fn score_bar(score: f64) -> String {
    let filled = (score.clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize;
    format!("{}{}", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}

pub fn render_view(view: &ViewResponse) -> String {
    let mut out = format!(
        "{}  overall {:.2} ({} review{})\n",
        view.subject_id,
        view.overall_score,
        view.series.len(),
        if view.series.len() == 1 { "" } else { "s" }
    );

    if let (Some(score), Some(seq)) = (view.score, view.sequence) {
        out.push_str(&format!("Recorded review #{}: {:.2}\n", seq, score));
    }

    for p in &view.series {
        out.push_str(&format!("  #{:<4} {:.2}  {}\n", p.index, p.score, score_bar(p.score)));
    }

    if !view.alerts.is_empty() {
        out.push_str("New alerts:\n");
        for a in &view.alerts {
            out.push_str(&format!(
                "  [{}] #{} {:+.2}  {}\n",
                a.kind.to_uppercase(),
                a.at_index,
                signed_magnitude(a),
                a.message
            ));
        }
    }
    if !view.alert_history.is_empty() {
        out.push_str(&format!("Alert history: {} total\n", view.alert_history.len()));
        for a in &view.alert_history {
            out.push_str(&format!("  {} at #{}: {:.2}\n", a.kind, a.at_index, a.magnitude));
        }
    }
    out
}

fn signed_magnitude(alert: &AlertDto) -> f64 {
    if alert.kind == "drop" {
        -alert.magnitude
    } else {
        alert.magnitude
    }
}

/// Only engine-side failures are worth another attempt.
pub fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::BAD_GATEWAY
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// `{server}/api/subjects/{subject}/view` with the subject as one encoded segment.
pub fn view_url(server: &str, subject: &str) -> anyhow::Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(server)?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("server URL cannot carry a path: {}", server))?
        .pop_if_empty()
        .extend(["api", "subjects", subject, "view"]);
    Ok(url)
}

fn print_view(body: &serde_json::Value, json_output: bool) -> anyhow::Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(body)?);
        return Ok(());
    }
    let view: ViewResponse = serde_json::from_value(body.clone())?;
    print!("{}", render_view(&view));
    Ok(())
}

/// Submit a review via POST /api/sentiment/analyze.
fn do_submit(
    server: &str,
    text: &str,
    subject: Option<&str>,
    retries: u32,
    json_output: bool,
) -> anyhow::Result<()> {
    let client = client(60)?;
    let url = format!("{}/api/sentiment/analyze", server);
    let mut body = serde_json::json!({ "text": text });
    if let Some(s) = subject {
        body["subjectId"] = serde_json::json!(s);
    }

    let mut attempt = 0;
    loop {
        let resp = match client.post(&url).json(&body).send() {
            Ok(r) => r,
            Err(e) => {
                eprintln!("popcorn-cli: connection failed to {}: {}", url, e);
                std::process::exit(1);
            }
        };

        let status = resp.status();
        let payload: serde_json::Value = resp.json().unwrap_or_default();

        if status.is_success() {
            return print_view(&payload, json_output);
        }

        let message = payload["error"].as_str().unwrap_or("unknown error");
        if is_retryable(status) && attempt < retries {
            attempt += 1;
            eprintln!(
                "popcorn-cli: scoring failed ({}), retry {}/{}",
                message, attempt, retries
            );
            std::thread::sleep(Duration::from_millis(RETRY_BACKOFF_MS * u64::from(attempt)));
            continue;
        }

        eprintln!("popcorn-cli: server returned {}: {}", status, message);
        std::process::exit(1);
    }
}

/// Fetch a subject's view via GET /api/subjects/:id/view.
fn do_view(server: &str, subject: &str, baseline: Option<f64>, json_output: bool) -> anyhow::Result<()> {
    let client = client(10)?;
    let url = view_url(server, subject)?;
    let mut req = client.get(url.clone());
    if let Some(b) = baseline {
        req = req.query(&[("baseline", b)]);
    }

    let resp = match req.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("popcorn-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let payload: serde_json::Value = resp.json().unwrap_or_default();
    if !status.is_success() {
        eprintln!(
            "popcorn-cli: server returned {}: {}",
            status,
            payload["error"].as_str().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }
    print_view(&payload, json_output)
}

/// List subjects via GET /api/subjects.
fn do_subjects(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/api/subjects", server);
    let resp = match client(10)?.get(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("popcorn-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let list: SubjectsResponse = resp.json()?;
    if list.subjects.is_empty() {
        eprintln!("No subjects tracked yet");
        return Ok(());
    }
    for s in &list.subjects {
        println!("{:<24} {:>6} reviews {:>4} alerts", s.subject_id, s.reviews, s.alerts);
    }
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client(10)?.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Popcorn server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:        {}", body["version"].as_str().unwrap_or("?"));
            println!("Scorer:         {}", body["scorer"].as_str().unwrap_or("?"));
            println!("Program:        {}", body["program"].as_str().unwrap_or("?"));
            println!("Subjects:       {}", body["subjects"].as_u64().unwrap_or(0));
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("popcorn-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("popcorn-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Submit {
            text,
            subject,
            retries,
            json,
        } => do_submit(&server, &text, subject.as_deref(), retries, json),
        Commands::View {
            subject,
            baseline,
            json,
        } => do_view(&server, &subject, baseline, json),
        Commands::Subjects => do_subjects(&server),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("popcorn-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_view() -> ViewResponse {
        serde_json::from_value(serde_json::json!({
            "subjectId": "movie_2",
            "overallScore": 0.45,
            "series": [
                { "index": 1, "score": 0.6 },
                { "index": 2, "score": 0.3 }
            ],
            "alerts": [
                {
                    "kind": "drop",
                    "subjectId": "movie_2",
                    "atIndex": 2,
                    "magnitude": 0.3,
                    "message": "Sentiment for 'movie_2' dropped by 0.30 at review #2",
                    "raisedAt": "2026-10-19T10:00:00Z"
                }
            ],
            "alertHistory": []
        }))
        .unwrap()
    }

    #[test]
    fn test_score_bar_bounds() {
        assert_eq!(score_bar(0.0), ".".repeat(BAR_WIDTH));
        assert_eq!(score_bar(1.0), "#".repeat(BAR_WIDTH));
        assert_eq!(score_bar(0.5).matches('#').count(), BAR_WIDTH / 2);
        assert_eq!(score_bar(1.7).len(), BAR_WIDTH);
    }

    #[test]
    fn test_view_response_parses_server_shape() {
        let view = sample_view();
        assert_eq!(view.subject_id, "movie_2");
        assert_eq!(view.series.len(), 2);
        assert_eq!(view.alerts[0].at_index, 2);
    }

    #[test]
    fn test_render_view_lists_series_and_alerts() {
        let out = render_view(&sample_view());
        assert!(out.starts_with("movie_2  overall 0.45 (2 reviews)"));
        assert!(out.contains("#1"));
        assert!(out.contains("[DROP] #2 -0.30"));
        assert!(!out.contains("Alert history"));
    }

    #[test]
    fn test_render_view_shows_recorded_review() {
        let mut view = sample_view();
        view.score = Some(0.3);
        view.sequence = Some(2);
        assert!(render_view(&view).contains("Recorded review #2: 0.30"));
        assert!(!render_view(&sample_view()).contains("Recorded"));
    }

    #[test]
    fn test_view_url_encodes_subject_segment() {
        let url = view_url("http://127.0.0.1:5080", "star/wars").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:5080/api/subjects/star%2Fwars/view");

        let url = view_url("http://127.0.0.1:5080", "what? #1").unwrap();
        assert_eq!(url.path(), "/api/subjects/what%3F%20%231/view");
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());

        let url = view_url("http://host/popcorn", "movie_1").unwrap();
        assert_eq!(url.path(), "/popcorn/api/subjects/movie_1/view");
    }

    #[test]
    fn test_only_bad_gateway_is_retried() {
        assert!(is_retryable(reqwest::StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(reqwest::StatusCode::BAD_REQUEST));
        assert!(!is_retryable(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_cli_parses_submit() {
        let cli = Cli::try_parse_from([
            "popcorn-cli",
            "submit",
            "loved the soundtrack",
            "--subject",
            "movie_1",
            "--retries",
            "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit {
                text,
                subject,
                retries,
                json,
            } => {
                assert_eq!(text, "loved the soundtrack");
                assert_eq!(subject.as_deref(), Some("movie_1"));
                assert_eq!(retries, 2);
                assert!(!json);
            }
            other => panic!("Expected Submit, got {:?}", other),
        }
    }
}
