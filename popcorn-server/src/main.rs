use std::sync::Arc;

use clap::Parser;
use popcorn_core::{AggregationService, OutputParser, PopcornConfig, ProcessScorer};
use tokio::sync::broadcast;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, EnvFilter};

use popcorn_server::http;

const PROBE_REVIEW: &str = "Great acting and amazing visuals, loved the soundtrack.";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "popcorn.toml")]
    config: String,

    /// Score a probe review with the configured engine and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience: production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match PopcornConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging
    let level: Directive = config
        .service
        .log_level
        .parse()
        .unwrap_or_else(|_| tracing::Level::INFO.into());
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level))
        .init();

    if args.check {
        return check_scorer(&config).await;
    }

    let service = match AggregationService::from_config(&config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Failed to build aggregation service: {}", e);
            std::process::exit(1);
        }
    };

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    http::start_http_server(service, config, tx.subscribe()).await?;

    Ok(())
}

/// Run the configured engine once and report what came back.
async fn check_scorer(config: &PopcornConfig) -> anyhow::Result<()> {
    let scorer = ProcessScorer::new(&config.scorer);
    println!(
        "Scorer: {} (timeout {}ms)",
        scorer.program(),
        scorer.timeout().as_millis()
    );

    let raw = match scorer.invoke(PROBE_REVIEW).await {
        Ok(raw) => raw,
        Err(e) => {
            println!("❌ Scorer invocation failed: {}", e);
            std::process::exit(1);
        }
    };
    if !raw.stderr.trim().is_empty() {
        println!("--- scorer stderr ---\n{}", raw.stderr.trim());
    }

    match OutputParser::with_scale(config.scorer.score_scale).parse(&raw.stdout) {
        Ok(score) => {
            println!(
                "✅ Probe review scored {:.3} in {}ms",
                score.value(),
                raw.elapsed.as_millis()
            );
            Ok(())
        }
        Err(e) => {
            println!("❌ Scorer output unreadable: {}", e);
            println!("--- scorer stdout ---\n{}", raw.stdout.trim());
            std::process::exit(1);
        }
    }
}
