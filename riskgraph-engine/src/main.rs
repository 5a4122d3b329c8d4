use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use riskgraph_core::models::TransactionRecord;
use riskgraph_core::EngineConfig;
use tracing_subscriber::{filter::Directive, fmt, EnvFilter};

use riskgraph_engine::{AnalysisPipeline, AnalysisRequest};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Fraud risk scoring and transaction graph analytics",
    long_about = None
)]
struct Args {
    #[arg(short, long, default_value = "riskgraph.toml")]
    config: String,

    /// Transactions as a JSON array or one JSON object per line
    #[arg(short, long, required_unless_present = "check_config")]
    input: Option<String>,

    /// Report destination; stdout when omitted
    #[arg(short, long)]
    output: Option<String>,

    /// Seed for jitter, sampling and fallback randomness
    #[arg(long)]
    seed: Option<u64>,

    /// Inclusive window start (RFC 3339)
    #[arg(long)]
    start: Option<DateTime<Utc>>,

    /// Inclusive window end (RFC 3339)
    #[arg(long)]
    end: Option<DateTime<Utc>>,

    /// Ignore the configured model and use fallback formulas
    #[arg(long)]
    no_model: bool,

    /// Skip the summarized graph
    #[arg(long)]
    no_optimize: bool,

    /// Validate the config and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config_path = expand(&args.config);
    let mut config = match EngineConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", config_path, e);
            std::process::exit(1);
        }
    };
    if let Some(seed) = args.seed {
        config.scoring.seed = Some(seed);
    }

    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_directive(&config)))
        .init();

    if let Err(e) = config.validate() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
    if args.check_config {
        println!("✅ Config OK: {}", config_path);
        return Ok(());
    }

    let input = expand(args.input.as_deref().unwrap_or_default());
    let records = read_records(&input).await?;
    tracing::info!(path = %input, records = records.len(), "Loaded transactions");

    let request = AnalysisRequest {
        start: args.start,
        end: args.end,
        use_model: !args.no_model,
        optimize: !args.no_optimize,
        ..AnalysisRequest::new(records)
    };

    // Model inference and pairwise similarity are CPU-bound.
    let report = tokio::task::spawn_blocking(move || {
        let pipeline = AnalysisPipeline::new(config)?;
        pipeline.run(request)
    })
    .await??;

    let json = serde_json::to_string_pretty(&report)?;
    match args.output {
        Some(path) => {
            let path = expand(&path);
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("Failed to write report to {path}"))?;
            tracing::info!(path = %path, run_id = %report.run_id, "Wrote report");
        }
        None => println!("{json}"),
    }

    Ok(())
}

fn expand(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}

fn log_directive(config: &EngineConfig) -> Directive {
    config
        .service
        .log_level
        .parse()
        .unwrap_or_else(|_| tracing::Level::INFO.into())
}

async fn read_records(path: &str) -> anyhow::Result<Vec<TransactionRecord>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read transactions from {path}"))?;
    parse_records(&text)
}

/// Accept a JSON array or newline-delimited JSON objects.
fn parse_records(text: &str) -> anyhow::Result<Vec<TransactionRecord>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("Invalid transaction array");
    }
    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid transaction on line {}", i + 1))
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
