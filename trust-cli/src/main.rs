//! TrustMesh CLI
//!
//! Scores websites, companies and handles from public evidence and keeps a
//! tamper-evident record of every observation behind the score.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use trust_core::TrustScoreResult;
use trust_ledger::max_severity;
use trust_runtime::{build_pipeline, Side, TrustConfig, TrustPipeline};

#[derive(Parser)]
#[command(name = "trustmesh")]
#[command(author, version, about = "TrustMesh: evidence-weighted entity trust scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1")]
    verbose: u8,

    /// TOML configuration file
    #[arg(short, long, env = "TRUSTMESH_CONFIG")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a single target (domain, URL, company name or @handle)
    Score {
        target: String,

        /// Ignore any cached score
        #[arg(short, long)]
        force: bool,

        /// Score as a public preview
        #[arg(long)]
        preview: bool,
    },

    /// Score many targets, one per argument or one per line of a file
    Batch {
        targets: Vec<String>,

        /// File with one target per line
        #[arg(short, long)]
        file: Option<PathBuf>,

        #[arg(short, long)]
        force: bool,
    },

    /// Score two targets side by side
    Compare { a: String, b: String },

    /// Score a target, then audit its observation chain
    Verify {
        target: String,

        /// Number of most recent blocks to check
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Score a target, then print its most recent ledger blocks
    History {
        target: String,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Load a Tranco-format `rank,domain` list and report its size
    IngestRanks { path: PathBuf },

    /// Show sensors, breakers, cache and ledger state
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = match &cli.config {
        Some(path) => TrustConfig::load(path)?,
        None => TrustConfig::from_env(),
    };
    let pipeline = build_pipeline(&config, None).await?;
    let json = cli.json;

    match cli.command {
        Commands::Score { target, force, preview } => {
            let result = pipeline.compute(&target, force, preview).await;
            if json && preview {
                print_json(&result.preview())?;
            } else if json {
                print_json(&result)?;
            } else {
                print_result(&result);
            }
        }
        Commands::Batch { targets, file, force } => {
            let targets = collect_targets(targets, file)?;
            let results = pipeline.batch(&targets, force).await;
            if json {
                print_json(&results)?;
            } else {
                for result in &results {
                    print_line(result);
                }
            }
        }
        Commands::Compare { a, b } => {
            let comparison = pipeline.compare(&a, &b).await;
            if json {
                print_json(&comparison)?;
            } else {
                print_line(&comparison.a);
                print_line(&comparison.b);
                println!();
                for category in &comparison.categories {
                    println!(
                        "   {:<22} {:>4} vs {:<4} {}",
                        category.category,
                        category.a,
                        category.b,
                        side_label(category.winner, &a, &b)
                    );
                }
                println!(
                    "\n🏁 Winner: {} (by {} points)",
                    side_label(comparison.winner, &a, &b),
                    comparison.score_difference
                );
            }
        }
        Commands::Verify { target, limit } => {
            let result = pipeline.compute(&target, false, false).await;
            let report = pipeline.verify(&result.entity_id, limit).await?;
            if json {
                print_json(&report)?;
            } else if report.is_intact() {
                println!("✅ Chain for {} intact ({} blocks)", report.entity_id, report.blocks_checked);
            } else {
                println!("❌ Chain for {} broken:", report.entity_id);
                for issue in &report.breaks {
                    println!(
                        "   block {} ({}): {:?} expected {} found {}",
                        issue.block_index, issue.sensor, issue.kind, issue.expected, issue.found
                    );
                }
            }
        }
        Commands::History { target, limit } => {
            let result = pipeline.compute(&target, false, false).await;
            let blocks = pipeline.history(&result.entity_id, limit).await?;
            if json {
                print_json(&blocks)?;
            } else {
                for block in &blocks {
                    let alert = max_severity(&block.delta)
                        .map(|s| format!(" [{:?}]", s))
                        .unwrap_or_default();
                    println!(
                        "#{:<4} {:<16} {} {} change(s){}",
                        block.block_index,
                        block.sensor,
                        &block.block_hash[..16.min(block.block_hash.len())],
                        block.delta.len(),
                        alert
                    );
                }
            }
        }
        Commands::IngestRanks { path } => {
            let count = pipeline.ingest_ranks(&path).await?;
            println!("📥 Loaded {} ranked domains from {}", count, path.display());
        }
        Commands::Status => print_status(&pipeline, json).await?,
    }

    if let Some(queue) = pipeline.persistence() {
        let stats = queue.stats();
        if stats.dropped > 0 {
            warn!("{} scores were not persisted", stats.dropped);
        }
    }

    Ok(())
}

fn collect_targets(mut targets: Vec<String>, file: Option<PathBuf>) -> Result<Vec<String>> {
    if let Some(path) = file {
        let content =
            std::fs::read_to_string(&path).with_context(|| format!("reading targets from {}", path.display()))?;
        targets.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
    }
    if targets.is_empty() {
        anyhow::bail!("No targets given. Pass them as arguments or use --file");
    }
    Ok(targets)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn side_label<'a>(side: Side, a: &'a str, b: &'a str) -> &'a str {
    match side {
        Side::A => a,
        Side::B => b,
        Side::Tie => "tie",
    }
}

fn print_line(result: &TrustScoreResult) {
    println!(
        "{:<32} {:>4} {:<4} {:<24} confidence {:.2}",
        result.target,
        result.score,
        result.grade,
        result.recommendation.as_str(),
        result.confidence
    );
}

fn print_result(result: &TrustScoreResult) {
    println!("🔎 {} ({})", result.entity_name, result.entity_id);
    if let Some(error) = &result.error {
        println!("⚠️  Scoring failed: {}", error);
        return;
    }
    println!(
        "📊 Score: {} / 1000  Grade: {}  Recommendation: {}",
        result.score,
        result.grade,
        result.recommendation.as_str()
    );
    if let Some(cap) = result.cap_applied {
        println!("🧢 Capped by {} (raw score {}): {}", cap, result.raw_score, cap.reason());
    }
    println!(
        "🎯 Confidence: {:.2} ({:?}), {}/{} sources in {}ms, {:?}",
        result.confidence,
        result.confidence_label,
        result.sources_responded.len(),
        result.sources_queried.len(),
        result.collection_time_ms,
        result.data_freshness
    );

    let categories = &result.categories;
    println!("\n   existence_age          {:>4}", categories.existence_age);
    println!("   security_integrity     {:>4}", categories.security_integrity);
    println!("   reputation_scale       {:>4}", categories.reputation_scale);
    println!("   operational_maturity   {:>4}", categories.operational_maturity);

    if !result.collection_errors.is_empty() {
        println!("\n❌ Failed sources:");
        for (sensor, error) in &result.collection_errors {
            println!("   {}: {}", sensor, error);
        }
    }
    if !result.sources_skipped.is_empty() {
        println!("⏸️  Skipped (circuit open): {}", result.sources_skipped.join(", "));
    }
}

async fn print_status(pipeline: &TrustPipeline, json: bool) -> Result<()> {
    let status = pipeline.status().await;
    if json {
        return print_json(&status);
    }
    println!("🛡️  TrustMesh engine {}", status.engine_version);
    println!("📡 Sensors: {}", status.sensors.join(", "));
    for breaker in &status.breakers {
        println!(
            "   {:<16} {:?} ({}/{} failures)",
            breaker.name, breaker.state, breaker.failures, breaker.failure_threshold
        );
    }
    println!(
        "🗄️  Cache: {} entries, {} locks, {} hits, {} misses",
        status.cache.entries, status.cache.active_locks, status.cache.hits, status.cache.misses
    );
    println!("⛓️  Ledger: {} entities, {} blocks", status.ledger.entities, status.ledger.blocks);
    println!("🏆 Ranked domains: {}", status.ranked_domains);
    Ok(())
}
