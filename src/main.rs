//! diary-insights - weekly insight reports from daily diary logs
//!
//! A CLI tool that sanitizes each daily log of a week, analyses it
//! against the declared goals through an LLM endpoint, and synthesizes
//! a weekly review with goal progress and a partial-failure manifest.
//!
//! Exit codes:
//!   0 - Report written
//!   1 - Runtime error (goal source, no successful analyses, cancellation, I/O)
//!   2 - Report degraded or partial while --fail-on-partial is set

mod analysis;
mod cli;
mod config;
mod endpoint;
mod error;
mod goals;
mod ledger;
mod logs;
mod models;
mod pipeline;
mod report;
mod sanitizer;
mod store;

#[cfg(test)]
mod testing;

use analysis::{RetryPolicy, RetryingCaller};
use anyhow::{Context, Result};
use chrono::Local;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use endpoint::{EndpointConfig, HttpEndpoint};
use ledger::{CsvLedger, InMemoryLedger};
use logs::LogScanner;
use models::{GoalSet, RawLogEntry, Window};
use pipeline::{Pipeline, PipelineConfig, PipelineRun, Prepared};
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::InsightStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("diary-insights v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_weekly(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Weekly run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .diary-insights.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize paths, model, retries, and the redaction rule set.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the weekly workflow. Returns the exit code (0 or 2).
async fn run_weekly(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    sanitizer::RuleSet::for_version(&config.sanitizer.rule_set)?;

    // Step 1: goals are required before anything else
    let goals = goals::load_goals(&config.general.goals)
        .with_context(|| format!("Cannot load goals from {}", config.general.goals.display()))?;
    info!("Loaded {} goal(s) from {}", goals.len(), config.general.goals.display());

    // Step 2: the window and its logs
    let window = match args.week {
        Some(ref week) => Window::from_week_id(week)
            .with_context(|| format!("Invalid week id '{}'", week))?,
        None => Window::default_for(Local::now().date_naive()),
    };
    let run_id = args
        .run_id
        .clone()
        .unwrap_or_else(|| format!("weekly-{}", window.week_id));

    println!(
        "📅 Week {} ({} to {})",
        window.week_id, window.start, window.end
    );
    let entries = LogScanner::new(&config.general.logs_dir).load(&window)?;
    println!("   Found {} daily log(s) in {}", entries.len(), config.general.logs_dir.display());

    let pipeline_config = PipelineConfig {
        rule_set_version: config.sanitizer.rule_set.clone(),
        concurrency: config.general.concurrency,
        show_progress: !args.quiet,
    };

    let endpoint_config = EndpointConfig {
        api_url: config.model.api_url.clone(),
        model_name: config.model.name.clone(),
        temperature: config.model.temperature,
        timeout_seconds: config.model.timeout_seconds,
        api_key: config.api_key(),
    };
    let endpoint = Arc::new(HttpEndpoint::new(endpoint_config)?);
    let policy = RetryPolicy::new(
        config.model.max_attempts,
        Duration::from_secs(config.model.backoff_seconds),
    );

    // Handle --dry-run: validate and sanitize, no endpoint calls
    if args.dry_run {
        let caller = RetryingCaller::new(endpoint, Arc::new(InMemoryLedger::new()), policy, run_id);
        let pipeline = Pipeline::new(
            caller,
            Arc::new(InsightStore::in_memory()),
            pipeline_config,
            CancellationToken::new(),
        );
        return Ok(handle_dry_run(&pipeline, &entries, &goals));
    }

    if config.api_key().is_none() {
        warn!(
            "{} is not set; requests are sent without an API key",
            config.model.api_key_env
        );
    }

    println!("🤖 Analysing with {} at {}", config.model.name, config.model.api_url);
    println!("   Run: {} | Rule set: {}", run_id, config.sanitizer.rule_set);

    let cancel = CancellationToken::new();
    spawn_cancellation(cancel.clone(), args.run_timeout);

    let ledger = Arc::new(CsvLedger::new(&config.general.usage_ledger));
    let store = Arc::new(InsightStore::open(&config.general.artifacts_dir)?);
    let caller = RetryingCaller::new(endpoint, ledger, policy, run_id).with_cancellation(cancel.clone());
    let pipeline = Pipeline::new(caller, store, pipeline_config, cancel);

    // Step 3: analyse and synthesize
    let PipelineRun { report, stats } = pipeline.run(&window, &entries, &goals).await?;

    // Step 4: write the outputs
    let outputs = report::write_weekly_outputs(
        &report,
        &config.general.weekly_dir,
        &config.general.artifacts_dir,
    )?;

    let duration = start_time.elapsed().as_secs_f64();

    match args.format {
        OutputFormat::Json => println!("{}", report::generate_json_report(&report)?),
        OutputFormat::Markdown => {
            println!("\n📊 Weekly Summary:");
            println!(
                "   Logs: {} discovered | {} reused | {} analysed | {} rejected | {} failed",
                stats.discovered, stats.reused, stats.analysed, stats.rejected, stats.failed
            );
            println!("   Status: {}", report.status);
            println!("   Goals tracked: {}", report.goal_progress.len());
            println!("   Tokens: {}", report.token_usage_total());
            if !report.failures.is_empty() {
                println!("   ⚠️  Partial failures:");
                for failure in &report.failures {
                    println!("     - {}: {}", failure.log, failure.reason);
                }
            }
            println!("   Duration: {:.1}s", duration);
            println!("\n✅ Weekly review saved to: {}", outputs.markdown.display());
            println!("   Checklist: {}", outputs.checklist.display());
            println!("   JSON: {}", outputs.json.display());
        }
    }

    if config.report.fail_on_partial && (report.is_degraded() || !report.failures.is_empty()) {
        eprintln!("\n⛔ Report is degraded or partial. Failing (exit code 2).");
        return Ok(2);
    }

    Ok(0)
}

/// Cancel `token` on Ctrl-C, or after `run_timeout` seconds if given.
fn spawn_cancellation(token: CancellationToken, run_timeout: Option<u64>) {
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; waiting for in-flight requests");
            on_signal.cancel();
        }
    });

    if let Some(secs) = run_timeout {
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    warn!("Run timeout of {}s reached; cancelling", secs);
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });
    }
}

/// Handle --dry-run: show what would be sent, exit.
fn handle_dry_run(pipeline: &Pipeline, entries: &[RawLogEntry], goals: &GoalSet) -> i32 {
    println!("\n🔍 Dry run: validating and sanitizing logs (no LLM call)...\n");

    if entries.is_empty() {
        println!("   No daily logs found for this week.");
    }

    let mut ready = 0;
    for entry in entries {
        match pipeline.prepare(entry, goals) {
            Prepared::Ready(excerpt) => {
                ready += 1;
                println!(
                    "     📄 {} ({} chars, {} redaction(s), goals: {})",
                    entry.log,
                    excerpt.text.len(),
                    excerpt.redactions.total(),
                    entry.goal_refs.join(", ")
                );
            }
            Prepared::Rejected(result) => {
                println!(
                    "     ❌ {}: {}",
                    entry.log,
                    result.error.as_deref().unwrap_or("rejected")
                );
            }
        }
    }

    println!("\n   {} of {} log(s) would be analysed", ready, entries.len());
    println!("\n✅ Dry run complete. No LLM calls were made.");
    0
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
