//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Unset options fall back to the config file.

use crate::models::Window;
use clap::Parser;
use std::path::PathBuf;

/// diary-insights - weekly insight reports from daily diary logs
///
/// Sanitizes each daily log of a week, analyses it with an LLM against
/// your goals, and synthesizes a weekly review with goal progress, token
/// usage and a partial-failure checklist.
///
/// Examples:
///   diary-insights
///   diary-insights --week 2025-W39
///   diary-insights --week 2025-W39 --dry-run
///   diary-insights --api-url https://api.openai.com/v1 --model gpt-4o-mini
///   diary-insights --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// ISO week to report on (e.g. 2025-W39)
    ///
    /// Defaults to the current week, or the week just ended when run on Sunday.
    #[arg(short, long, value_name = "WEEK")]
    pub week: Option<String>,

    /// Directory containing YYYY-MM-DD.ddd.log.md files
    #[arg(long, value_name = "DIR")]
    pub logs_dir: Option<PathBuf>,

    /// Goal source (markdown table or .toml)
    #[arg(short, long, value_name = "FILE", env = "DIARY_GOALS_FILE")]
    pub goals: Option<PathBuf>,

    /// Directory for per-log and weekly JSON artifacts
    #[arg(long, value_name = "DIR")]
    pub artifacts_dir: Option<PathBuf>,

    /// Directory for week-NN.md and its checklist
    #[arg(long, value_name = "DIR")]
    pub weekly_dir: Option<PathBuf>,

    /// Usage ledger CSV file
    #[arg(long, value_name = "FILE")]
    pub usage_ledger: Option<PathBuf>,

    /// Model name
    #[arg(short, long, env = "DIARY_INSIGHTS_MODEL")]
    pub model: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, value_name = "URL", env = "DIARY_INSIGHTS_API_URL")]
    pub api_url: Option<String>,

    /// Redaction rule set version (v1, v2)
    #[arg(long, value_name = "VERSION")]
    pub rule_set: Option<String>,

    /// Run id; results of the same run are reused on re-runs
    ///
    /// Defaults to weekly-<week id>.
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    /// Maximum concurrent log analyses
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Maximum attempts per endpoint call
    #[arg(long, value_name = "NUM")]
    pub max_attempts: Option<u32>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Cancel the whole run after this many seconds
    ///
    /// In-flight requests finish; completed results are kept for the next run.
    #[arg(long, value_name = "SECS")]
    pub run_timeout: Option<u64>,

    /// Console output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Validate and sanitize the week's logs without calling the LLM
    #[arg(long)]
    pub dry_run: bool,

    /// Exit with code 2 if the report is degraded or any log failed
    #[arg(long)]
    pub fail_on_partial: bool,

    /// Generate a default .diary-insights.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    /// Path to configuration file
    ///
    /// If not specified, looks for .diary-insights.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,
}

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary (default)
    #[default]
    Markdown,
    /// The weekly report as JSON on stdout
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if let Some(ref week) = self.week {
            if Window::from_week_id(week).is_none() {
                return Err(format!("Invalid week '{}': expected YYYY-Www (e.g. 2025-W39)", week));
            }
        }

        if let Some(ref url) = self.api_url {
            if !self.dry_run && !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("API URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.max_attempts == Some(0) {
            return Err("Max attempts must be at least 1".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if self.run_timeout == Some(0) {
            return Err("Run timeout must be at least 1 second".to_string());
        }

        if let Some(ref run_id) = self.run_id {
            if run_id.is_empty() || run_id.contains(['/', '\\']) || run_id.starts_with('.') {
                return Err(format!("Invalid run id '{}'", run_id));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            week: Some("2025-W39".to_string()),
            logs_dir: None,
            goals: None,
            artifacts_dir: None,
            weekly_dir: None,
            usage_ledger: None,
            model: None,
            api_url: None,
            rule_set: None,
            run_id: None,
            concurrency: None,
            max_attempts: None,
            timeout: None,
            run_timeout: None,
            format: OutputFormat::Markdown,
            dry_run: false,
            fail_on_partial: false,
            init_config: false,
            config: None,
            verbose: false,
            quiet: false,
        }
    }

    #[test]
    fn test_validation_accepts_defaults() {
        assert!(make_args().validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_week() {
        let mut args = make_args();
        args.week = Some("2025-39".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_url() {
        let mut args = make_args();
        args.api_url = Some("localhost:11434".to_string());
        assert!(args.validate().is_err());

        args.dry_run = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_limits() {
        let mut args = make_args();
        args.concurrency = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.max_attempts = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_run_id_is_a_single_path_component() {
        let mut args = make_args();
        args.run_id = Some("../escape".to_string());
        assert!(args.validate().is_err());

        args.run_id = Some("rerun-2".to_string());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
