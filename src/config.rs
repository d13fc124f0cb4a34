//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.diary-insights.toml` files.

use crate::pipeline::DEFAULT_CONCURRENCY;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = ".diary-insights.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Sanitizer settings.
    #[serde(default)]
    pub sanitizer: SanitizerConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Paths and run-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory holding the daily logs.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    /// Goal source file.
    #[serde(default = "default_goals")]
    pub goals: PathBuf,

    /// Per-log and weekly JSON artifacts.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Weekly markdown output directory.
    #[serde(default = "default_weekly_dir")]
    pub weekly_dir: PathBuf,

    /// Usage ledger CSV.
    #[serde(default = "default_usage_ledger")]
    pub usage_ledger: PathBuf,

    /// Number of concurrent log analyses.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            logs_dir: default_logs_dir(),
            goals: default_goals(),
            artifacts_dir: default_artifacts_dir(),
            weekly_dir: default_weekly_dir(),
            usage_ledger: default_usage_ledger(),
            concurrency: default_concurrency(),
            verbose: false,
        }
    }
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("daily-logs")
}

fn default_goals() -> PathBuf {
    PathBuf::from("checks/goals/goals.md")
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("ci/daily-reports")
}

fn default_weekly_dir() -> PathBuf {
    PathBuf::from("weekly-review")
}

fn default_usage_ledger() -> PathBuf {
    PathBuf::from("ci/daily-reports/usage.csv")
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// LLM endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Attempts per call, first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff unit; the wait after attempt n is n² units.
    #[serde(default = "default_backoff")]
    pub backoff_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            api_url: default_api_url(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
            max_attempts: default_max_attempts(),
            backoff_seconds: default_backoff(),
        }
    }
}

fn default_model() -> String {
    "gpt-4.1".to_string()
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "DIARY_INSIGHTS_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> u64 {
    1
}

/// Redaction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizerConfig {
    /// Rule set version applied before anything leaves the machine.
    #[serde(default = "default_rule_set")]
    pub rule_set: String,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            rule_set: default_rule_set(),
        }
    }
}

fn default_rule_set() -> String {
    crate::sanitizer::DEFAULT_RULE_SET.to_string()
}

/// Report settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Exit with code 2 on a degraded report or any failed log.
    #[serde(default)]
    pub fail_on_partial: bool,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values given on the command line override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref dir) = args.logs_dir {
            self.general.logs_dir = dir.clone();
        }
        if let Some(ref goals) = args.goals {
            self.general.goals = goals.clone();
        }
        if let Some(ref dir) = args.artifacts_dir {
            self.general.artifacts_dir = dir.clone();
        }
        if let Some(ref dir) = args.weekly_dir {
            self.general.weekly_dir = dir.clone();
        }
        if let Some(ref ledger) = args.usage_ledger {
            self.general.usage_ledger = ledger.clone();
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }

        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.api_url {
            self.model.api_url = url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
        if let Some(max_attempts) = args.max_attempts {
            self.model.max_attempts = max_attempts;
        }

        if let Some(ref rule_set) = args.rule_set {
            self.sanitizer.rule_set = rule_set.clone();
        }

        // Flags only switch things on
        if args.fail_on_partial {
            self.report.fail_on_partial = true;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// API key from the configured environment variable, if set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.model.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Args, OutputFormat};

    fn bare_args() -> Args {
        Args {
            week: None,
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
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.concurrency, 7);
        assert_eq!(config.general.logs_dir, PathBuf::from("daily-logs"));
        assert_eq!(config.model.max_attempts, 3);
        assert_eq!(config.sanitizer.rule_set, "v2");
        assert!(!config.report.fail_on_partial);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
logs_dir = "journal"
concurrency = 2

[model]
name = "llama3.2:latest"
api_url = "http://localhost:11434/v1"
backoff_seconds = 5

[sanitizer]
rule_set = "v1"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.logs_dir, PathBuf::from("journal"));
        assert_eq!(config.general.concurrency, 2);
        assert_eq!(config.general.weekly_dir, PathBuf::from("weekly-review"));
        assert_eq!(config.model.name, "llama3.2:latest");
        assert_eq!(config.model.backoff_seconds, 5);
        assert_eq!(config.model.max_attempts, 3);
        assert_eq!(config.sanitizer.rule_set, "v1");
    }

    #[test]
    fn test_merge_only_overrides_given_values() {
        let mut config: Config = toml::from_str("[general]\nconcurrency = 2\n").unwrap();
        let mut args = bare_args();
        args.model = Some("gpt-4o-mini".to_string());
        args.fail_on_partial = true;

        config.merge_with_args(&args);

        assert_eq!(config.general.concurrency, 2);
        assert_eq!(config.model.name, "gpt-4o-mini");
        assert!(config.report.fail_on_partial);

        args.concurrency = Some(1);
        config.merge_with_args(&args);
        assert_eq!(config.general.concurrency, 1);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[sanitizer]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.api_key_env, "DIARY_INSIGHTS_API_KEY");
    }
}
