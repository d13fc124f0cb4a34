//! Run scheduler for one reporting window.
//!
//! Validates and sanitizes every log up front, analyses the rest on a
//! bounded worker pool, persists each result as soon as it is terminal,
//! and synthesizes the weekly report once every analysis has joined.

use crate::analysis::{Aggregator, Analyzer, RetryingCaller};
use crate::error::{PipelineError, StoreError};
use crate::logs::MAX_LOG_SIZE;
use crate::models::{
    AnalysisResult, ArtifactKey, GoalSet, LogRef, RawLogEntry, SanitizedExcerpt, Window, WeeklyReport,
};
use crate::sanitizer::sanitize_entry;
use crate::store::InsightStore;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default cap on concurrent analyses: one per day of the window.
pub const DEFAULT_CONCURRENCY: usize = 7;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub rule_set_version: String,
    pub concurrency: usize,
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rule_set_version: crate::sanitizer::DEFAULT_RULE_SET.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            show_progress: false,
        }
    }
}

/// A log after pre-flight checks.
#[derive(Debug, Clone)]
pub enum Prepared {
    /// Ready to send.
    Ready(SanitizedExcerpt),
    /// Rejected before any network call; carries the FAILED result.
    Rejected(AnalysisResult),
}

/// Counts of what happened to the window's logs in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub discovered: usize,
    pub reused: usize,
    pub rejected: usize,
    pub analysed: usize,
    pub failed: usize,
}

/// A completed run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub report: WeeklyReport,
    pub stats: RunStats,
}

pub struct Pipeline {
    analyzer: Analyzer,
    aggregator: Aggregator,
    store: Arc<InsightStore>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Build a pipeline. `cancel` stops the run; `caller` should observe
    /// the same token.
    pub fn new(
        caller: RetryingCaller,
        store: Arc<InsightStore>,
        config: PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            analyzer: Analyzer::new(caller.clone()),
            aggregator: Aggregator::new(caller),
            store,
            config,
            cancel,
        }
    }

    fn run_id(&self) -> &str {
        self.analyzer.run_id()
    }

    /// Validate goal references and sanitize one log.
    ///
    /// Every referenced goal must exist; a log with no references or one
    /// too large to load is rejected too. Nothing here touches the network.
    pub fn prepare(&self, entry: &RawLogEntry, goals: &GoalSet) -> Prepared {
        let rule_set = &self.config.rule_set_version;
        let mut steps = vec![format!("validated goal references: {}", entry.goal_refs.join(", "))];

        let reject = |steps: Vec<String>, reason: String| {
            warn!(log = %entry.log, "Rejected before analysis: {}", reason);
            Prepared::Rejected(AnalysisResult::rejected(
                entry.log.clone(),
                rule_set,
                self.run_id(),
                steps,
                reason,
            ))
        };

        if let Some(size) = entry.oversized {
            steps[0] = format!("size check failed: {} bytes", size);
            return reject(steps, format!("log exceeds {} bytes", MAX_LOG_SIZE));
        }

        if entry.goal_refs.is_empty() {
            steps[0] = "validated goal references: none declared".to_string();
            return reject(steps, "log declares no goal references".to_string());
        }

        let unknown = goals.unknown(&entry.goal_refs);
        if !unknown.is_empty() {
            steps[0] = "goal reference validation failed".to_string();
            return reject(steps, format!("unknown goal id(s): {}", unknown.join(", ")));
        }

        match sanitize_entry(entry, rule_set) {
            Ok(excerpt) => Prepared::Ready(excerpt),
            Err(e) => {
                steps.push(format!("sanitization with rule set {} failed", rule_set));
                reject(steps, format!("sanitization failed: {}", e))
            }
        }
    }

    /// Analyse every log not already analysed in this run.
    ///
    /// Stored non-FAILED results for the same run are reused; FAILED ones
    /// are retried. Returns [`PipelineError::Cancelled`] if the run was
    /// cancelled before every log reached a terminal state.
    pub async fn analyze_all(
        &self,
        entries: &[RawLogEntry],
        goals: &GoalSet,
    ) -> Result<RunStats, PipelineError> {
        let mut stats = RunStats {
            discovered: entries.len(),
            ..RunStats::default()
        };

        let mut pending: Vec<SanitizedExcerpt> = Vec::new();
        for entry in entries {
            let key = ArtifactKey {
                log_path: entry.log.path.clone(),
                rule_set_version: self.config.rule_set_version.clone(),
                run_id: self.run_id().to_string(),
            };
            if let Some(existing) = self.store.find(&key).await {
                if !existing.is_failed() {
                    debug!(log = %entry.log, "Reusing stored result");
                    stats.reused += 1;
                    continue;
                }
            }

            match self.prepare(entry, goals) {
                Prepared::Ready(excerpt) => pending.push(excerpt),
                Prepared::Rejected(result) => {
                    stats.rejected += 1;
                    self.store.put(result).await?;
                }
            }
        }

        info!(
            "Analysing {} log(s) ({} reused, {} rejected), concurrency {}",
            pending.len(),
            stats.reused,
            stats.rejected,
            self.config.concurrency
        );

        let progress = self.progress_bar(pending.len() as u64);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let goals = Arc::new(goals.clone());
        let mut tasks: JoinSet<(LogRef, Result<Option<AnalysisResult>, StoreError>)> = JoinSet::new();

        for excerpt in pending {
            let semaphore = semaphore.clone();
            let analyzer = self.analyzer.clone();
            let store = self.store.clone();
            let goals = goals.clone();
            let cancel = self.cancel.clone();

            tasks.spawn(async move {
                let log = excerpt.log.clone();
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (log, Ok(None));
                };
                if cancel.is_cancelled() {
                    return (log, Ok(None));
                }

                let outcome = match analyzer.analyze(&excerpt, &goals).await {
                    Some(result) => store.put(result.clone()).await.map(|_| Some(result)),
                    None => Ok(None),
                };
                (log, outcome)
            });
        }

        let mut abandoned = 0;
        let mut store_error = None;
        while let Some(joined) = tasks.join_next().await {
            progress.inc(1);
            match joined {
                Ok((_, Ok(Some(result)))) => {
                    stats.analysed += 1;
                    if result.is_failed() {
                        stats.failed += 1;
                    }
                }
                Ok((log, Ok(None))) => {
                    debug!(log = %log, "Analysis abandoned");
                    abandoned += 1;
                }
                Ok((log, Err(e))) => {
                    error!(log = %log, "Failed to store result: {}", e);
                    store_error.get_or_insert(e);
                }
                Err(e) => {
                    error!("Analysis task panicked: {}", e);
                    abandoned += 1;
                }
            }
        }
        progress.finish_and_clear();

        if let Some(e) = store_error {
            return Err(e.into());
        }

        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                completed: stats.reused + stats.rejected + stats.analysed,
                abandoned,
            });
        }

        Ok(stats)
    }

    /// Analyse the window's logs, then synthesize its report.
    ///
    /// The report is built from every stored result of this run in the
    /// window, including results reused from an earlier invocation.
    pub async fn run(
        &self,
        window: &Window,
        entries: &[RawLogEntry],
        goals: &GoalSet,
    ) -> Result<PipelineRun, PipelineError> {
        let in_window: Vec<RawLogEntry> = entries
            .iter()
            .filter(|e| window.contains(e.log.date))
            .cloned()
            .collect();

        let stats = self.analyze_all(&in_window, goals).await?;

        let results: Vec<AnalysisResult> = self
            .store
            .get(window)
            .await
            .into_iter()
            .filter(|r| r.run_id == self.run_id() && r.rule_set_version == self.config.rule_set_version)
            .collect();

        let report = self.aggregator.synthesize(window, &results, goals).await?;

        info!(
            week = %report.week_id,
            status = %report.status,
            contributing = report.contributing.len(),
            failures = report.failures.len(),
            "Weekly report ready"
        );

        Ok(PipelineRun { report, stats })
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} logs")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    }
}
