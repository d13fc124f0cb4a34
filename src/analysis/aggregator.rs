//! Weekly aggregation and synthesis.
//!
//! This module merges the per-log results for a window into a
//! [`WeeklyReport`]: goal progress, usage totals, the partial-failure
//! manifest, and a narrative produced by one synthesis call.

use super::retry::{CallOutcome, RetryingCaller};
use crate::endpoint::schema::{validate_synthesis, weekly_synthesis_schema};
use crate::endpoint::{EndpointRequest, GoalContext, RequestKind};
use crate::error::PipelineError;
use crate::models::{
    AnalysisResult, DailyHighlight, FailureEntry, GoalProgress, GoalSet, NarrativeSection,
    ReportStatus, TokenUsage, Window, WeeklyReport,
};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Split results into (successes, failures), each sorted by log.
pub fn partition(results: &[AnalysisResult]) -> (Vec<&AnalysisResult>, Vec<&AnalysisResult>) {
    let (mut ok, mut failed): (Vec<_>, Vec<_>) = results.iter().partition(|r| !r.is_failed());
    ok.sort_by(|a, b| a.log.cmp(&b.log));
    failed.sort_by(|a, b| a.log.cmp(&b.log));
    (ok, failed)
}

/// Merge goal insights across successful results.
///
/// The latest log date wins. Two logs on the same date are ordered by
/// path and the greatest path wins, so the outcome does not depend on
/// input order.
pub fn merge_goal_progress(
    successes: &[&AnalysisResult],
    goals: &GoalSet,
) -> BTreeMap<String, GoalProgress> {
    let mut ordered: Vec<&AnalysisResult> = successes.to_vec();
    ordered.sort_by(|a, b| a.log.cmp(&b.log));

    let mut progress = BTreeMap::new();
    for result in ordered {
        let Some(ref insight) = result.insight else {
            continue;
        };
        for goal in &insight.goal_insights {
            progress.insert(
                goal.goal_id.clone(),
                GoalProgress {
                    goal_id: goal.goal_id.clone(),
                    title: goals.get(&goal.goal_id).map(|g| g.title.clone()),
                    status: goal.status,
                    notes: goal.notes.clone(),
                    source: result.log.clone(),
                },
            );
        }
    }

    progress
}

/// Summed usage of the results that contribute to a report.
pub fn contributing_usage(successes: &[&AnalysisResult]) -> TokenUsage {
    successes.iter().filter_map(|r| r.usage).sum()
}

fn highlight(result: &AnalysisResult) -> DailyHighlight {
    let (summary, follow_ups, risks) = match result.insight {
        Some(ref insight) => (
            insight.summary.clone(),
            insight.follow_ups.clone(),
            insight.risks.clone(),
        ),
        None => (String::new(), Vec::new(), Vec::new()),
    };

    DailyHighlight {
        log: result.log.clone(),
        status: result.status,
        summary,
        follow_ups,
        risks,
        usage: result.usage,
        request_id: result.request_id.clone(),
        artifact: result.artifact.clone(),
    }
}

fn failure_entry(result: &AnalysisResult) -> FailureEntry {
    FailureEntry {
        log: result.log.clone(),
        reason: result
            .error
            .clone()
            .unwrap_or_else(|| "analysis did not complete".to_string()),
        attempts: result.attempts,
    }
}

/// Text sent to the synthesis call: per-log summaries and merged progress.
fn synthesis_content(
    window: &Window,
    highlights: &[DailyHighlight],
    progress: &BTreeMap<String, GoalProgress>,
) -> String {
    let mut content = format!(
        "Week {} ({} to {})\n\n",
        window.week_id, window.start, window.end
    );

    content.push_str("## Daily summaries\n\n");
    for h in highlights {
        content.push_str(&format!(
            "### {} {} [{}]\n{}\n",
            h.log.date,
            h.log.weekday(),
            h.status,
            h.summary
        ));
        for follow_up in &h.follow_ups {
            content.push_str(&format!("- follow-up: {}\n", follow_up));
        }
        for risk in &h.risks {
            content.push_str(&format!("- risk: {}\n", risk));
        }
        content.push('\n');
    }

    if !progress.is_empty() {
        content.push_str("## Goal progress\n\n");
        for p in progress.values() {
            content.push_str(&format!("- {}: {} ({})\n", p.goal_id, p.status, p.notes));
        }
    }

    content
}

/// Builds weekly reports from per-log results.
#[derive(Clone)]
pub struct Aggregator {
    caller: RetryingCaller,
}

impl Aggregator {
    pub fn new(caller: RetryingCaller) -> Self {
        Self { caller }
    }

    /// Build the report for `window` from the full result set.
    ///
    /// Fails with [`PipelineError::InsufficientData`] when no result
    /// succeeded. A failed synthesis call yields a DEGRADED report
    /// carrying the raw per-log highlights.
    pub async fn synthesize(
        &self,
        window: &Window,
        results: &[AnalysisResult],
        goals: &GoalSet,
    ) -> Result<WeeklyReport, PipelineError> {
        let in_window: Vec<AnalysisResult> = results
            .iter()
            .filter(|r| window.contains(r.log.date))
            .cloned()
            .collect();
        let (successes, failures) = partition(&in_window);

        if successes.is_empty() {
            warn!(
                week = %window.week_id,
                failed = failures.len(),
                "No successful analyses, not producing a report"
            );
            return Err(PipelineError::InsufficientData {
                week_id: window.week_id.clone(),
                failed: failures.len(),
            });
        }

        let goal_progress = merge_goal_progress(&successes, goals);
        let token_usage = contributing_usage(&successes);
        let highlights: Vec<DailyHighlight> = successes.iter().map(|r| highlight(r)).collect();
        let contributing = successes.iter().map(|r| r.key()).collect();
        let failures: Vec<FailureEntry> = failures.iter().map(|r| failure_entry(r)).collect();

        info!(
            week = %window.week_id,
            contributing = successes.len(),
            failed = failures.len(),
            total_tokens = token_usage.total,
            "Synthesizing weekly report"
        );

        let goal_context = goal_progress
            .keys()
            .filter_map(|id| goals.get(id))
            .map(GoalContext::from)
            .collect();
        let request = EndpointRequest {
            kind: RequestKind::WeeklySynthesis,
            subject: format!("weekly:{}", window.week_id),
            content: synthesis_content(window, &highlights, &goal_progress),
            goal_context,
            output_schema: weekly_synthesis_schema(),
        };

        let mut report = WeeklyReport {
            week_id: window.week_id.clone(),
            window: window.clone(),
            run_id: self.caller.run_id().to_string(),
            status: ReportStatus::Degraded,
            sections: Vec::new(),
            highlights,
            goal_progress,
            token_usage,
            contributing,
            failures,
            synthesis_usage: None,
            synthesis_request_id: None,
            synthesis_error: None,
            generated_at: Utc::now(),
        };

        match self.caller.call(&request, validate_synthesis).await {
            CallOutcome::Succeeded { value, usage, .. } => {
                let mut sections = value.sections;
                if !value.highlights.is_empty() {
                    let body = value
                        .highlights
                        .iter()
                        .map(|h| format!("- {}", h))
                        .collect::<Vec<_>>()
                        .join("\n");
                    sections.push(NarrativeSection {
                        heading: "Highlights".to_string(),
                        body,
                    });
                }
                report.status = ReportStatus::Complete;
                report.sections = sections;
                if let Some(metrics) = usage {
                    report.synthesis_usage = Some(metrics.token_usage());
                    report.synthesis_request_id = metrics.request_id;
                }
            }
            CallOutcome::Failed { reason, usage, .. } => {
                warn!(week = %window.week_id, "Synthesis failed, report is degraded: {}", reason);
                report.synthesis_usage = usage.map(|m| m.token_usage());
                report.synthesis_error = Some(reason);
            }
            CallOutcome::Abandoned { .. } => {
                warn!(week = %window.week_id, "Synthesis abandoned, report is degraded");
                report.synthesis_error = Some("synthesis abandoned: run cancelled".to_string());
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::RetryPolicy;
    use crate::ledger::InMemoryLedger;
    use crate::models::{AnalysisStatus, GoalInsight, GoalStatus, LogInsight, LogRef};
    use crate::testing::{date, goal_set, MockEndpoint};
    use std::sync::Arc;
    use std::time::Duration;

    const WEEKLY: &str = "weekly:2025-W39";

    fn window() -> Window {
        Window::from_week_id("2025-W39").unwrap()
    }

    fn success(path: &str, day: u32, goal: &str, status: GoalStatus, total: u64) -> AnalysisResult {
        let insight = LogInsight {
            summary: format!("summary of {}", path),
            goal_insights: vec![GoalInsight {
                goal_id: goal.to_string(),
                status,
                notes: format!("from {}", path),
            }],
            follow_ups: vec![],
            risks: vec![],
        };
        AnalysisResult {
            log: LogRef::new(path, date(2025, 9, day)),
            rule_set_version: "v2".to_string(),
            run_id: "run".to_string(),
            steps: vec![],
            status: AnalysisStatus::from_insight(&insight),
            usage: Some(TokenUsage::new(total / 2, total - total / 2, total)),
            request_id: Some(format!("resp_{}", day)),
            artifact: None,
            insight: Some(insight),
            error: None,
            attempts: 1,
            completed_at: Utc::now(),
        }
    }

    fn failure(path: &str, day: u32) -> AnalysisResult {
        let mut r = AnalysisResult::rejected(
            LogRef::new(path, date(2025, 9, day)),
            "v2",
            "run",
            vec![],
            "gave up after 3 attempts".to_string(),
        );
        r.attempts = 3;
        r
    }

    fn aggregator(endpoint: Arc<MockEndpoint>) -> Aggregator {
        Aggregator::new(RetryingCaller::new(
            endpoint,
            Arc::new(InMemoryLedger::new()),
            RetryPolicy::new(2, Duration::from_millis(1)),
            "run",
        ))
    }

    #[test]
    fn test_latest_date_wins() {
        let a = success("logs/2025-09-22.mon.log.md", 22, "G-2025-W39-01", GoalStatus::OnTrack, 10);
        let b = success("logs/2025-09-23.tue.log.md", 23, "G-2025-W39-01", GoalStatus::Behind, 10);

        let progress = merge_goal_progress(&[&b, &a], &goal_set());
        let g1 = &progress["G-2025-W39-01"];
        assert_eq!(g1.status, GoalStatus::Behind);
        assert_eq!(g1.source.date, date(2025, 9, 23));
        assert_eq!(g1.title.as_deref(), Some("Goal 1"));
    }

    #[test]
    fn test_same_date_tie_break_is_order_independent() {
        let a = success("logs/a/2025-09-24.wed.log.md", 24, "G-2025-W39-02", GoalStatus::Ahead, 10);
        let b = success("logs/b/2025-09-24.wed.log.md", 24, "G-2025-W39-02", GoalStatus::Behind, 10);

        let forward = merge_goal_progress(&[&a, &b], &goal_set());
        let backward = merge_goal_progress(&[&b, &a], &goal_set());

        assert_eq!(forward, backward);
        assert_eq!(forward["G-2025-W39-02"].status, GoalStatus::Behind);
        assert_eq!(forward["G-2025-W39-02"].source.path, "logs/b/2025-09-24.wed.log.md");
    }

    #[tokio::test]
    async fn test_partial_failure_still_reports() {
        let endpoint = Arc::new(MockEndpoint::new());
        endpoint.script(WEEKLY, MockEndpoint::synthesis(500)).await;

        let mut results: Vec<AnalysisResult> = (22..=27)
            .map(|day| {
                success(
                    &format!("logs/2025-09-{}.log.md", day),
                    day,
                    "G-2025-W39-01",
                    GoalStatus::OnTrack,
                    100,
                )
            })
            .collect();
        results.push(failure("logs/2025-09-25-extra.log.md", 25));

        let report = aggregator(endpoint)
            .synthesize(&window(), &results, &goal_set())
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Complete);
        assert_eq!(report.contributing.len(), 6);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].attempts, 3);
        assert_eq!(report.token_usage_total(), 600);
        assert_eq!(report.synthesis_usage.unwrap().total, 500);
        assert_eq!(report.sections.last().unwrap().heading, "Highlights");
    }

    #[tokio::test]
    async fn test_usage_counts_successes_only() {
        let endpoint = Arc::new(MockEndpoint::new());
        endpoint.script(WEEKLY, MockEndpoint::synthesis(40)).await;

        let mut failed = failure("logs/2025-09-23.log.md", 23);
        failed.usage = Some(TokenUsage::new(5, 5, 10));
        let results = vec![
            success("logs/2025-09-22.log.md", 22, "G-2025-W39-01", GoalStatus::Ahead, 150),
            failed,
            success("logs/2025-09-24.log.md", 24, "G-2025-W39-02", GoalStatus::OnTrack, 130),
        ];

        let report = aggregator(endpoint)
            .synthesize(&window(), &results, &goal_set())
            .await
            .unwrap();

        let expected: u64 = results
            .iter()
            .filter(|r| !r.is_failed())
            .filter_map(|r| r.usage)
            .map(|u| u.total)
            .sum();
        assert_eq!(report.token_usage_total(), expected);
        assert_eq!(report.token_usage_total(), 280);
    }

    #[tokio::test]
    async fn test_zero_successes_is_insufficient_data() {
        let endpoint = Arc::new(MockEndpoint::new());
        let results = vec![failure("logs/2025-09-22.log.md", 22)];

        let err = aggregator(endpoint.clone())
            .synthesize(&window(), &results, &goal_set())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::InsufficientData { failed: 1, .. }));
        assert_eq!(endpoint.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_synthesis_is_degraded() {
        let endpoint = Arc::new(MockEndpoint::new());
        endpoint.script(WEEKLY, MockEndpoint::transient()).await;
        endpoint.script(WEEKLY, MockEndpoint::transient()).await;

        let results = vec![success(
            "logs/2025-09-22.log.md",
            22,
            "G-2025-W39-01",
            GoalStatus::OnTrack,
            100,
        )];

        let report = aggregator(endpoint.clone())
            .synthesize(&window(), &results, &goal_set())
            .await
            .unwrap();

        assert!(report.is_degraded());
        assert!(report.sections.is_empty());
        assert_eq!(report.highlights.len(), 1);
        assert_eq!(report.highlights[0].summary, "summary of logs/2025-09-22.log.md");
        assert!(report.failures.is_empty());
        assert!(report.synthesis_error.is_some());
        assert_eq!(endpoint.calls_for(WEEKLY).await, 2);
    }

    #[tokio::test]
    async fn test_results_outside_window_are_ignored() {
        let endpoint = Arc::new(MockEndpoint::new());
        endpoint.script(WEEKLY, MockEndpoint::synthesis(10)).await;
        let results = vec![
            success("logs/2025-09-22.log.md", 22, "G-2025-W39-01", GoalStatus::OnTrack, 100),
            success("logs/2025-09-28.log.md", 28, "G-2025-W39-01", GoalStatus::Behind, 100),
        ];

        let report = aggregator(endpoint)
            .synthesize(&window(), &results, &goal_set())
            .await
            .unwrap();

        assert_eq!(report.contributing.len(), 1);
        assert_eq!(report.goal_progress["G-2025-W39-01"].status, GoalStatus::OnTrack);
    }
}
