//! Per-log analysis.

use super::retry::{CallOutcome, RetryingCaller};
use crate::endpoint::schema::{daily_analysis_schema, validate_log_analysis};
use crate::endpoint::{EndpointRequest, GoalContext, RequestKind, UsageMetrics};
use crate::models::{AnalysisResult, AnalysisStatus, GoalSet, SanitizedExcerpt};
use chrono::Utc;
use tracing::{info, warn};

/// Analyses sanitized excerpts against the goal set.
#[derive(Clone)]
pub struct Analyzer {
    caller: RetryingCaller,
}

impl Analyzer {
    pub fn new(caller: RetryingCaller) -> Self {
        Self { caller }
    }

    pub fn run_id(&self) -> &str {
        self.caller.run_id()
    }

    /// Analyse one excerpt.
    ///
    /// Failures never propagate: an exhausted retry budget, a rejected
    /// request or an invalid response yields a FAILED result. Returns
    /// `None` only when the run was cancelled before the log reached a
    /// terminal state.
    pub async fn analyze(&self, excerpt: &SanitizedExcerpt, goals: &GoalSet) -> Option<AnalysisResult> {
        let request = EndpointRequest {
            kind: RequestKind::DailyAnalysis,
            subject: excerpt.log.path.clone(),
            content: excerpt.text.clone(),
            goal_context: goals.iter().map(GoalContext::from).collect(),
            output_schema: daily_analysis_schema(),
        };

        let mut steps = vec![format!(
            "sanitized with rule set {} ({} redactions)",
            excerpt.rule_set_version,
            excerpt.redactions.total()
        )];

        let outcome = self
            .caller
            .call(&request, |body| validate_log_analysis(body, goals))
            .await;

        let mut result = AnalysisResult {
            log: excerpt.log.clone(),
            rule_set_version: excerpt.rule_set_version.clone(),
            run_id: self.caller.run_id().to_string(),
            steps: Vec::new(),
            status: AnalysisStatus::Failed,
            usage: None,
            request_id: None,
            artifact: None,
            insight: None,
            error: None,
            attempts: 0,
            completed_at: Utc::now(),
        };

        match outcome {
            CallOutcome::Succeeded {
                value,
                usage,
                attempts,
                steps: call_steps,
            } => {
                steps.extend(call_steps);
                steps.push(format!(
                    "validated: {} goal insight(s), {} follow-up(s), {} risk(s)",
                    value.goal_insights.len(),
                    value.follow_ups.len(),
                    value.risks.len()
                ));
                result.status = AnalysisStatus::from_insight(&value);
                result.insight = Some(value);
                result.attempts = attempts;
                set_usage(&mut result, usage);
                info!(log = %excerpt.log, status = %result.status, attempts, "Analysed log");
            }
            CallOutcome::Failed {
                reason,
                usage,
                attempts,
                steps: call_steps,
            } => {
                steps.extend(call_steps);
                result.error = Some(reason);
                result.attempts = attempts;
                set_usage(&mut result, usage);
                warn!(log = %excerpt.log, attempts, "Analysis failed");
            }
            CallOutcome::Abandoned { attempts, .. } => {
                warn!(log = %excerpt.log, attempts, "Analysis abandoned");
                return None;
            }
        }

        result.steps = steps;
        result.completed_at = Utc::now();
        Some(result)
    }
}

fn set_usage(result: &mut AnalysisResult, usage: Option<UsageMetrics>) {
    if let Some(metrics) = usage {
        result.usage = Some(metrics.token_usage());
        result.request_id = metrics.request_id;
    }
}
