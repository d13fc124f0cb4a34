//! The LLM analysis endpoint.
//!
//! [`AnalysisEndpoint`] is the seam between the pipeline and the model
//! API. The production implementation is [`HttpEndpoint`]; tests script
//! replies through a mock.

pub mod client;
pub mod schema;

pub use client::{EndpointConfig, HttpEndpoint};

use crate::error::EndpointError;
use crate::models::{Goal, TokenUsage};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Which kind of call is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    DailyAnalysis,
    WeeklySynthesis,
}

/// Goal information sent alongside a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalContext {
    pub goal_id: String,
    pub title: String,
    pub success_metric: String,
    pub status: String,
}

impl From<&Goal> for GoalContext {
    fn from(goal: &Goal) -> Self {
        Self {
            goal_id: goal.id.clone(),
            title: goal.title.clone(),
            success_metric: goal.success_metric.clone(),
            status: goal.status.clone(),
        }
    }
}

/// One request to the endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointRequest {
    pub kind: RequestKind,
    /// Log path or `weekly:<week id>`; keys ledger records and logs.
    pub subject: String,
    /// Sanitized text, or the per-log summaries for synthesis.
    pub content: String,
    pub goal_context: Vec<GoalContext>,
    /// JSON schema the response body must satisfy.
    pub output_schema: Value,
}

/// Out-of-band usage metrics of a completed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub request_id: Option<String>,
}

impl UsageMetrics {
    pub fn token_usage(&self) -> TokenUsage {
        TokenUsage::new(self.prompt_tokens, self.completion_tokens, self.total_tokens)
    }
}

/// A completed call: the raw JSON body plus usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointReply {
    pub body: String,
    pub usage: Option<UsageMetrics>,
}

#[async_trait]
pub trait AnalysisEndpoint: Send + Sync {
    /// Issue exactly one request. Retrying is the caller's business.
    async fn complete(&self, request: &EndpointRequest) -> Result<EndpointReply, EndpointError>;
}
