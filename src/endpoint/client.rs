//! HTTP client for an OpenAI-compatible chat completions API.
//!
//! Works against hosted APIs as well as a local Ollama server's `/v1`
//! compatibility layer. Responses are constrained with a JSON schema.

use super::{AnalysisEndpoint, EndpointReply, EndpointRequest, RequestKind, UsageMetrics};
use crate::error::{EndpointError, FailureKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Configuration for the HTTP endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Base URL, e.g. `http://localhost:11434/v1`.
    pub api_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    /// Bearer token, if the API needs one.
    pub api_key: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:11434/v1".to_string(),
            model_name: "llama3.2:latest".to_string(),
            temperature: 0.1,
            timeout_seconds: 300,
            api_key: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    id: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
}

/// Analysis endpoint backed by HTTP.
pub struct HttpEndpoint {
    config: EndpointConfig,
    http_client: reqwest::Client,
}

impl HttpEndpoint {
    pub fn new(config: EndpointConfig) -> Result<Self, EndpointError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| EndpointError::Rejected {
                status: 0,
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn build_request(&self, request: &EndpointRequest) -> ChatRequest {
        let system_prompt = match request.kind {
            RequestKind::DailyAnalysis => DAILY_SYSTEM_PROMPT,
            RequestKind::WeeklySynthesis => WEEKLY_SYSTEM_PROMPT,
        };

        let mut user = String::new();
        if !request.goal_context.is_empty() {
            let goals = serde_json::to_string_pretty(&request.goal_context).unwrap_or_default();
            user.push_str("=== GOALS ===\n");
            user.push_str(&goals);
            user.push_str("\n\n");
        }
        user.push_str("=== CONTENT ===\n");
        user.push_str(&request.content);

        let schema_name = match request.kind {
            RequestKind::DailyAnalysis => "daily_analysis",
            RequestKind::WeeklySynthesis => "weekly_synthesis",
        };

        ChatRequest {
            model: self.config.model_name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.config.temperature,
            response_format: json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema_name,
                    "strict": true,
                    "schema": request.output_schema,
                }
            }),
        }
    }

    fn classify_send_error(&self, e: reqwest::Error) -> EndpointError {
        if e.is_timeout() {
            EndpointError::Transient {
                kind: FailureKind::Timeout,
                message: format!("request timed out after {}s", self.config.timeout_seconds),
            }
        } else if e.is_connect() {
            EndpointError::Transient {
                kind: FailureKind::Network,
                message: format!("cannot connect to {}", self.config.api_url),
            }
        } else if (e.is_builder() || e.is_redirect() || e.is_request()) && !has_io_source(&e) {
            // The request itself is bad; not retryable
            EndpointError::Rejected {
                status: 0,
                message: format!("invalid request: {}", e),
            }
        } else {
            EndpointError::Transient {
                kind: FailureKind::Network,
                message: format!("failed to send request: {}", e),
            }
        }
    }
}

/// Whether an I/O error sits anywhere in the error's source chain.
fn has_io_source(e: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if err.is::<std::io::Error>() {
            return true;
        }
        source = err.source();
    }
    false
}

#[async_trait]
impl AnalysisEndpoint for HttpEndpoint {
    async fn complete(&self, request: &EndpointRequest) -> Result<EndpointReply, EndpointError> {
        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));
        let body = self.build_request(request);

        debug!(subject = %request.subject, kind = ?request.kind, "Sending analysis request");

        let mut builder = self.http_client.post(&url).json(&body);
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.classify_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EndpointError::from_status(status, &body));
        }

        let text = response
            .text()
            .await
            .map_err(|e| self.classify_send_error(e))?;

        parse_envelope(&text)
    }
}

/// Decode a chat completions envelope into a reply.
fn parse_envelope(text: &str) -> Result<EndpointReply, EndpointError> {
    let envelope: ChatResponse =
        serde_json::from_str(text).map_err(|e| EndpointError::Malformed(e.to_string()))?;

    let usage = envelope.usage.map(|u| UsageMetrics {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u
            .total_tokens
            .unwrap_or(u.prompt_tokens + u.completion_tokens),
        request_id: envelope.id.clone(),
    });

    let body = envelope
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| EndpointError::Malformed("response has no message content".to_string()))?;

    Ok(EndpointReply { body, usage })
}

/// System prompt for per-log analysis
const DAILY_SYSTEM_PROMPT: &str = r#"You analyse one day of a personal work diary against the author's goals.
Respond with a single JSON object matching the provided schema:
- summary: two or three sentences on what happened
- goalInsights: one entry per goal the log touches, using only the goal ids listed under GOALS,
  with status Ahead, OnTrack or Behind and short notes
- followUps: concrete next actions
- risks: anything threatening progress
Only output JSON."#;

/// System prompt for weekly synthesis
const WEEKLY_SYSTEM_PROMPT: &str = r#"You write a weekly review from per-day analysis summaries.
Respond with a single JSON object matching the provided schema:
- sections: narrative sections, each with a heading and a markdown body
  (cover wins, goal progress, patterns, and priorities for next week)
- highlights: the most important one-line takeaways
Only output JSON."#;
