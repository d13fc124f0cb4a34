//! Bounded retry of endpoint calls.
//!
//! Every call runs through a small state machine:
//!
//! ```text
//! Pending -> Attempting(1) -> Succeeded
//!                          -> Failed
//!                          -> (transient error, backoff) -> Attempting(2) -> ...
//! ```
//!
//! Each attempt appends exactly one usage ledger record. Cancellation is
//! observed before an attempt starts and during backoff, never while a
//! request is in flight.

use crate::endpoint::{AnalysisEndpoint, EndpointRequest, UsageMetrics};
use crate::error::{EndpointError, SchemaViolation};
use crate::ledger::{AttemptOutcome, UsageLedger, UsageRecord};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Retry policy: at most `max_attempts` calls, waiting `n² × backoff_unit`
/// after failed attempt `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_unit,
        }
    }

    /// Wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt.saturating_mul(attempt)
    }

    /// The full backoff schedule, one delay per attempt.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts).map(|n| self.delay_after(n)).collect()
    }
}

/// State of one retried call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    Attempting(u32),
    Succeeded,
    Failed,
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptState::Pending => write!(f, "pending"),
            AttemptState::Attempting(n) => write!(f, "attempting({})", n),
            AttemptState::Succeeded => write!(f, "succeeded"),
            AttemptState::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal outcome of a retried call.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Succeeded {
        value: T,
        usage: Option<UsageMetrics>,
        attempts: u32,
        steps: Vec<String>,
    },
    Failed {
        reason: String,
        /// Usage of the last attempt that returned any.
        usage: Option<UsageMetrics>,
        attempts: u32,
        steps: Vec<String>,
    },
    /// The run was cancelled before the call reached a terminal state.
    Abandoned { attempts: u32, steps: Vec<String> },
}

/// Issues endpoint calls under a retry policy, recording every attempt.
#[derive(Clone)]
pub struct RetryingCaller {
    endpoint: Arc<dyn AnalysisEndpoint>,
    ledger: Arc<dyn UsageLedger>,
    policy: RetryPolicy,
    run_id: String,
    cancel: CancellationToken,
}

impl RetryingCaller {
    pub fn new(
        endpoint: Arc<dyn AnalysisEndpoint>,
        ledger: Arc<dyn UsageLedger>,
        policy: RetryPolicy,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint,
            ledger,
            policy,
            run_id: run_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Observe `token` for cancellation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `request` to a terminal state, validating each reply body.
    ///
    /// Only transient endpoint errors are retried. A rejected request,
    /// a malformed envelope or a body failing `validate` ends the call.
    pub async fn call<T, F>(&self, request: &EndpointRequest, validate: F) -> CallOutcome<T>
    where
        F: Fn(&str) -> Result<T, SchemaViolation>,
    {
        let mut state = AttemptState::Pending;
        let mut steps = Vec::new();
        let mut last_usage = None;
        let mut attempt = 0;
        debug!(subject = %request.subject, %state, max_attempts = self.policy.max_attempts, "Queued endpoint call");

        loop {
            attempt += 1;

            if self.cancel.is_cancelled() {
                steps.push(format!("abandoned before attempt {}: run cancelled", attempt));
                return CallOutcome::Abandoned {
                    attempts: attempt - 1,
                    steps,
                };
            }

            state = AttemptState::Attempting(attempt);
            debug!(subject = %request.subject, %state, "Calling analysis endpoint");

            let failure = match self.endpoint.complete(request).await {
                Ok(reply) => {
                    let request_id = reply.usage.as_ref().and_then(|u| u.request_id.clone());
                    last_usage = reply.usage.clone();

                    match validate(&reply.body) {
                        Ok(value) => {
                            self.record(request, attempt, AttemptOutcome::Succeeded, reply.usage.as_ref())
                                .await;
                            state = AttemptState::Succeeded;
                            debug!(subject = %request.subject, %state, "Endpoint call finished");
                            steps.push(format!(
                                "attempt {}: succeeded (request {})",
                                attempt,
                                request_id.as_deref().unwrap_or("unknown")
                            ));
                            info!(
                                subject = %request.subject,
                                attempt,
                                request_id = request_id.as_deref().unwrap_or(""),
                                "Endpoint call succeeded"
                            );
                            return CallOutcome::Succeeded {
                                value,
                                usage: reply.usage,
                                attempts: attempt,
                                steps,
                            };
                        }
                        Err(violation) => {
                            self.record(
                                request,
                                attempt,
                                AttemptOutcome::SchemaViolation,
                                reply.usage.as_ref(),
                            )
                            .await;
                            violation.to_string()
                        }
                    }
                }
                Err(EndpointError::Malformed(message)) => {
                    self.record(request, attempt, AttemptOutcome::SchemaViolation, None)
                        .await;
                    SchemaViolation(format!("malformed response envelope: {}", message)).to_string()
                }
                Err(err @ EndpointError::Rejected { .. }) => {
                    self.record(request, attempt, AttemptOutcome::Rejected, None).await;
                    err.to_string()
                }
                Err(err @ EndpointError::Transient { .. }) => {
                    self.record(request, attempt, AttemptOutcome::TransientError, None)
                        .await;

                    if attempt >= self.policy.max_attempts {
                        steps.push(format!("attempt {}: {}", attempt, err));
                        let reason = format!("gave up after {} attempts: {}", attempt, err);
                        warn!(subject = %request.subject, attempt, "Retries exhausted: {}", err);
                        return CallOutcome::Failed {
                            reason,
                            usage: last_usage,
                            attempts: attempt,
                            steps,
                        };
                    }

                    let delay = self.policy.delay_after(attempt);
                    steps.push(format!(
                        "attempt {}: {}; retrying in {:?}",
                        attempt, err, delay
                    ));
                    warn!(
                        subject = %request.subject,
                        attempt,
                        "Transient endpoint error, retrying in {:?}: {}",
                        delay,
                        err
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {
                            steps.push(format!("abandoned during backoff after attempt {}: run cancelled", attempt));
                            return CallOutcome::Abandoned { attempts: attempt, steps };
                        }
                    }
                    continue;
                }
            };

            // Non-retryable failure.
            state = AttemptState::Failed;
            debug!(subject = %request.subject, %state, "Endpoint call failed");
            steps.push(format!("attempt {}: {}", attempt, failure));
            warn!(subject = %request.subject, attempt, "Endpoint call failed: {}", failure);
            return CallOutcome::Failed {
                reason: failure,
                usage: last_usage,
                attempts: attempt,
                steps,
            };
        }
    }

    async fn record(
        &self,
        request: &EndpointRequest,
        attempt: u32,
        outcome: AttemptOutcome,
        usage: Option<&UsageMetrics>,
    ) {
        let record = UsageRecord {
            timestamp: Utc::now(),
            run_id: self.run_id.clone(),
            subject: request.subject.clone(),
            attempt,
            outcome,
            request_id: usage.and_then(|u| u.request_id.clone()),
            usage: usage.map(UsageMetrics::token_usage).unwrap_or_default(),
        };

        if let Err(e) = self.ledger.append(record).await {
            warn!(subject = %request.subject, attempt, "Failed to append usage record: {}", e);
        }
    }
}
