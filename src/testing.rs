//! Test infrastructure: a scripted analysis endpoint and fixtures.
//!
//! `MockEndpoint` replays queued replies in FIFO order, either per subject
//! (log path or `weekly:<week id>`) or from a shared queue, and records
//! every request it receives.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::endpoint::{AnalysisEndpoint, EndpointReply, EndpointRequest, UsageMetrics};
use crate::error::{EndpointError, FailureKind};
use crate::models::{Goal, GoalSet, GoalStatus};

type Scripted = Result<EndpointReply, EndpointError>;

/// Mock endpoint that returns scripted replies.
pub struct MockEndpoint {
    by_subject: Mutex<HashMap<String, VecDeque<Scripted>>>,
    shared: Mutex<VecDeque<Scripted>>,
    pub call_log: Mutex<Vec<EndpointRequest>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl MockEndpoint {
    pub fn new() -> Self {
        Self {
            by_subject: Mutex::new(HashMap::new()),
            shared: Mutex::new(VecDeque::new()),
            call_log: Mutex::new(Vec::new()),
            cancel_after: None,
        }
    }

    /// Cancel `token` once `calls` requests have been answered.
    pub fn cancelling_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    /// Queue a reply for one subject.
    pub async fn script(&self, subject: &str, reply: Scripted) {
        self.by_subject
            .lock()
            .await
            .entry(subject.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Queue a reply for whichever subject asks next.
    pub async fn push(&self, reply: Scripted) {
        self.shared.lock().await.push_back(reply);
    }

    /// Helper: a successful reply carrying `body` and `total` tokens.
    pub fn reply(body: &str, total: u64, request_id: &str) -> Scripted {
        let prompt = total * 2 / 3;
        Ok(EndpointReply {
            body: body.to_string(),
            usage: Some(UsageMetrics {
                prompt_tokens: prompt,
                completion_tokens: total - prompt,
                total_tokens: total,
                request_id: Some(request_id.to_string()),
            }),
        })
    }

    /// Helper: a valid daily analysis with one goal insight.
    pub fn analysis(goal_id: &str, status: GoalStatus, total: u64) -> Scripted {
        let status = match status {
            GoalStatus::Ahead => "Ahead",
            GoalStatus::OnTrack => "OnTrack",
            GoalStatus::Behind => "Behind",
        };
        let body = json!({
            "summary": format!("Worked on {}", goal_id),
            "goalInsights": [{ "goalId": goal_id, "status": status, "notes": "noted" }],
            "followUps": ["keep going"],
            "risks": []
        });
        Self::reply(&body.to_string(), total, &format!("resp_{}_{}", goal_id, total))
    }

    /// Helper: a valid weekly synthesis.
    pub fn synthesis(total: u64) -> Scripted {
        let body = json!({
            "sections": [
                { "heading": "Wins", "body": "Shipped the parser." },
                { "heading": "Next week", "body": "Polish docs." }
            ],
            "highlights": ["parser shipped"]
        });
        Self::reply(&body.to_string(), total, "resp_weekly")
    }

    /// Helper: a retryable failure.
    pub fn transient() -> Scripted {
        Err(EndpointError::Transient {
            kind: FailureKind::RateLimit,
            message: "slow down".to_string(),
        })
    }

    /// How many requests were made for `subject`.
    pub async fn calls_for(&self, subject: &str) -> usize {
        self.call_log
            .lock()
            .await
            .iter()
            .filter(|r| r.subject == subject)
            .count()
    }

    pub async fn call_count(&self) -> usize {
        self.call_log.lock().await.len()
    }
}

#[async_trait]
impl AnalysisEndpoint for MockEndpoint {
    async fn complete(&self, request: &EndpointRequest) -> Result<EndpointReply, EndpointError> {
        let calls = {
            let mut log = self.call_log.lock().await;
            log.push(request.clone());
            log.len()
        };

        let scripted = match self.by_subject.lock().await.get_mut(&request.subject) {
            Some(queue) if !queue.is_empty() => queue.pop_front(),
            _ => None,
        };
        let scripted = match scripted {
            Some(reply) => Some(reply),
            None => self.shared.lock().await.pop_front(),
        };

        if let Some((after, ref token)) = self.cancel_after {
            if calls >= after {
                token.cancel();
            }
        }

        scripted.unwrap_or_else(|| {
            Err(EndpointError::Rejected {
                status: 404,
                message: format!("no scripted reply for {}", request.subject),
            })
        })
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Goals `G-2025-W39-01` through `G-2025-W39-03`.
pub fn goal_set() -> GoalSet {
    GoalSet::new((1..=3).map(|n| Goal {
        id: format!("G-2025-W39-0{}", n),
        title: format!("Goal {}", n),
        description: String::new(),
        success_metric: "done".to_string(),
        status: "active".to_string(),
        last_updated: None,
    }))
}

/// A well-formed daily log for `day` of September 2025 referencing `goals`.
pub fn daily_log(day: u32, goals: &[&str]) -> String {
    let mut content = format!("# Daily log 2025-09-{:02}\n\n## Goals\n", day);
    for goal in goals {
        content.push_str(&format!("- {}\n", goal));
    }
    content.push_str("\n## Notes\nworked on the parser with alice@example.com\n");
    content
}
