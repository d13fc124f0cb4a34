//! Output schemas and boundary validation of endpoint responses.
//!
//! Responses are validated once, here, into typed values. Anything that
//! does not fit is a [`SchemaViolation`].

use crate::error::SchemaViolation;
use crate::models::{GoalSet, LogInsight, NarrativeSection};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;

/// JSON schema for a daily analysis response.
pub fn daily_analysis_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["summary", "goalInsights", "followUps", "risks"],
        "properties": {
            "summary": { "type": "string" },
            "goalInsights": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["goalId", "status", "notes"],
                    "properties": {
                        "goalId": { "type": "string" },
                        "status": { "type": "string", "enum": ["Ahead", "OnTrack", "Behind"] },
                        "notes": { "type": "string" }
                    }
                }
            },
            "followUps": { "type": "array", "items": { "type": "string" } },
            "risks": { "type": "array", "items": { "type": "string" } }
        }
    })
}

/// JSON schema for a weekly synthesis response.
pub fn weekly_synthesis_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["sections", "highlights"],
        "properties": {
            "sections": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["heading", "body"],
                    "properties": {
                        "heading": { "type": "string" },
                        "body": { "type": "string" }
                    }
                }
            },
            "highlights": { "type": "array", "items": { "type": "string" } }
        }
    })
}

/// Validated weekly synthesis body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Synthesis {
    pub sections: Vec<NarrativeSection>,
    pub highlights: Vec<String>,
}

/// Validate a daily analysis body against the schema and the goal set.
///
/// A goal id the goal set does not know is a violation, as is a goal
/// reported twice.
pub fn validate_log_analysis(body: &str, goals: &GoalSet) -> Result<LogInsight, SchemaViolation> {
    let insight: LogInsight = parse_object(body)?;

    if insight.summary.trim().is_empty() {
        return Err(SchemaViolation("summary is empty".to_string()));
    }

    let mut seen = HashSet::new();
    for goal in &insight.goal_insights {
        if !goals.contains(&goal.goal_id) {
            return Err(SchemaViolation(format!(
                "unknown goal id '{}' in goalInsights",
                goal.goal_id
            )));
        }
        if !seen.insert(goal.goal_id.as_str()) {
            return Err(SchemaViolation(format!(
                "goal id '{}' reported more than once",
                goal.goal_id
            )));
        }
    }

    Ok(insight)
}

/// Validate a weekly synthesis body.
pub fn validate_synthesis(body: &str) -> Result<Synthesis, SchemaViolation> {
    let synthesis: Synthesis = parse_object(body)?;

    if synthesis.sections.is_empty() {
        return Err(SchemaViolation("synthesis has no sections".to_string()));
    }
    if let Some(section) = synthesis.sections.iter().find(|s| s.heading.trim().is_empty()) {
        return Err(SchemaViolation(format!(
            "section with empty heading (body starts '{}')",
            section.body.chars().take(40).collect::<String>()
        )));
    }

    Ok(synthesis)
}

/// Parse a body that must be a single JSON object of shape `T`.
fn parse_object<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, SchemaViolation> {
    let value: Value = serde_json::from_str(body.trim())
        .map_err(|e| SchemaViolation(format!("response is not JSON: {}", e)))?;

    if !value.is_object() {
        return Err(SchemaViolation("response is not a JSON object".to_string()));
    }

    serde_json::from_value(value).map_err(|e| SchemaViolation(e.to_string()))
}
