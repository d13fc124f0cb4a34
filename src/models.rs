//! Data models for the insight pipeline.
//!
//! This module contains the core data structures that flow through the
//! pipeline: raw logs, sanitized excerpts, per-log analysis results,
//! goals, reporting windows and the weekly report.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign};
use std::path::{Path, PathBuf};

/// Reference to a daily log: its source path and the date it covers.
///
/// Ordering is by date first, then by path, which is the order the
/// aggregator uses when merging goal insights.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogRef {
    /// Date the log covers.
    pub date: NaiveDate,
    /// Path of the log file as committed (e.g. `daily-logs/2025-09-22.mon.log.md`).
    pub path: String,
}

impl LogRef {
    pub fn new(path: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            date,
            path: path.into(),
        }
    }

    /// Weekday of the log date.
    pub fn weekday(&self) -> Weekday {
        self.date.weekday()
    }

    /// Final path component, used in report listings.
    pub fn file_name(&self) -> &str {
        Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.path)
    }
}

impl fmt::Display for LogRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// A committed daily log, immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLogEntry {
    pub log: LogRef,
    pub weekday: Weekday,
    /// Free-text markdown content.
    pub content: String,
    /// Goal ids declared in the content, sorted and deduplicated.
    pub goal_refs: Vec<String>,
    /// Hex SHA-256 of the content.
    pub content_hash: String,
    /// Size in bytes of a log too large to load; its content is left empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oversized: Option<u64>,
}

impl RawLogEntry {
    /// Build an entry from a log's path, date and content.
    ///
    /// Goal references are extracted from the content.
    pub fn new(path: impl Into<String>, date: NaiveDate, content: String) -> Self {
        let goal_refs = crate::goals::extract_goal_ids(&content);
        Self::with_goal_refs(path, date, content, goal_refs)
    }

    /// Build an entry with an explicit goal reference list.
    pub fn with_goal_refs(
        path: impl Into<String>,
        date: NaiveDate,
        content: String,
        mut goal_refs: Vec<String>,
    ) -> Self {
        goal_refs.sort();
        goal_refs.dedup();
        let content_hash = content_hash(&content);
        Self {
            log: LogRef::new(path, date),
            weekday: date.weekday(),
            content,
            goal_refs,
            content_hash,
            oversized: None,
        }
    }

    /// Placeholder for a log that was found but not loaded because of its size.
    pub fn oversized(path: impl Into<String>, date: NaiveDate, size_bytes: u64) -> Self {
        Self {
            oversized: Some(size_bytes),
            ..Self::with_goal_refs(path, date, String::new(), Vec::new())
        }
    }
}

/// Hex-encoded SHA-256 of a log's content.
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// Counts of what a rule set removed from one log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionReport {
    pub emails: usize,
    pub names: usize,
    pub phones: usize,
    pub sensitive_notes: usize,
}

impl RedactionReport {
    pub fn total(&self) -> usize {
        self.emails + self.names + self.phones + self.sensitive_notes
    }

    pub fn is_redacted(&self) -> bool {
        self.total() > 0
    }
}

/// Redacted text derived 1:1 from a [`RawLogEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedExcerpt {
    pub log: LogRef,
    pub text: String,
    /// Version of the redaction rule set that produced `text`.
    pub rule_set_version: String,
    /// Hash of the raw content the excerpt was derived from.
    pub source_hash: String,
    pub redactions: RedactionReport,
}

/// Outcome status of a single log analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    Pass,
    Warn,
    Info,
    Failed,
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisStatus::Pass => write!(f, "PASS"),
            AnalysisStatus::Warn => write!(f, "WARN"),
            AnalysisStatus::Info => write!(f, "INFO"),
            AnalysisStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl AnalysisStatus {
    /// Returns an emoji representation of the status.
    pub fn emoji(&self) -> &'static str {
        match self {
            AnalysisStatus::Pass => "🟢",
            AnalysisStatus::Warn => "🟡",
            AnalysisStatus::Info => "🔵",
            AnalysisStatus::Failed => "🔴",
        }
    }

    /// Derive the status of a successful analysis from its insight.
    pub fn from_insight(insight: &LogInsight) -> Self {
        let behind = insight
            .goal_insights
            .iter()
            .any(|g| g.status == GoalStatus::Behind);

        if behind || !insight.risks.is_empty() {
            AnalysisStatus::Warn
        } else if insight.goal_insights.is_empty() {
            AnalysisStatus::Info
        } else {
            AnalysisStatus::Pass
        }
    }
}

/// Token usage of one or more endpoint calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn new(prompt: u64, completion: u64, total: u64) -> Self {
        Self {
            prompt,
            completion,
            total,
        }
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt: self.prompt + other.prompt,
            completion: self.completion + other.completion,
            total: self.total + other.total,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: TokenUsage) {
        *self = *self + other;
    }
}

impl std::iter::Sum for TokenUsage {
    fn sum<I: Iterator<Item = TokenUsage>>(iter: I) -> Self {
        iter.fold(TokenUsage::default(), |acc, u| acc + u)
    }
}

/// Progress assessment for a goal, as reported by the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GoalStatus {
    Ahead,
    OnTrack,
    Behind,
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoalStatus::Ahead => write!(f, "Ahead"),
            GoalStatus::OnTrack => write!(f, "On Track"),
            GoalStatus::Behind => write!(f, "Behind"),
        }
    }
}

/// One goal-keyed insight from a log analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalInsight {
    pub goal_id: String,
    pub status: GoalStatus,
    #[serde(default)]
    pub notes: String,
}

/// Validated structured body of a daily analysis response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogInsight {
    pub summary: String,
    pub goal_insights: Vec<GoalInsight>,
    pub follow_ups: Vec<String>,
    pub risks: Vec<String>,
}

/// Storage key: at most one result exists per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub log_path: String,
    pub rule_set_version: String,
    pub run_id: String,
}

/// Result of analysing one log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub log: LogRef,
    pub rule_set_version: String,
    pub run_id: String,
    /// Ordered record of what happened while analysing the log.
    pub steps: Vec<String>,
    pub status: AnalysisStatus,
    /// Usage of the final attempt, if the endpoint reported any.
    pub usage: Option<TokenUsage>,
    /// Upstream request id; `None` if no call completed.
    pub request_id: Option<String>,
    /// Where the store persisted this result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight: Option<LogInsight>,
    /// Failure reason when `status` is FAILED.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of endpoint attempts made.
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// A result for a log that was rejected before any endpoint call.
    pub fn rejected(
        log: LogRef,
        rule_set_version: &str,
        run_id: &str,
        steps: Vec<String>,
        reason: String,
    ) -> Self {
        Self {
            log,
            rule_set_version: rule_set_version.to_string(),
            run_id: run_id.to_string(),
            steps,
            status: AnalysisStatus::Failed,
            usage: None,
            request_id: None,
            artifact: None,
            insight: None,
            error: Some(reason),
            attempts: 0,
            completed_at: Utc::now(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == AnalysisStatus::Failed
    }

    pub fn key(&self) -> ArtifactKey {
        ArtifactKey {
            log_path: self.log.path.clone(),
            rule_set_version: self.rule_set_version.clone(),
            run_id: self.run_id.clone(),
        }
    }
}

/// A goal definition from the goal source. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub success_metric: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub last_updated: Option<NaiveDate>,
}

/// The validated set of known goals, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalSet {
    goals: BTreeMap<String, Goal>,
}

impl GoalSet {
    pub fn new(goals: impl IntoIterator<Item = Goal>) -> Self {
        Self {
            goals: goals.into_iter().map(|g| (g.id.clone(), g)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Goal> {
        self.goals.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.goals.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Goal> {
        self.goals.values()
    }

    /// Ids from `refs` that are not in the set, in input order.
    pub fn unknown<'a>(&self, refs: &'a [String]) -> Vec<&'a str> {
        refs.iter()
            .filter(|id| !self.contains(id))
            .map(String::as_str)
            .collect()
    }
}

/// A Monday–Saturday reporting window for one ISO week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// ISO week id, e.g. `2025-W39`.
    pub week_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Window {
    /// Parse an ISO week id (`YYYY-Www`).
    pub fn from_week_id(week_id: &str) -> Option<Self> {
        let (year, week) = week_id.split_once("-W")?;
        let year: i32 = year.parse().ok()?;
        let week: u32 = week.parse().ok()?;
        let start = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)?;
        Some(Self::starting(start))
    }

    /// The window of the ISO week containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        // A valid date always has a valid ISO week Monday.
        let start = NaiveDate::from_isoywd_opt(iso.year(), iso.week(), Weekday::Mon)
            .unwrap_or(date - Duration::days(date.weekday().num_days_from_monday() as i64));
        Self::starting(start)
    }

    /// The window to report on when running on `today`.
    ///
    /// On Sunday this is the week that just ended.
    pub fn default_for(today: NaiveDate) -> Self {
        if today.weekday() == Weekday::Sun {
            Self::containing(today - Duration::days(1))
        } else {
            Self::containing(today)
        }
    }

    fn starting(monday: NaiveDate) -> Self {
        let iso = monday.iso_week();
        Self {
            week_id: format!("{}-W{:02}", iso.year(), iso.week()),
            start: monday,
            end: monday + Duration::days(5),
        }
    }

    /// Whether `date` falls in the window (inclusive).
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// File slug for weekly artifacts, e.g. `week-39`.
    pub fn slug(&self) -> String {
        match self.week_id.split_once("-W") {
            Some((_, week)) => format!("week-{}", week.to_lowercase()),
            None => format!("week-{}", self.week_id.to_lowercase()),
        }
    }
}

/// Merged status of one goal across the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalProgress {
    pub goal_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: GoalStatus,
    pub notes: String,
    /// Log whose insight won the merge.
    pub source: LogRef,
}

/// A narrative section of the synthesized report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeSection {
    pub heading: String,
    pub body: String,
}

/// Raw per-log highlight, always present in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyHighlight {
    pub log: LogRef,
    pub status: AnalysisStatus,
    pub summary: String,
    pub follow_ups: Vec<String>,
    pub risks: Vec<String>,
    pub usage: Option<TokenUsage>,
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
}

/// A log that did not complete analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub log: LogRef,
    pub reason: String,
    pub attempts: u32,
}

/// Whether narrative synthesis succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Complete,
    Degraded,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStatus::Complete => write!(f, "COMPLETE"),
            ReportStatus::Degraded => write!(f, "DEGRADED"),
        }
    }
}

/// The consolidated report for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyReport {
    pub week_id: String,
    pub window: Window,
    pub run_id: String,
    pub status: ReportStatus,
    /// Narrative sections; empty when the report is degraded.
    pub sections: Vec<NarrativeSection>,
    pub highlights: Vec<DailyHighlight>,
    pub goal_progress: BTreeMap<String, GoalProgress>,
    /// Summed usage of contributing (non-failed) analyses only.
    pub token_usage: TokenUsage,
    pub contributing: Vec<ArtifactKey>,
    /// Partial-failure manifest; always present, possibly empty.
    pub failures: Vec<FailureEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis_usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis_error: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl WeeklyReport {
    pub fn token_usage_total(&self) -> u64 {
        self.token_usage.total
    }

    pub fn is_degraded(&self) -> bool {
        self.status == ReportStatus::Degraded
    }
}
