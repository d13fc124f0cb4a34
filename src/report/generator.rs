//! Markdown and JSON rendering.
//!
//! This module renders the weekly report, its partial-failure checklist,
//! and the human-readable summary stored next to each per-log artifact.

use crate::models::{AnalysisResult, GoalProgress, ReportStatus, WeeklyReport};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// File name of the weekly JSON report inside `<artifacts>/<week id>/`.
pub const WEEKLY_JSON: &str = "weekly-report.json";

/// Generate the weekly report markdown (`week-NN.md`).
pub fn generate_weekly_markdown(report: &WeeklyReport) -> String {
    let mut output = String::new();

    output.push_str(&format!("# Weekly Review: {}\n\n", report.week_id));
    output.push_str(&generate_metadata_section(report));

    if report.status == ReportStatus::Degraded {
        output.push_str(&generate_degraded_notice(report));
    }

    for section in &report.sections {
        output.push_str(&format!("## {}\n\n{}\n\n", section.heading, section.body.trim()));
    }

    output.push_str(&generate_goal_progress_section(&report.goal_progress));
    output.push_str(&generate_highlights_section(report));
    output.push_str(&generate_failures_section(report));
    output.push_str(&generate_metrics_section(report));

    output
}

fn generate_metadata_section(report: &WeeklyReport) -> String {
    let mut section = String::new();

    section.push_str(&format!(
        "- **Window:** {} to {}\n",
        report.window.start, report.window.end
    ));
    section.push_str(&format!("- **Run:** `{}`\n", report.run_id));
    section.push_str(&format!("- **Status:** {}\n", report.status));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Logs analysed:** {} ({} failed)\n\n",
        report.contributing.len(),
        report.failures.len()
    ));

    section
}

fn generate_degraded_notice(report: &WeeklyReport) -> String {
    let reason = report
        .synthesis_error
        .as_deref()
        .unwrap_or("synthesis did not complete");
    format!(
        "> **DEGRADED:** the weekly synthesis failed ({}). Daily highlights below are unsynthesized.\n\n",
        reason
    )
}

fn generate_goal_progress_section(progress: &BTreeMap<String, GoalProgress>) -> String {
    let mut section = String::from("## Goal Progress\n\n");

    if progress.is_empty() {
        section.push_str("No goal updates were reported this week.\n\n");
        return section;
    }

    section.push_str("| Goal | Title | Status | Notes | Source |\n");
    section.push_str("|:---|:---|:---:|:---|:---|\n");
    for p in progress.values() {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            p.goal_id,
            p.title.as_deref().unwrap_or("-"),
            p.status,
            table_cell(&p.notes),
            p.source.file_name()
        ));
    }
    section.push('\n');

    section
}

fn generate_highlights_section(report: &WeeklyReport) -> String {
    let mut section = String::from("## Daily Highlights\n\n");

    if report.highlights.is_empty() {
        section.push_str("No daily analyses are available for this week.\n\n");
        return section;
    }

    for h in &report.highlights {
        section.push_str(&format!(
            "### {} {} {}\n\n",
            h.status.emoji(),
            h.log.date.format("%a %Y-%m-%d"),
            h.log.file_name()
        ));
        if !h.summary.is_empty() {
            section.push_str(&format!("{}\n\n", h.summary));
        }
        for follow_up in &h.follow_ups {
            section.push_str(&format!("- Follow-up: {}\n", follow_up));
        }
        for risk in &h.risks {
            section.push_str(&format!("- Risk: {}\n", risk));
        }
        let tokens = h.usage.map(|u| u.total).unwrap_or(0);
        section.push_str(&format!(
            "- Tokens: {} | Request: `{}`\n\n",
            tokens,
            h.request_id.as_deref().unwrap_or("n/a")
        ));
    }

    section
}

fn generate_failures_section(report: &WeeklyReport) -> String {
    let mut section = String::from("## Partial Failures\n\n");

    if report.failures.is_empty() {
        section.push_str("None.\n\n");
        return section;
    }

    for f in &report.failures {
        section.push_str(&format!(
            "- `{}`: {} (attempts: {})\n",
            f.log.path, f.reason, f.attempts
        ));
    }
    section.push('\n');

    section
}

fn generate_metrics_section(report: &WeeklyReport) -> String {
    let mut section = String::from("## Metrics\n\n");

    section.push_str(&format!(
        "- Total tokens: {} (prompt {}, completion {})\n",
        report.token_usage.total, report.token_usage.prompt, report.token_usage.completion
    ));
    if let Some(usage) = report.synthesis_usage {
        section.push_str(&format!("- Synthesis tokens: {}\n", usage.total));
    }

    section
}

fn table_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Generate the partial-failure checklist (`week-NN-checklist.md`).
pub fn generate_checklist(report: &WeeklyReport) -> String {
    let all_clear = report.failures.is_empty() && report.status == ReportStatus::Complete;
    let mark = if all_clear { "x" } else { " " };

    let mut lines = vec![
        format!("# Weekly Review Checklist: {}", report.week_id),
        String::new(),
        "## Pipeline".to_string(),
        format!("- [{}] Every daily log validated and analysed", mark),
        format!(
            "- [{}] Weekly synthesis completed",
            if report.status == ReportStatus::Complete { "x" } else { " " }
        ),
        String::new(),
        "## Goal Progress".to_string(),
    ];

    if report.goal_progress.is_empty() {
        lines.push("- No goal updates detected.".to_string());
    } else {
        for p in report.goal_progress.values() {
            lines.push(format!("- {}: {}", p.goal_id, p.status));
        }
    }

    lines.push(String::new());
    lines.push("## Partial Failures".to_string());
    if report.failures.is_empty() {
        lines.push("- None detected.".to_string());
    } else {
        for f in &report.failures {
            lines.push(format!("- [ ] {}: {}", f.log.path, f.reason));
        }
    }

    lines.push(String::new());
    lines.push("## Action Items".to_string());
    lines.push("- Resolve any partial failures and re-run the week before merging.".to_string());

    lines.join("\n") + "\n"
}

/// Generate the human-readable summary stored beside a per-log artifact.
pub fn generate_log_summary(result: &AnalysisResult) -> String {
    let mut output = String::new();

    output.push_str("# Daily Analysis\n\n");
    output.push_str(&format!("- **Log:** {}\n", result.log.path));
    output.push_str(&format!(
        "- **Status:** {} {}\n",
        result.status.emoji(),
        result.status
    ));
    output.push_str(&format!("- **Run:** `{}`\n", result.run_id));
    output.push_str(&format!("- **Rule set:** {}\n", result.rule_set_version));
    output.push_str(&format!(
        "- **Request ID:** {}\n",
        result.request_id.as_deref().unwrap_or("n/a")
    ));
    if let Some(usage) = result.usage {
        output.push_str(&format!(
            "- **Tokens:** {} (prompt {}, completion {})\n",
            usage.total, usage.prompt, usage.completion
        ));
    }
    output.push('\n');

    if let Some(ref insight) = result.insight {
        output.push_str(&format!("## Summary\n\n{}\n\n", insight.summary));

        if !insight.goal_insights.is_empty() {
            output.push_str("## Goals\n\n");
            for g in &insight.goal_insights {
                output.push_str(&format!("- {}: {} ({})\n", g.goal_id, g.status, g.notes));
            }
            output.push('\n');
        }
        if !insight.follow_ups.is_empty() {
            output.push_str("## Follow-ups\n\n");
            for f in &insight.follow_ups {
                output.push_str(&format!("- {}\n", f));
            }
            output.push('\n');
        }
        if !insight.risks.is_empty() {
            output.push_str("## Risks\n\n");
            for r in &insight.risks {
                output.push_str(&format!("- {}\n", r));
            }
            output.push('\n');
        }
    }

    if let Some(ref error) = result.error {
        output.push_str(&format!("## Error\n\n{}\n\n", error));
    }

    output.push_str("## Steps\n\n");
    for (i, step) in result.steps.iter().enumerate() {
        output.push_str(&format!("{}. {}\n", i + 1, step));
    }

    output
}

/// Generate a JSON report.
pub fn generate_json_report(report: &WeeklyReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Paths of the written weekly outputs.
#[derive(Debug, Clone)]
pub struct WeeklyOutputs {
    pub markdown: PathBuf,
    pub checklist: PathBuf,
    pub json: PathBuf,
}

/// Write `week-NN.md`, `week-NN-checklist.md` and `weekly-report.json`.
///
/// Existing files for the same week are overwritten.
pub fn write_weekly_outputs(
    report: &WeeklyReport,
    weekly_dir: &Path,
    artifacts_dir: &Path,
) -> Result<WeeklyOutputs> {
    let slug = report.window.slug();
    let json_dir = artifacts_dir.join(&report.week_id);

    fs::create_dir_all(weekly_dir)
        .with_context(|| format!("Failed to create {}", weekly_dir.display()))?;
    fs::create_dir_all(&json_dir)
        .with_context(|| format!("Failed to create {}", json_dir.display()))?;

    let outputs = WeeklyOutputs {
        markdown: weekly_dir.join(format!("{}.md", slug)),
        checklist: weekly_dir.join(format!("{}-checklist.md", slug)),
        json: json_dir.join(WEEKLY_JSON),
    };

    fs::write(&outputs.markdown, generate_weekly_markdown(report))
        .with_context(|| format!("Failed to write {}", outputs.markdown.display()))?;
    fs::write(&outputs.checklist, generate_checklist(report))
        .with_context(|| format!("Failed to write {}", outputs.checklist.display()))?;
    fs::write(&outputs.json, generate_json_report(report)?)
        .with_context(|| format!("Failed to write {}", outputs.json.display()))?;

    info!("Wrote weekly report to {}", outputs.markdown.display());
    Ok(outputs)
}
