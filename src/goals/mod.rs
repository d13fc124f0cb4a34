//! Goal source loading and reference validation.
//!
//! Goals live either in a markdown table (`goals.md`) or a TOML file with
//! `[[goals]]` tables. The pipeline never mutates them.

use crate::error::GoalSourceError;
use crate::models::{Goal, GoalSet};
use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info};

/// Goal id format: `G-YYYY-Www-NN`.
static GOAL_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"G-\d{4}-W\d{2}-\d{2}").expect("valid goal id regex"));

/// Extract goal ids referenced in markdown, sorted and deduplicated.
pub fn extract_goal_ids(markdown: &str) -> Vec<String> {
    let mut ids: Vec<String> = GOAL_ID_PATTERN
        .find_iter(markdown)
        .map(|m| m.as_str().to_string())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Whether `id` is a complete, well-formed goal id.
pub fn is_goal_id(id: &str) -> bool {
    GOAL_ID_PATTERN
        .find(id)
        .is_some_and(|m| m.start() == 0 && m.end() == id.len())
}

#[derive(Debug, Deserialize)]
struct GoalFile {
    #[serde(default)]
    goals: Vec<Goal>,
}

/// Load the goal set from `path`.
///
/// A missing file, unparseable content or an empty set is fatal.
pub fn load_goals(path: &Path) -> Result<GoalSet, GoalSourceError> {
    debug!("Loading goals from {}", path.display());

    if !path.exists() {
        return Err(GoalSourceError::Missing(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| GoalSourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let goals = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => parse_toml_goals(&content).map_err(|message| GoalSourceError::Malformed {
            path: path.to_path_buf(),
            message,
        })?,
        _ => parse_markdown_goals(&content).map_err(|message| GoalSourceError::Malformed {
            path: path.to_path_buf(),
            message,
        })?,
    };

    if goals.is_empty() {
        return Err(GoalSourceError::NoGoals(path.to_path_buf()));
    }

    info!("Loaded {} goals from {}", goals.len(), path.display());
    Ok(goals)
}

fn parse_toml_goals(content: &str) -> Result<GoalSet, String> {
    let file: GoalFile = toml::from_str(content).map_err(|e| e.to_string())?;

    for goal in &file.goals {
        if !is_goal_id(&goal.id) {
            return Err(format!("invalid goal id '{}'", goal.id));
        }
    }

    Ok(GoalSet::new(file.goals))
}

/// Parse goal rows from a markdown table.
///
/// Columns: id, title, description, success metric, status, last updated.
/// Rows whose first cell is not a goal id (header, separator) are skipped.
fn parse_markdown_goals(content: &str) -> Result<GoalSet, String> {
    let mut goals = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if !line.starts_with('|') {
            continue;
        }

        let cells: Vec<&str> = line.trim_matches('|').split('|').map(str::trim).collect();
        let Some(id) = cells.first() else {
            continue;
        };
        if !is_goal_id(id) {
            continue;
        }

        let cell = |i: usize| cells.get(i).map(|c| c.to_string()).unwrap_or_default();

        let last_updated = match cells.get(5).filter(|c| !c.is_empty()) {
            Some(raw) => Some(NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
                format!("line {}: invalid last-updated date '{}': {}", line_no + 1, raw, e)
            })?),
            None => None,
        };

        goals.push(Goal {
            id: id.to_string(),
            title: cell(1),
            description: cell(2),
            success_metric: cell(3),
            status: cell(4),
            last_updated,
        });
    }

    Ok(GoalSet::new(goals))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GOALS_MD: &str = "\
# Goals

| Goal ID | Title | Description | Success Metric | Status | Last Updated |
|---------|-------|-------------|----------------|--------|--------------|
| G-2025-W39-01 | Ship prototype | First usable build | Demo recorded | active | 2025-09-20 |
| G-2025-W39-02 | Run daily | Exercise | 5 runs | active | |
";

    #[test]
    fn test_extract_goal_ids() {
        let text = "Worked on G-2025-W39-02 and G-2025-W39-01, then G-2025-W39-02 again. G-25-W1-1 is not one.";
        assert_eq!(extract_goal_ids(text), vec!["G-2025-W39-01", "G-2025-W39-02"]);
    }

    #[test]
    fn test_is_goal_id() {
        assert!(is_goal_id("G-2025-W39-01"));
        assert!(!is_goal_id("xG-2025-W39-01"));
        assert!(!is_goal_id("G-2025-W39-011"));
    }

    #[test]
    fn test_load_markdown_goals() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("goals.md");
        std::fs::write(&path, GOALS_MD).unwrap();

        let goals = load_goals(&path).unwrap();
        assert_eq!(goals.len(), 2);
        let goal = goals.get("G-2025-W39-01").unwrap();
        assert_eq!(goal.title, "Ship prototype");
        assert_eq!(goal.success_metric, "Demo recorded");
        assert_eq!(goal.last_updated, NaiveDate::from_ymd_opt(2025, 9, 20));
        assert_eq!(goals.get("G-2025-W39-02").unwrap().last_updated, None);
    }

    #[test]
    fn test_load_toml_goals() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("goals.toml");
        std::fs::write(
            &path,
            r#"
[[goals]]
id = "G-2025-W39-01"
title = "Ship prototype"
success_metric = "Demo recorded"
status = "active"
last_updated = "2025-09-20"
"#,
        )
        .unwrap();

        let goals = load_goals(&path).unwrap();
        assert!(goals.contains("G-2025-W39-01"));
    }

    #[test]
    fn test_missing_goal_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = load_goals(&dir.path().join("nope.md")).unwrap_err();
        assert!(matches!(err, GoalSourceError::Missing(_)));
    }

    #[test]
    fn test_empty_goal_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("goals.md");
        std::fs::write(&path, "# Goals\n\nNothing yet.\n").unwrap();
        assert!(matches!(load_goals(&path).unwrap_err(), GoalSourceError::NoGoals(_)));
    }

    #[test]
    fn test_malformed_goal_rows_are_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("goals.md");
        std::fs::write(&path, "| G-2025-W39-01 | T | D | M | active | yesterday |\n").unwrap();
        assert!(matches!(
            load_goals(&path).unwrap_err(),
            GoalSourceError::Malformed { .. }
        ));

        let toml_path = dir.path().join("goals.toml");
        std::fs::write(&toml_path, "[[goals]]\nid = \"bad\"\ntitle = \"x\"\n").unwrap();
        assert!(matches!(
            load_goals(&toml_path).unwrap_err(),
            GoalSourceError::Malformed { .. }
        ));
    }
}
