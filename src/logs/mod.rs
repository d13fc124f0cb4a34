//! Daily log discovery.
//!
//! Logs are markdown files named `YYYY-MM-DD.ddd.log.md` anywhere under
//! the logs directory. The date comes from the file name; files whose
//! name does not start with a date are ignored.

use crate::models::{RawLogEntry, Window};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const LOG_SUFFIX: &str = ".log.md";

/// Largest log file that will be loaded.
pub const MAX_LOG_SIZE: u64 = 256 * 1024;

/// A discovered log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    /// Path relative to the logs directory's parent, e.g. `daily-logs/2025-09-22.mon.log.md`.
    pub path: String,
    pub full_path: PathBuf,
    pub date: NaiveDate,
    pub size: u64,
}

/// Parse the date out of a log file name.
pub fn parse_log_date(file_name: &str) -> Option<NaiveDate> {
    if !file_name.ends_with(LOG_SUFFIX) {
        return None;
    }
    let prefix = file_name.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Scanner over a logs directory.
pub struct LogScanner {
    logs_dir: PathBuf,
}

impl LogScanner {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
        }
    }

    /// Display path for a log: relative to the logs directory's parent,
    /// so it keeps the directory name.
    fn display_path(&self, path: &Path) -> String {
        let base = self.logs_dir.parent().unwrap_or(&self.logs_dir);
        path.strip_prefix(base)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Every log file whose date falls in `window`, sorted by date then path.
    ///
    /// A missing logs directory yields no logs.
    pub fn discover(&self, window: &Window) -> Vec<LogFile> {
        if !self.logs_dir.exists() {
            warn!("Logs directory {} does not exist", self.logs_dir.display());
            return Vec::new();
        }

        let mut files: Vec<LogFile> = WalkDir::new(&self.logs_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let name = e.file_name().to_str()?;
                let date = parse_log_date(name)?;
                if !window.contains(date) {
                    return None;
                }
                let size = e.metadata().map(|m| m.len()).unwrap_or(0);
                Some(LogFile {
                    path: self.display_path(e.path()),
                    full_path: e.path().to_path_buf(),
                    date,
                    size,
                })
            })
            .collect();

        files.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.path.cmp(&b.path)));
        debug!("Discovered {} log(s) for {}", files.len(), window.week_id);
        files
    }

    /// Load the logs for `window` as raw entries.
    ///
    /// A log over [`MAX_LOG_SIZE`] is not read; it becomes an oversized
    /// placeholder that is rejected before analysis.
    pub fn load(&self, window: &Window) -> Result<Vec<RawLogEntry>> {
        self.discover(window)
            .into_iter()
            .map(|file| {
                if file.size > MAX_LOG_SIZE {
                    warn!("Log {} is {} bytes, over the {} byte limit", file.path, file.size, MAX_LOG_SIZE);
                    return Ok(RawLogEntry::oversized(file.path, file.date, file.size));
                }
                let content = fs::read_to_string(&file.full_path)
                    .with_context(|| format!("Failed to read log {}", file.full_path.display()))?;
                Ok(RawLogEntry::new(file.path, file.date, content))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{daily_log, date};
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_parse_log_date() {
        assert_eq!(parse_log_date("2025-09-22.mon.log.md"), Some(date(2025, 9, 22)));
        assert_eq!(parse_log_date("2025-09-22.log.md"), Some(date(2025, 9, 22)));
        assert_eq!(parse_log_date("2025-09-22.mon.md"), None);
        assert_eq!(parse_log_date("notes.log.md"), None);
        assert_eq!(parse_log_date("2025-13-01.mon.log.md"), None);
    }

    #[test]
    fn test_discover_filters_window() {
        let tmp = TempDir::new().unwrap();
        let logs = tmp.path().join("daily-logs");
        fs::create_dir_all(&logs).unwrap();
        write(&logs, "2025-09-23.tue.log.md", &daily_log(23, &["G-2025-W39-01"]));
        write(&logs, "2025-09-22.mon.log.md", &daily_log(22, &["G-2025-W39-01"]));
        write(&logs, "2025-09-28.sun.log.md", &daily_log(28, &["G-2025-W39-01"]));
        write(&logs, "2025-09-29.mon.log.md", &daily_log(29, &["G-2025-W40-01"]));
        write(&logs, "README.md", "# logs");

        let scanner = LogScanner::new(&logs);
        let window = Window::from_week_id("2025-W39").unwrap();
        let files = scanner.discover(&window);

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "daily-logs/2025-09-22.mon.log.md");
        assert_eq!(files[1].date, date(2025, 9, 23));
    }

    #[test]
    fn test_load_extracts_goal_refs() {
        let tmp = TempDir::new().unwrap();
        let logs = tmp.path().join("daily-logs");
        fs::create_dir_all(&logs).unwrap();
        write(&logs, "2025-09-24.wed.log.md", &daily_log(24, &["G-2025-W39-02", "G-2025-W39-01"]));

        let entries = LogScanner::new(&logs)
            .load(&Window::from_week_id("2025-W39").unwrap())
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].goal_refs, vec!["G-2025-W39-01", "G-2025-W39-02"]);
        assert_eq!(entries[0].weekday, chrono::Weekday::Wed);
    }

    #[test]
    fn test_oversized_log_loads_as_placeholder() {
        let tmp = TempDir::new().unwrap();
        let logs = tmp.path().join("daily-logs");
        fs::create_dir_all(&logs).unwrap();
        let big = "x".repeat(MAX_LOG_SIZE as usize + 1);
        write(&logs, "2025-09-25.thu.log.md", &big);
        write(&logs, "2025-09-22.mon.log.md", &daily_log(22, &["G-2025-W39-01"]));

        let entries = LogScanner::new(&logs)
            .load(&Window::from_week_id("2025-W39").unwrap())
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].oversized, None);
        assert_eq!(entries[1].log.path, "daily-logs/2025-09-25.thu.log.md");
        assert_eq!(entries[1].oversized, Some(MAX_LOG_SIZE + 1));
        assert!(entries[1].content.is_empty());
    }

    #[test]
    fn test_missing_dir_yields_nothing() {
        let scanner = LogScanner::new("/nonexistent/daily-logs");
        assert!(scanner
            .discover(&Window::from_week_id("2025-W39").unwrap())
            .is_empty());
    }
}
