//! Append-only usage ledger for cost auditing.
//!
//! Every endpoint attempt appends exactly one record, successful or not.
//! Records are never read back and modified, so concurrent writers only
//! need to serialise their appends.

use crate::error::LedgerError;
use crate::models::TokenUsage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

const CSV_COLUMNS: [&str; 9] = [
    "timestamp",
    "run_id",
    "subject",
    "attempt",
    "outcome",
    "request_id",
    "prompt_tokens",
    "completion_tokens",
    "total_tokens",
];

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    TransientError,
    Rejected,
    SchemaViolation,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Succeeded => write!(f, "succeeded"),
            AttemptOutcome::TransientError => write!(f, "transient_error"),
            AttemptOutcome::Rejected => write!(f, "rejected"),
            AttemptOutcome::SchemaViolation => write!(f, "schema_violation"),
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    /// Log path, or `weekly:<week id>` for synthesis.
    pub subject: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub request_id: Option<String>,
    /// Zero when the attempt produced no usage metrics.
    pub usage: TokenUsage,
}

impl UsageRecord {
    fn to_csv_row(&self) -> CsvRow {
        CsvRow {
            timestamp: self.timestamp.to_rfc3339(),
            run_id: self.run_id.clone(),
            subject: self.subject.clone(),
            attempt: self.attempt,
            outcome: self.outcome,
            request_id: self.request_id.clone(),
            prompt_tokens: self.usage.prompt,
            completion_tokens: self.usage.completion,
            total_tokens: self.usage.total,
        }
    }
}

/// Flat CSV form of a [`UsageRecord`], in `CSV_COLUMNS` order.
#[derive(Debug, Serialize)]
struct CsvRow {
    timestamp: String,
    run_id: String,
    subject: String,
    attempt: u32,
    outcome: AttemptOutcome,
    request_id: Option<String>,
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Append one record. Safe to call from concurrent tasks.
    async fn append(&self, record: UsageRecord) -> Result<(), LedgerError>;
}

/// Ledger kept in memory; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    records: Mutex<Vec<UsageRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records in append order.
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn records_for(&self, subject: &str) -> Vec<UsageRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.subject == subject)
            .collect()
    }
}

#[async_trait]
impl UsageLedger for InMemoryLedger {
    async fn append(&self, record: UsageRecord) -> Result<(), LedgerError> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
        Ok(())
    }
}

/// Durable ledger appending rows to a CSV file.
///
/// The header is written once, when the file is created. Appends run on
/// the blocking pool and are serialised by a shared lock, one flushed row
/// per record.
#[derive(Debug, Clone)]
pub struct CsvLedger {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl CsvLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_row(&self, row: &CsvRow) -> Result<(), LedgerError> {
        let io_err = |source: std::io::Error| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        let csv_err = |source: csv::Error| LedgerError::Csv {
            path: self.path.clone(),
            source,
        };

        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let needs_header = !self.path.exists();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer.write_record(CSV_COLUMNS).map_err(csv_err)?;
        }
        writer.serialize(row).map_err(csv_err)?;
        writer.flush().map_err(io_err)
    }
}

#[async_trait]
impl UsageLedger for CsvLedger {
    async fn append(&self, record: UsageRecord) -> Result<(), LedgerError> {
        debug!(subject = %record.subject, attempt = record.attempt, "Appending usage record");
        let row = record.to_csv_row();
        let ledger = self.clone();
        tokio::task::spawn_blocking(move || ledger.append_row(&row))
            .await
            .map_err(|e| LedgerError::Io {
                path: self.path.clone(),
                source: std::io::Error::other(e),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    fn record(subject: &str, attempt: u32, outcome: AttemptOutcome) -> UsageRecord {
        UsageRecord {
            timestamp: Utc::now(),
            run_id: "weekly-2025-W39".to_string(),
            subject: subject.to_string(),
            attempt,
            outcome,
            request_id: Some("resp_1".to_string()),
            usage: TokenUsage::new(10, 5, 15),
        }
    }

    #[tokio::test]
    async fn test_in_memory_ledger_keeps_order() {
        let ledger = InMemoryLedger::new();
        assert_ok!(ledger.append(record("a.md", 1, AttemptOutcome::TransientError)).await);
        assert_ok!(ledger.append(record("a.md", 2, AttemptOutcome::Succeeded)).await);
        assert_ok!(ledger.append(record("b.md", 1, AttemptOutcome::Succeeded)).await);

        let a = ledger.records_for("a.md");
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].attempt, 1);
        assert_eq!(a[1].outcome, AttemptOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_csv_ledger_writes_header_once() {
        let dir = TempDir::new().unwrap();
        let ledger = CsvLedger::new(dir.path().join("reports").join("usage.csv"));

        assert_ok!(ledger.append(record("a.md", 1, AttemptOutcome::Succeeded)).await);
        assert_ok!(ledger.append(record("b,odd.md", 1, AttemptOutcome::Rejected)).await);

        let content = std::fs::read_to_string(ledger.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_COLUMNS.join(","));
        assert!(lines[1].ends_with(",a.md,1,succeeded,resp_1,10,5,15"));
        assert!(lines[2].contains("\"b,odd.md\",1,rejected"));
    }

    #[tokio::test]
    async fn test_csv_ledger_quotes_fields_and_blanks_missing_request_id() {
        let dir = TempDir::new().unwrap();
        let ledger = CsvLedger::new(dir.path().join("usage.csv"));
        let mut rec = record("logs/\"odd\".md", 2, AttemptOutcome::TransientError);
        rec.request_id = None;
        rec.usage = TokenUsage::default();

        assert_ok!(ledger.append(rec).await);

        let content = std::fs::read_to_string(ledger.path()).unwrap();
        let row = content.lines().nth(1).unwrap();
        assert!(row.ends_with(",\"logs/\"\"odd\"\".md\",2,transient_error,,0,0,0"));

        let mut reader = csv::Reader::from_path(ledger.path()).unwrap();
        let parsed: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(parsed.len(), 1);
        assert_eq!(&parsed[0][2], "logs/\"odd\".md");
        assert_eq!(&parsed[0][5], "");
    }

    #[tokio::test]
    async fn test_csv_ledger_concurrent_appends() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(CsvLedger::new(dir.path().join("usage.csv")));

        let mut handles = Vec::new();
        for i in 0..20u32 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .append(record(&format!("log-{}.md", i), 1, AttemptOutcome::Succeeded))
                    .await
            }));
        }
        for handle in handles {
            assert_ok!(handle.await.unwrap());
        }

        let content = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(content.lines().count(), 21);
        let header = CSV_COLUMNS.join(",");
        assert_eq!(content.lines().filter(|l| *l == header).count(), 1);
    }
}
