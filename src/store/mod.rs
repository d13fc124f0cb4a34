//! Insight store: one addressable artifact per analysed log.
//!
//! At most one result exists per `(log, rule set, run)` key; a second
//! `put` for the same key overwrites. Writes to the same key are
//! serialised by a per-key lock while reads and writes to other keys
//! proceed concurrently.
//!
//! With a root directory the store is durable: every result is written as
//! `<root>/<run id>/<flattened log path>.<rule set>.json` plus a sibling
//! `.md` summary, and existing artifacts are loaded on open.

use crate::error::StoreError;
use crate::models::{AnalysisResult, ArtifactKey, Window};
use crate::report;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Where a stored result lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub key: ArtifactKey,
    /// Path of the JSON artifact; `None` for an in-memory store.
    pub path: Option<PathBuf>,
}

pub struct InsightStore {
    root: Option<PathBuf>,
    results: RwLock<HashMap<ArtifactKey, AnalysisResult>>,
    key_locks: Mutex<HashMap<ArtifactKey, Arc<AsyncMutex<()>>>>,
}

impl InsightStore {
    /// A store that keeps results in memory only.
    pub fn in_memory() -> Self {
        Self {
            root: None,
            results: RwLock::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Open a durable store rooted at `root`, loading existing artifacts.
    ///
    /// Unreadable artifacts are skipped with a warning.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;

        let mut results = HashMap::new();
        for entry in WalkDir::new(&root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .filter(|e| e.file_name().to_str() != Some(report::WEEKLY_JSON))
        {
            match load_artifact(entry.path()) {
                Ok(result) => {
                    results.insert(result.key(), result);
                }
                Err(e) => warn!("Skipping unreadable artifact {}: {}", entry.path().display(), e),
            }
        }

        info!("Opened insight store at {} ({} artifacts)", root.display(), results.len());

        Ok(Self {
            root: Some(root),
            results: RwLock::new(results),
            key_locks: Mutex::new(HashMap::new()),
        })
    }

    fn key_lock(&self, key: &ArtifactKey) -> Arc<AsyncMutex<()>> {
        self.key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key.clone())
            .or_default()
            .clone()
    }

    fn artifact_path(&self, key: &ArtifactKey) -> Option<PathBuf> {
        // The whole log path keeps same-named logs from different directories apart
        let file_name = artifact_stem(&key.log_path);

        self.root.as_ref().map(|root| {
            root.join(&key.run_id)
                .join(format!("{}.{}.json", file_name, key.rule_set_version))
        })
    }

    /// Store a result, replacing any previous result for the same key.
    pub async fn put(&self, mut result: AnalysisResult) -> Result<ArtifactRef, StoreError> {
        let key = result.key();
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let path = self.artifact_path(&key);
        result.artifact = path.clone();

        if let Some(ref path) = path {
            write_artifact(path, &result)?;
        }

        debug!(log = %key.log_path, run = %key.run_id, status = %result.status, "Stored analysis result");
        self.results.write().await.insert(key.clone(), result);

        Ok(ArtifactRef { key, path })
    }

    /// The stored result for a key, if any.
    pub async fn find(&self, key: &ArtifactKey) -> Option<AnalysisResult> {
        self.results.read().await.get(key).cloned()
    }

    /// Every stored result whose log date falls in `window`, any status.
    ///
    /// Sorted by log date, then path.
    pub async fn get(&self, window: &Window) -> Vec<AnalysisResult> {
        let mut results: Vec<AnalysisResult> = self
            .results
            .read()
            .await
            .values()
            .filter(|r| window.contains(r.log.date))
            .cloned()
            .collect();

        results.sort_by(|a, b| a.log.cmp(&b.log).then_with(|| a.key().cmp(&b.key())));
        results
    }

    pub async fn len(&self) -> usize {
        self.results.read().await.len()
    }
}

/// Flatten a log path into a single file name.
fn artifact_stem(log_path: &str) -> String {
    log_path
        .trim_start_matches("./")
        .trim_start_matches(['/', '\\'])
        .replace(['/', '\\'], "__")
}

fn load_artifact(path: &Path) -> Result<AnalysisResult, StoreError> {
    let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| StoreError::Encode {
        path: path.to_path_buf(),
        source,
    })
}

/// Write the JSON artifact and its markdown summary atomically.
fn write_artifact(path: &Path, result: &AnalysisResult) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(result).map_err(|source| StoreError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, json.as_bytes())?;

    let summary_path = path.with_extension("md");
    let summary = report::generate_log_summary(result);
    write_atomic(&summary_path, summary.as_bytes())
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(content).map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
