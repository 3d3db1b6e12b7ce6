//! Session Store
//!
//! Durable per-job session records, one directory per job:
//!
//! ```text
//! data_dir/
//! ├── <job-id>/
//! │   ├── session.json      # status record
//! │   ├── hierarchy.json    # artifacts written by the pipeline
//! │   ├── properties.json
//! │   └── upload/           # staged files, removed when the run ends
//! └── <job-id>/...
//! ```
//!
//! ## Concurrency
//!
//! Updates for one job are serialized through a per-job async mutex (FIFO, so
//! a later update can never be overwritten by an earlier one finishing last).
//! Different jobs hold different mutexes and never block each other.
//! Records are replaced by write-then-rename, so readers never see a torn file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::constants::storage::SESSION_FILE;
use crate::types::{CadError, Result, Session, SessionPatch, validate_job_id};

/// State of one job directory as seen by a scan
#[derive(Debug, Clone)]
pub enum RecordState {
    /// Record parsed
    Present(Session),
    /// Directory exists but holds no record yet
    Missing { modified: Option<DateTime<Utc>> },
    /// Record exists but could not be read or parsed
    Corrupt(String),
}

/// One job directory found by [`SessionStore::scan`]
#[derive(Debug, Clone)]
pub struct StoredRecord {
    /// Directory name (the job id, if well-formed)
    pub job_id: String,
    /// Job directory path
    pub path: PathBuf,
    pub state: RecordState,
}

/// Durable session record storage
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Merge `patch` over the existing record (or a fresh one) and persist it
    async fn update(&self, job_id: &str, patch: SessionPatch) -> Result<Session>;

    /// Read a record; `Ok(None)` when the job is unknown
    async fn get(&self, job_id: &str) -> Result<Option<Session>>;

    /// Directory owning everything stored for a job
    fn job_dir(&self, job_id: &str) -> Result<PathBuf>;

    /// Persist a JSON artifact beside the session record
    async fn write_artifact(&self, job_id: &str, name: &str, value: &Value) -> Result<()>;

    /// Read a JSON artifact; `Ok(None)` when it was never written
    async fn read_artifact(&self, job_id: &str, name: &str) -> Result<Option<Value>>;

    /// Enumerate every job directory
    async fn scan(&self) -> Result<Vec<StoredRecord>>;

    /// Drop in-memory bookkeeping for a job whose directory was removed
    fn evict(&self, job_id: &str);
}

pub type SharedSessionStore = Arc<dyn SessionStore>;

/// Filesystem-backed session store
pub struct FileSessionStore {
    root: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_for(&self, job_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn record_path(&self, job_id: &str) -> Result<PathBuf> {
        Ok(self.job_dir(job_id)?.join(SESSION_FILE))
    }

    fn artifact_path(&self, job_id: &str, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(CadError::store_io(job_id, format!("invalid artifact name '{}'", name)));
        }
        Ok(self.job_dir(job_id)?.join(name))
    }

    async fn read_record(&self, job_id: &str, path: &Path) -> Result<Option<Session>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| CadError::store_io(job_id, format!("corrupt session record: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CadError::store_io(job_id, e)),
        }
    }

    async fn write_atomic(&self, job_id: &str, path: &Path, content: &[u8]) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| CadError::store_io(job_id, "record path has no parent"))?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| CadError::store_io(job_id, e))?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("record");
        let tmp = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

        if let Err(e) = tokio::fs::write(&tmp, content).await {
            return Err(CadError::store_io(job_id, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CadError::store_io(job_id, e));
        }
        Ok(())
    }

    async fn inspect_dir(&self, job_id: String, path: PathBuf) -> StoredRecord {
        let record_path = path.join(SESSION_FILE);
        let state = match tokio::fs::read_to_string(&record_path).await {
            Ok(content) => match serde_json::from_str::<Session>(&content) {
                Ok(session) => RecordState::Present(session),
                Err(e) => RecordState::Corrupt(e.to_string()),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let modified = tokio::fs::metadata(&path)
                    .await
                    .and_then(|m| m.modified())
                    .ok()
                    .map(DateTime::<Utc>::from);
                RecordState::Missing { modified }
            }
            Err(e) => RecordState::Corrupt(e.to_string()),
        };
        StoredRecord {
            job_id,
            path,
            state,
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn update(&self, job_id: &str, patch: SessionPatch) -> Result<Session> {
        let path = self.record_path(job_id)?;
        let lock = self.lock_for(job_id);
        let _guard = lock.lock().await;

        let mut session = self
            .read_record(job_id, &path)
            .await?
            .unwrap_or_else(|| Session::new(job_id));
        session.apply(patch);

        let content = serde_json::to_vec_pretty(&session)?;
        self.write_atomic(job_id, &path, &content).await?;

        debug!(
            job_id,
            status = %session.status,
            progress = session.progress,
            "Session updated"
        );
        Ok(session)
    }

    async fn get(&self, job_id: &str) -> Result<Option<Session>> {
        let path = self.record_path(job_id)?;
        self.read_record(job_id, &path).await
    }

    fn job_dir(&self, job_id: &str) -> Result<PathBuf> {
        validate_job_id(job_id)?;
        Ok(self.root.join(job_id))
    }

    async fn write_artifact(&self, job_id: &str, name: &str, value: &Value) -> Result<()> {
        let path = self.artifact_path(job_id, name)?;
        let content = serde_json::to_vec(value)?;
        self.write_atomic(job_id, &path, &content).await
    }

    async fn read_artifact(&self, job_id: &str, name: &str) -> Result<Option<Value>> {
        let path = self.artifact_path(job_id, name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CadError::store_io(job_id, format!("corrupt artifact {}: {}", name, e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CadError::store_io(job_id, e)),
        }
    }

    async fn scan(&self) -> Result<Vec<StoredRecord>> {
        let mut records = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(CadError::store_io("*", e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CadError::store_io("*", e))?
        {
            let path = entry.path();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let job_id = entry.file_name().to_string_lossy().to_string();
            if validate_job_id(&job_id).is_err() {
                warn!("Foreign directory in session store: {}", path.display());
                records.push(StoredRecord {
                    job_id,
                    path,
                    state: RecordState::Corrupt("directory name is not a job id".to_string()),
                });
                continue;
            }
            records.push(self.inspect_dir(job_id, path).await);
        }

        Ok(records)
    }

    fn evict(&self, job_id: &str) {
        self.locks.remove(job_id);
    }
}
