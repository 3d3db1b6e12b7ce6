//! Archive Staging
//!
//! Validates an uploaded zip archive, extracts it into a directory owned by a
//! freshly generated job id, and locates the root assembly inside it.
//!
//! ## Guarantees
//!
//! - Payloads are validated before any directory is created
//! - Entries with unsafe paths (absolute, `..`) reject the whole archive
//! - Concurrent jobs never share paths: everything lives under `<root>/<job-id>/`
//! - [`release`] is idempotent; [`StagingGuard`] removes the directory on drop
//!   if a run unwinds before releasing it

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::config::StagingConfig;
use crate::constants::storage::UPLOAD_DIR;
use crate::types::{CadError, Result, new_job_id};

/// Archive entries that are packaging noise rather than design files
const IGNORED_ENTRIES: &[&str] = &["__MACOSX", ".DS_Store", "Thumbs.db"];

/// A freshly staged job
#[derive(Debug, Clone)]
pub struct StagedJob {
    pub job_id: String,
    /// Directory owning everything for this job
    pub job_dir: PathBuf,
    /// Extracted archive contents
    pub working_dir: PathBuf,
    /// Number of files extracted
    pub file_count: usize,
}

/// One extracted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Absolute path on disk
    pub path: PathBuf,
    /// Path relative to the working directory, `/`-separated
    pub relative: String,
    pub size: u64,
}

impl StagedFile {
    /// Final path component
    pub fn file_name(&self) -> &str {
        self.relative.rsplit('/').next().unwrap_or(&self.relative)
    }
}

/// Archive validation summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub files: usize,
    pub uncompressed_bytes: u64,
}

/// Staging manager for per-job working directories
pub struct StagingManager {
    root: PathBuf,
    config: StagingConfig,
}

impl StagingManager {
    pub fn new(root: impl Into<PathBuf>, config: StagingConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Extensions recognized as a root assembly
    pub fn assembly_extensions(&self) -> &[String] {
        &self.config.assembly_extensions
    }

    /// Check that a payload is a non-empty, well-formed, safe archive.
    ///
    /// Touches nothing on disk.
    pub fn validate(&self, bytes: &[u8]) -> Result<ArchiveSummary> {
        if bytes.is_empty() {
            return Err(CadError::InvalidArchive("payload is empty".to_string()));
        }
        if bytes.len() as u64 > self.config.max_archive_bytes {
            return Err(CadError::InvalidArchive(format!(
                "payload of {} bytes exceeds limit of {} bytes",
                bytes.len(),
                self.config.max_archive_bytes
            )));
        }

        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| CadError::InvalidArchive(format!("not a zip archive: {}", e)))?;

        if archive.len() > self.config.max_entries {
            return Err(CadError::InvalidArchive(format!(
                "archive has {} entries, limit is {}",
                archive.len(),
                self.config.max_entries
            )));
        }

        let mut summary = ArchiveSummary {
            files: 0,
            uncompressed_bytes: 0,
        };
        for index in 0..archive.len() {
            let entry = archive
                .by_index_raw(index)
                .map_err(|e| CadError::InvalidArchive(format!("unreadable entry: {}", e)))?;
            let Some(name) = entry.enclosed_name() else {
                return Err(CadError::InvalidArchive(format!(
                    "entry '{}' has an unsafe path",
                    entry.name()
                )));
            };
            if entry.is_dir() || is_ignored(&name) {
                continue;
            }
            summary.files += 1;
            summary.uncompressed_bytes += entry.size();
        }

        if summary.files == 0 {
            return Err(CadError::InvalidArchive(
                "archive contains no files".to_string(),
            ));
        }
        if summary.uncompressed_bytes > self.config.max_uncompressed_bytes {
            return Err(CadError::InvalidArchive(format!(
                "archive expands to {} bytes, limit is {} bytes",
                summary.uncompressed_bytes, self.config.max_uncompressed_bytes
            )));
        }

        Ok(summary)
    }

    /// Validate and extract an archive into a new job directory
    pub async fn stage(&self, bytes: Vec<u8>) -> Result<StagedJob> {
        let summary = self.validate(&bytes)?;

        let job_id = new_job_id();
        let job_dir = self.root.join(&job_id);
        let working_dir = job_dir.join(UPLOAD_DIR);

        tokio::fs::create_dir_all(&working_dir)
            .await
            .map_err(|e| CadError::Staging(format!("cannot create working directory: {}", e)))?;

        let target = working_dir.clone();
        let budget = self.config.max_uncompressed_bytes;
        let extracted = tokio::task::spawn_blocking(move || extract_archive(&bytes, &target, budget))
            .await
            .map_err(|e| CadError::Staging(format!("extraction task failed: {}", e)))
            .and_then(|r| r);

        match extracted {
            Ok(file_count) => {
                info!(
                    job_id = %job_id,
                    files = file_count,
                    bytes = summary.uncompressed_bytes,
                    "Archive staged"
                );
                Ok(StagedJob {
                    job_id,
                    job_dir,
                    working_dir,
                    file_count,
                })
            }
            Err(e) => {
                if let Err(cleanup) = release(&job_dir).await {
                    warn!("Failed to clean up {}: {}", job_dir.display(), cleanup);
                }
                Err(e)
            }
        }
    }

    /// Find the root assembly in a staged tree.
    ///
    /// When several files carry an assembly extension the shallowest wins,
    /// ties broken by path order.
    pub async fn locate_primary_assembly(&self, working_dir: &Path) -> Result<Option<StagedFile>> {
        let files = self.list_files(working_dir).await?;
        let mut candidates: Vec<StagedFile> = files
            .into_iter()
            .filter(|f| self.is_assembly(&f.relative))
            .collect();

        candidates.sort_by(|a, b| {
            let depth = |f: &StagedFile| f.relative.matches('/').count();
            depth(a)
                .cmp(&depth(b))
                .then_with(|| a.relative.cmp(&b.relative))
        });

        if candidates.len() > 1 {
            debug!(
                "{} assembly candidates, choosing {}",
                candidates.len(),
                candidates[0].relative
            );
        }
        Ok(candidates.into_iter().next())
    }

    /// List every staged file, sorted by relative path
    pub async fn list_files(&self, working_dir: &Path) -> Result<Vec<StagedFile>> {
        let root = working_dir.to_path_buf();
        tokio::task::spawn_blocking(move || walk_files(&root))
            .await
            .map_err(|e| CadError::Staging(format!("directory walk failed: {}", e)))?
    }

    fn is_assembly(&self, relative: &str) -> bool {
        Path::new(relative)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.config
                    .assembly_extensions
                    .iter()
                    .any(|want| want.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
    }
}

fn is_ignored(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|s| IGNORED_ENTRIES.contains(&s) || s.starts_with("._"))
    })
}

/// Extract every non-ignored entry under `target`.
///
/// Declared entry sizes are not trusted: the bytes actually written are
/// counted against `budget`.
fn extract_archive(bytes: &[u8], target: &Path, budget: u64) -> Result<usize> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| CadError::Staging(format!("cannot reopen archive: {}", e)))?;

    let mut count = 0;
    let mut remaining = budget;
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| CadError::Staging(format!("cannot read entry {}: {}", index, e)))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(CadError::Staging(format!(
                "entry '{}' has an unsafe path",
                entry.name()
            )));
        };
        if is_ignored(&relative) {
            continue;
        }
        let extract_error =
            |e: std::io::Error| CadError::Staging(format!("cannot extract {}: {}", relative.display(), e));

        let out_path = target.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(extract_error)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(extract_error)?;
        }
        let mut out = std::fs::File::create(&out_path).map_err(extract_error)?;
        let written = std::io::copy(&mut entry.take(remaining.saturating_add(1)), &mut out)
            .map_err(extract_error)?;
        if written > remaining {
            return Err(CadError::Staging(format!(
                "archive expands beyond {} bytes",
                budget
            )));
        }
        remaining -= written;
        count += 1;
    }
    Ok(count)
}

fn walk_files(root: &Path) -> Result<Vec<StagedFile>> {
    if !root.is_dir() {
        return Err(CadError::Staging(format!(
            "working directory {} does not exist",
            root.display()
        )));
    }

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| CadError::Staging(format!("walk error: {}", e)))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path().to_path_buf();
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let relative = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(StagedFile {
            path,
            relative,
            size,
        });
    }
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// Recursively remove a path. Missing paths are not an error.
pub async fn release(path: &Path) -> Result<()> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let removed = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    match removed {
        Ok(()) => {
            debug!("Released {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Removes a staged directory when dropped unless disarmed.
///
/// Covers exits that skip the async [`release`] call: panics and task abort.
#[derive(Debug)]
pub struct StagingGuard {
    path: Option<PathBuf>,
}

impl StagingGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Release asynchronously and disarm. Failures are logged, never returned.
    pub async fn release(mut self) {
        if let Some(path) = self.path.take()
            && let Err(e) = release(&path).await
        {
            warn!("Failed to release {}: {}", path.display(), e);
        }
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => debug!("Released {} on unwind", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to release {} on unwind: {}", path.display(), e),
            }
        }
    }
}
