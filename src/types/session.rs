//! Session Types
//!
//! Durable per-job status record and the partial updates merged into it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{CadError, Result};

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Queued,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    /// No further automatic transition happens from a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Queued => write!(f, "queued"),
            SessionStatus::Processing => write!(f, "processing"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Translation identifiers needed by later, on-demand operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    /// Storage bucket holding the uploaded files
    pub bucket_key: String,
    /// Encoded source identifier of the root assembly
    pub urn: String,
    /// Root assembly file name as uploaded
    pub root_filename: String,
    /// Model view the hierarchy/properties were read from
    pub model_guid: String,
}

/// Per-job status record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub job_id: String,
    pub status: SessionStatus,
    pub message: String,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TranslationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Fresh queued record
    pub fn new(job_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            status: SessionStatus::Queued,
            message: "Queued".to_string(),
            progress: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge a patch over this record and stamp `updated_at`.
    ///
    /// Fields absent from the patch are left untouched.
    pub fn apply(&mut self, patch: SessionPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(message) = patch.message {
            self.message = message;
        }
        if let Some(progress) = patch.progress {
            self.progress = progress.min(100);
        }
        if let Some(result) = patch.result {
            self.result = Some(result);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        self.updated_at = Utc::now();
    }

    /// Age since the last mutation
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.updated_at
    }
}

/// Partial update merged into a session record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub message: Option<String>,
    pub progress: Option<u8>,
    pub result: Option<TranslationResult>,
    pub error: Option<String>,
}

impl SessionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn result(mut self, result: TranslationResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Terminal success: progress 100 with result attached
    pub fn completed(result: TranslationResult) -> Self {
        Self::new()
            .status(SessionStatus::Completed)
            .message("Translation complete")
            .progress(100)
            .result(result)
    }

    /// Terminal failure with the triggering error recorded
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new()
            .status(SessionStatus::Failed)
            .message(format!("Failed: {}", error))
            .error(error)
    }
}

/// Generate a fresh, unguessable job identifier
pub fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}

/// Reject identifiers that are not canonical UUIDs.
///
/// Job ids become directory names, so anything else could escape the data root.
pub fn validate_job_id(job_id: &str) -> Result<()> {
    match Uuid::parse_str(job_id) {
        Ok(uuid) if uuid.hyphenated().to_string() == job_id => Ok(()),
        _ => Err(CadError::InvalidJobId(job_id.to_string())),
    }
}
