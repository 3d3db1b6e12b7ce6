//! Unified Error Type System
//!
//! Centralized error types for the entire application.
//!
//! ## Taxonomy
//!
//! - **InvalidArchive**: bad or empty upload, rejected before a session exists
//! - **Staging**: extraction failure or no primary assembly in the staged tree
//! - **RemoteStage**: any remote-service call failure, tagged with its stage
//! - **PollTimeout**: a bounded wait ran out without a terminal outcome
//! - **StoreIo**: session record unreadable or unwritable
//! - **MalformedGeneration**: generated text not parseable into commands
//!
//! Pipeline-run failures are recorded into the session record; only failures
//! raised before the run starts ever reach the submitter.

use std::time::Duration;
use thiserror::Error;

use super::session::SessionStatus;
use crate::pipeline::Stage;

/// Maximum characters of raw generated text kept for diagnosis
const RAW_PREVIEW_CHARS: usize = 500;

// =============================================================================
// Remote Stage Error
// =============================================================================

/// Failure of a single remote-service call, scoped to the stage that issued it
#[derive(Debug, Clone)]
pub struct RemoteStageError {
    /// Stage that issued the failing call
    pub stage: Stage,
    /// HTTP status returned by the remote side, if the call got that far
    pub status: Option<u16>,
    /// Detected while issuing the call or reading its answer (unparseable
    /// response, unreadable file, final failure report); never retried
    pub local: bool,
    /// Detailed error message
    pub message: String,
}

impl std::fmt::Display for RemoteStageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} failed ({}): {}", self.stage, status, self.message),
            None => write!(f, "{} failed: {}", self.stage, self.message),
        }
    }
}

impl std::error::Error for RemoteStageError {}

impl RemoteStageError {
    /// Connectivity failure or deadline: no response was received
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            status: None,
            local: false,
            message: message.into(),
        }
    }

    pub fn with_status(stage: Stage, status: u16, message: impl Into<String>) -> Self {
        Self {
            stage,
            status: Some(status),
            local: false,
            message: message.into(),
        }
    }

    /// Failure raised locally while issuing the call or handling its response
    pub fn local(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            status: None,
            local: true,
            message: message.into(),
        }
    }

    /// Remote side reported the resource does not exist (yet)
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    /// Worth retrying on the same endpoint: server-side or connectivity trouble
    pub fn is_transient(&self) -> bool {
        match self.status {
            Some(status) => status == 429 || (500..=599).contains(&status),
            None => !self.local,
        }
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum CadError {
    // -------------------------------------------------------------------------
    // Submission Errors
    // -------------------------------------------------------------------------
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Staging error: {0}")]
    Staging(String),

    // -------------------------------------------------------------------------
    // Remote Errors
    // -------------------------------------------------------------------------
    #[error("{0}")]
    RemoteStage(RemoteStageError),

    #[error("Timed out after {waited:?} waiting on {stage}")]
    PollTimeout { stage: Stage, waited: Duration },

    // -------------------------------------------------------------------------
    // Session Errors
    // -------------------------------------------------------------------------
    #[error("Session store error for job {job_id}: {message}")]
    StoreIo { job_id: String, message: String },

    #[error("Job not found: {0}")]
    SessionNotFound(String),

    #[error("Job {job_id} is not ready (status: {status})")]
    SessionNotReady { job_id: String, status: SessionStatus },

    #[error("Job {0} is past its retention window")]
    SessionExpired(String),

    #[error("Invalid job identifier: {0}")]
    InvalidJobId(String),

    #[error("Job {job_id} failed: {error}")]
    JobFailed { job_id: String, error: String },

    // -------------------------------------------------------------------------
    // Generation Errors
    // -------------------------------------------------------------------------
    #[error("Malformed generation output: {reason}. Raw preview: {raw}")]
    MalformedGeneration { reason: String, raw: String },

    // -------------------------------------------------------------------------
    // System Errors
    // -------------------------------------------------------------------------
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<RemoteStageError> for CadError {
    fn from(err: RemoteStageError) -> Self {
        CadError::RemoteStage(err)
    }
}

pub type Result<T> = std::result::Result<T, CadError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl CadError {
    /// Create a store error for a job
    pub fn store_io(job_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::StoreIo {
            job_id: job_id.into(),
            message: message.to_string(),
        }
    }

    /// Create a remote stage error without an HTTP status
    pub fn remote(stage: Stage, message: impl Into<String>) -> Self {
        Self::RemoteStage(RemoteStageError::new(stage, message))
    }

    /// Create a non-retryable stage error for a locally detected failure
    pub fn local(stage: Stage, message: impl Into<String>) -> Self {
        Self::RemoteStage(RemoteStageError::local(stage, message))
    }

    /// Create a malformed generation error, keeping a bounded preview of the raw text
    pub fn malformed_generation(reason: impl Into<String>, raw: &str) -> Self {
        let mut preview: String = raw.chars().take(RAW_PREVIEW_CHARS).collect();
        if raw.chars().count() > RAW_PREVIEW_CHARS {
            preview.push_str("...");
        }
        Self::MalformedGeneration {
            reason: reason.into(),
            raw: preview,
        }
    }

    /// Scope an arbitrary failure to a stage.
    ///
    /// Remote and poll errors already carry their stage and pass through untouched.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            err @ (Self::RemoteStage(_) | Self::PollTimeout { .. }) => err,
            other => Self::local(stage, other.to_string()),
        }
    }

    /// Remote side reported "not found"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RemoteStage(err) if err.is_not_found())
    }

    /// Error is worth retrying against the same endpoint
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RemoteStage(err) if err.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_classification() {
        let not_found = RemoteStageError::with_status(Stage::AwaitTranslation, 404, "no manifest");
        assert!(not_found.is_not_found());
        assert!(!not_found.is_transient());

        let unavailable = RemoteStageError::with_status(Stage::Authenticate, 503, "busy");
        assert!(unavailable.is_transient());

        let network = RemoteStageError::new(Stage::Authenticate, "connection reset");
        assert!(network.is_transient());

        let bad_request = RemoteStageError::with_status(Stage::SubmitTranslation, 400, "bad");
        assert!(!bad_request.is_transient());

        let unparseable = CadError::local(Stage::FetchMetadata, "failed to parse response");
        assert!(!unparseable.is_transient());
        assert!(!unparseable.is_not_found());
    }

    #[test]
    fn test_display_carries_stage_name() {
        let err = CadError::remote(Stage::CreateStorage, "bucket rejected");
        let text = err.to_string();
        assert!(text.contains("storage"), "got: {}", text);
        assert!(text.contains("bucket rejected"));
    }

    #[test]
    fn test_in_stage_preserves_remote_errors() {
        let original = CadError::remote(Stage::Upload, "denied");
        match original.in_stage(Stage::FetchMetadata) {
            CadError::RemoteStage(err) => assert_eq!(err.stage, Stage::Upload),
            other => panic!("unexpected: {other:?}"),
        }

        let timeout = CadError::PollTimeout {
            stage: Stage::AwaitTranslation,
            waited: Duration::from_secs(1),
        };
        assert!(matches!(
            timeout.in_stage(Stage::FetchMetadata),
            CadError::PollTimeout { .. }
        ));
    }

    #[test]
    fn test_in_stage_wraps_other_errors() {
        let io = CadError::Io(std::io::Error::other("disk gone"));
        match io.in_stage(Stage::Upload) {
            CadError::RemoteStage(err) => {
                assert_eq!(err.stage, Stage::Upload);
                assert!(err.message.contains("disk gone"));
                assert!(!err.is_transient());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_generation_truncates_raw() {
        let raw = "x".repeat(2000);
        match CadError::malformed_generation("not json", &raw) {
            CadError::MalformedGeneration { raw, .. } => {
                assert_eq!(raw.len(), RAW_PREVIEW_CHARS + 3);
                assert!(raw.ends_with("..."));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
