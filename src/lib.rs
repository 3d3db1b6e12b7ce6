//! cadmotion - CAD Archive Translation and Animation
//!
//! Takes a zipped multi-file CAD assembly, pushes it through a remote model
//! translation service and keeps the resulting object hierarchy and
//! properties. A generative-text service then turns those into an ordered
//! disassembly animation script on demand.
//!
//! ## Core Features
//!
//! - **Staged Pipeline**: ordered remote stages with per-job progress records
//! - **Durable Sessions**: file-backed status records that survive restarts
//! - **Bounded Polling**: every remote wait has a budget and a terminal state
//! - **Retention**: idle job state is swept after a configurable window
//! - **Sanitized Generation**: free-form model replies become typed commands
//!
//! ## Quick Start
//!
//! ```ignore
//! use cadmotion::{CadService, ConfigLoader};
//!
//! let service = CadService::from_config(ConfigLoader::load()?)?;
//! let submission = service.submit(std::fs::read("gearbox.zip")?).await?;
//! submission.handle.await?;
//!
//! let session = service.status(&submission.job_id).await?;
//! let commands = service.animate(&submission.job_id).await?;
//! ```
//!
//! ## Modules
//!
//! - [`service`]: the caller-facing operations
//! - [`pipeline`]: run orchestration, stages and the retention sweeper
//! - [`remote`]: translation and generation service adapters, polling
//! - [`staging`]: archive validation and extraction
//! - [`storage`]: session records and artifacts
//! - [`animation`]: prompt construction and reply sanitization
//! - [`config`]: layered configuration

pub mod animation;
pub mod cli;
pub mod config;
pub mod constants;
pub mod pipeline;
pub mod remote;
pub mod service;
pub mod staging;
pub mod storage;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader};

// Error Types
pub use types::error::{CadError, RemoteStageError, Result};

// Data Model
pub use types::{
    AnimationAction, AnimationCommand, CommandSequence, Session, SessionStatus, TranslationResult,
};

// Service
pub use service::{CadService, Submission};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use pipeline::{PipelineOrchestrator, RetentionSweeper, Stage, SweepReport};
pub use staging::{StagedJob, StagingManager};
pub use storage::{FileSessionStore, SessionStore, SharedSessionStore};

// =============================================================================
// Remote Re-exports
// =============================================================================

pub use remote::{
    AccessToken, ApsTranslationService, GenerationService, OpenAiGenerationService,
    RemoteStageClient, TranslationService, poll_until_terminal,
};
