pub mod animation;
pub mod error;
pub mod progress;
pub mod session;

pub use animation::{AnimationAction, AnimationCommand, CommandSequence};
pub use error::{CadError, RemoteStageError, Result};
pub use progress::{ProgressEvent, ProgressSink};
pub use session::{
    Session, SessionPatch, SessionStatus, TranslationResult, new_job_id, validate_job_id,
};
