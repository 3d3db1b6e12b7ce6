//! Animation Generation
//!
//! Prompt construction from stored artifacts and sanitization of the
//! generator's free-form reply into a [`CommandSequence`](crate::types::CommandSequence).

pub mod prompt;
pub mod sanitizer;

pub use prompt::{AnimationPrompt, SYSTEM_PROMPT, build_prompt};
pub use sanitizer::{sanitize_commands, strip_fence};
