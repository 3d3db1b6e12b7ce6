//! Poll-Until-Terminal
//!
//! Bounded repeated checks for remote work that completes asynchronously:
//! translation jobs and hierarchy/property extraction. Every use site shares
//! one policy shape and differs only in its probe.
//!
//! ## Policy
//!
//! - `Ready` / `Failed` end the wait immediately
//! - "not found" during the first `not_found_grace` attempts counts as pending
//!   (the remote side may accept a job before its status becomes visible)
//! - a few consecutive transient failures are tolerated, then surfaced
//! - running out of budget yields [`CadError::PollTimeout`], never a remote error

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::PollingConfig;
use crate::constants::network::MAX_NETWORK_RETRIES;
use crate::pipeline::Stage;
use crate::types::{CadError, ProgressEvent, ProgressSink, Result};

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq)]
pub enum PollState<T> {
    /// Terminal success
    Ready(T),
    /// Terminal failure reported by the remote side
    Failed(String),
    /// Not yet ready, with an optional completion percentage
    Pending { percent: Option<u8> },
}

/// Polling parameters
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Delay between probes
    pub interval: Duration,
    /// Maximum wall-clock time for the whole wait
    pub budget: Duration,
    /// Early attempts where "not found" is treated as pending
    pub not_found_grace: u32,
    /// Consecutive transient failures tolerated before giving up
    pub transient_retries: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, budget: Duration) -> Self {
        Self {
            interval,
            budget,
            not_found_grace: 0,
            transient_retries: MAX_NETWORK_RETRIES as u32,
        }
    }

    pub fn with_not_found_grace(mut self, attempts: u32) -> Self {
        self.not_found_grace = attempts;
        self
    }

    pub fn with_transient_retries(mut self, retries: u32) -> Self {
        self.transient_retries = retries;
        self
    }

    /// Policy for waiting on translation completion
    pub fn translation(config: &PollingConfig) -> Self {
        Self::new(
            Duration::from_secs(config.interval_secs),
            Duration::from_secs(config.translation_budget_secs),
        )
        .with_not_found_grace(config.not_found_grace_attempts)
    }

    /// Policy for waiting on derived data that lags job completion
    pub fn availability(config: &PollingConfig) -> Self {
        Self::new(
            Duration::from_secs(config.interval_secs),
            Duration::from_secs(config.availability_budget_secs),
        )
        .with_not_found_grace(config.not_found_grace_attempts)
    }
}

/// Probe until a terminal outcome or budget exhaustion
pub async fn poll_until_terminal<T, F, Fut>(
    stage: Stage,
    policy: &PollPolicy,
    progress: &ProgressSink,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollState<T>>>,
{
    let started = Instant::now();

    let polling = async {
        let mut attempt: u32 = 0;
        let mut transient_streak: u32 = 0;

        loop {
            attempt += 1;
            match probe().await {
                Ok(PollState::Ready(value)) => {
                    debug!(%stage, attempt, "Poll reached ready");
                    return Ok(value);
                }
                Ok(PollState::Failed(message)) => {
                    return Err(CadError::local(stage, message));
                }
                Ok(PollState::Pending { percent }) => {
                    transient_streak = 0;
                    match percent {
                        Some(percent) => progress.emit(ProgressEvent::RemotePercent { percent }),
                        None => progress.emit(ProgressEvent::StillWaiting { attempt }),
                    }
                }
                Err(e) if e.is_not_found() && attempt <= policy.not_found_grace => {
                    debug!(%stage, attempt, "Not visible yet, treating as pending");
                    progress.emit(ProgressEvent::StillWaiting { attempt });
                }
                Err(e) if e.is_transient() && transient_streak < policy.transient_retries => {
                    transient_streak += 1;
                    warn!(%stage, attempt, "Transient poll failure: {}", e);
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(policy.interval).await;
        }
    };

    match tokio::time::timeout(policy.budget, polling).await {
        Ok(result) => result,
        Err(_) => Err(CadError::PollTimeout {
            stage,
            waited: started.elapsed(),
        }),
    }
}
