//! Retention Sweeper
//!
//! Periodically removes job directories whose session has been idle longer
//! than the retention window. `updated_at` is the only age signal, so a run
//! that is still progressing is never collected.
//!
//! | Record state | Age taken from              |
//! |--------------|-----------------------------|
//! | present      | `updated_at`                |
//! | missing      | directory modification time |
//! | corrupt      | always expired              |

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::staging;
use crate::storage::{RecordState, SharedSessionStore, StoredRecord};
use crate::types::Result;

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Job directories removed (or that would be, on a dry run)
    pub removed: Vec<String>,
    /// Directories kept because they are within the window
    pub retained: usize,
    /// Directories whose record could not be read; also counted in `removed`
    pub unreadable: Vec<String>,
    /// Directories that were expired but could not be removed
    pub failed: Vec<String>,
}

/// Background expiry of old session state
pub struct RetentionSweeper {
    store: SharedSessionStore,
    window: Duration,
    interval: Duration,
    dry_run: bool,
}

impl RetentionSweeper {
    pub fn new(store: SharedSessionStore, window: Duration, interval: Duration) -> Self {
        Self {
            store,
            window,
            interval,
            dry_run: false,
        }
    }

    /// Report what would be removed without touching anything
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// One pass against the current time
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// One pass, treating `now` as the current time
    #[instrument(skip(self), fields(dry_run = self.dry_run))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::MAX);
        let mut report = SweepReport::default();

        for record in self.store.scan().await? {
            if !is_expired(&record, now, window) {
                report.retained += 1;
                continue;
            }

            if let RecordState::Corrupt(reason) = &record.state {
                debug!(job_id = %record.job_id, "Unreadable record: {}", reason);
                report.unreadable.push(record.job_id.clone());
            }

            if self.dry_run {
                report.removed.push(record.job_id);
                continue;
            }

            match staging::release(&record.path).await {
                Ok(()) => {
                    self.store.evict(&record.job_id);
                    report.removed.push(record.job_id);
                }
                Err(e) => {
                    warn!("Failed to remove {}: {}", record.path.display(), e);
                    report.failed.push(record.job_id);
                }
            }
        }

        if !report.removed.is_empty() || !report.failed.is_empty() {
            info!(
                removed = report.removed.len(),
                retained = report.retained,
                failed = report.failed.len(),
                "Retention sweep finished"
            );
        }
        Ok(report)
    }

    /// Run on a fixed period until `shutdown` flips to true or its sender is dropped
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Retention sweeper stopping");
                            break;
                        }
                    }

                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            error!("Retention sweep failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}

fn is_expired(record: &StoredRecord, now: DateTime<Utc>, window: chrono::Duration) -> bool {
    match &record.state {
        RecordState::Present(session) => session.idle_for(now) > window,
        RecordState::Missing {
            modified: Some(modified),
        } => now - *modified > window,
        RecordState::Missing { modified: None } | RecordState::Corrupt(_) => true,
    }
}
