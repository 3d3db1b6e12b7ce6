//! Translation Pipeline
//!
//! Drives one staged job through the remote translation service and records
//! every transition in the session store.
//!
//! ## Stages
//!
//! ```text
//! Authenticate → CreateStorage → Upload → DetectAssembly → LinkReferences
//!      → SubmitTranslation → AwaitTranslation → FetchMetadata
//!      → FetchHierarchy → FetchProperties → completed (100%)
//! ```
//!
//! ## Guarantees
//!
//! - Stages run strictly in order; the first failure ends the run
//! - Progress is written at each stage start, for intermediate events and at
//!   each checkpoint, and never decreases
//! - A run ends `completed` (progress 100, result present) or `failed`
//!   (error present), exactly once
//! - The staged working directory is released on every exit path, including
//!   panics inside the run

pub mod stage;
pub mod sweeper;

pub use stage::Stage;
pub use sweeper::{RetentionSweeper, SweepReport};

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::constants::storage::{HIERARCHY_FILE, PROPERTIES_FILE};
use crate::remote::{RemoteStageClient, TokenScope, UploadedObject};
use crate::staging::{self, StagedJob, StagingGuard, StagingManager};
use crate::storage::SharedSessionStore;
use crate::types::{
    CadError, ProgressEvent, ProgressSink, Result, Session, SessionPatch, SessionStatus,
    TranslationResult,
};

// =============================================================================
// Progress Tracking
// =============================================================================

/// Writes progress for one run, clamping so it never goes backwards
struct ProgressTracker<'a> {
    store: &'a SharedSessionStore,
    job_id: &'a str,
    progress: u8,
}

impl<'a> ProgressTracker<'a> {
    fn new(store: &'a SharedSessionStore, job_id: &'a str) -> Self {
        Self {
            store,
            job_id,
            progress: 0,
        }
    }

    async fn write(&mut self, message: String, progress: Option<u8>) -> Result<()> {
        let mut patch = SessionPatch::new().message(message);
        if let Some(progress) = progress {
            self.progress = self.progress.max(progress);
            patch = patch.progress(self.progress);
        }
        self.store.update(self.job_id, patch).await.map(|_| ())
    }

    async fn start(&mut self) -> Result<()> {
        self.store
            .update(
                self.job_id,
                SessionPatch::new()
                    .status(SessionStatus::Processing)
                    .message("Processing")
                    .progress(0),
            )
            .await
            .map(|_| ())
    }

    async fn enter(&mut self, stage: Stage) -> Result<()> {
        self.write(stage.running_message().to_string(), None).await
    }

    /// Intermediate events are best-effort; a failed write never fails the stage
    async fn event(&mut self, stage: Stage, event: &ProgressEvent) {
        let progress = event.percent().map(|p| stage.scaled(p));
        if let Err(e) = self.write(event.describe(), progress).await {
            warn!(job_id = self.job_id, "Dropped progress update: {}", e);
        }
    }

    async fn checkpoint(&mut self, stage: Stage) -> Result<()> {
        let mut message = stage.name().to_string();
        if let Some(first) = message.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        self.write(format!("{} complete", message), Some(stage.checkpoint()))
            .await
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Pipeline orchestrator
///
/// One instance serves any number of concurrent runs; all per-run state
/// lives on the run's own stack.
pub struct PipelineOrchestrator {
    store: SharedSessionStore,
    staging: Arc<StagingManager>,
    remote: RemoteStageClient,
}

impl PipelineOrchestrator {
    pub fn new(
        store: SharedSessionStore,
        staging: Arc<StagingManager>,
        remote: RemoteStageClient,
    ) -> Self {
        Self {
            store,
            staging,
            remote,
        }
    }

    /// Launch a run in the background.
    ///
    /// The run executes in its own task so a panic is observed here through
    /// its `JoinHandle`; the session is then marked failed.
    pub fn spawn(self: &Arc<Self>, job: StagedJob) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let job_id = job.job_id.clone();
            let working_dir = job.working_dir.clone();
            let store = this.store.clone();

            let run = tokio::spawn(async move { this.run(&job).await });

            match run.await {
                Ok(Ok(session)) => {
                    debug!(job_id = %job_id, status = %session.status, "Run finished");
                }
                Ok(Err(e)) => {
                    error!(job_id = %job_id, "Run outcome could not be recorded: {}", e);
                }
                Err(join_error) => {
                    let reason = panic_message(join_error);
                    error!(job_id = %job_id, "Run aborted: {}", reason);

                    if let Err(e) = staging::release(&working_dir).await {
                        warn!("Failed to release {}: {}", working_dir.display(), e);
                    }
                    let patch = SessionPatch::failed(format!("internal error: {}", reason));
                    if let Err(e) = store.update(&job_id, patch).await {
                        error!(job_id = %job_id, "Failed to record aborted run: {}", e);
                    }
                }
            }
        })
    }

    /// Run the pipeline to a terminal state.
    ///
    /// Stage failures are recorded into the session, not returned. `Err` means
    /// the terminal state itself could not be written.
    #[instrument(skip(self, job), fields(job_id = %job.job_id))]
    pub async fn run(&self, job: &StagedJob) -> Result<Session> {
        let guard = StagingGuard::new(&job.working_dir);
        let mut tracker = ProgressTracker::new(&self.store, &job.job_id);

        let outcome = match tracker.start().await {
            Ok(()) => self.execute(job, &mut tracker).await,
            Err(e) => Err(e),
        };

        guard.release().await;

        let patch = match outcome {
            Ok(result) => {
                info!(urn = %result.urn, "Translation pipeline completed");
                SessionPatch::completed(result)
            }
            Err(e) => {
                warn!("Translation pipeline failed: {}", e);
                SessionPatch::failed(e.to_string())
            }
        };
        self.store.update(&job.job_id, patch).await
    }

    async fn execute(
        &self,
        job: &StagedJob,
        tracker: &mut ProgressTracker<'_>,
    ) -> Result<TranslationResult> {
        let job_id = job.job_id.as_str();
        let remote = &self.remote;

        let token = &Self::stage(
            tracker,
            Stage::Authenticate,
            remote.acquire_token(TokenScope::Internal),
        )
        .await?;

        let bucket_key = &Self::stage(
            tracker,
            Stage::CreateStorage,
            remote.create_storage(token, job_id),
        )
        .await?;

        let (sink, events) = ProgressSink::channel();
        let uploaded = &Self::tracked_stage(tracker, Stage::Upload, events, async move {
            let files = self.staging.list_files(&job.working_dir).await?;
            remote.upload_file_set(token, bucket_key, &files, &sink).await
        })
        .await?;

        let (root, references) = &Self::stage(
            tracker,
            Stage::DetectAssembly,
            self.detect_assembly(job, uploaded),
        )
        .await?;

        Self::stage(
            tracker,
            Stage::LinkReferences,
            remote.link_references(token, root, references),
        )
        .await?;

        let urn = &root.urn();
        Self::stage(
            tracker,
            Stage::SubmitTranslation,
            remote.submit_translation(token, urn),
        )
        .await?;

        let (sink, events) = ProgressSink::channel();
        Self::tracked_stage(tracker, Stage::AwaitTranslation, events, async move {
            remote.await_translation(token, urn, &sink).await
        })
        .await?;

        let view = &Self::stage(
            tracker,
            Stage::FetchMetadata,
            remote.fetch_metadata(token, urn),
        )
        .await?;

        let (sink, events) = ProgressSink::channel();
        Self::tracked_stage(tracker, Stage::FetchHierarchy, events, async move {
            let hierarchy = remote
                .fetch_hierarchy(token, urn, &view.guid, &sink)
                .await?;
            self.store
                .write_artifact(job_id, HIERARCHY_FILE, &hierarchy)
                .await
        })
        .await?;

        let (sink, events) = ProgressSink::channel();
        Self::tracked_stage(tracker, Stage::FetchProperties, events, async move {
            let properties = remote
                .fetch_properties(token, urn, &view.guid, &sink)
                .await?;
            self.store
                .write_artifact(job_id, PROPERTIES_FILE, &properties)
                .await
        })
        .await?;

        Ok(TranslationResult {
            bucket_key: bucket_key.clone(),
            urn: urn.clone(),
            root_filename: root.relative_path.clone(),
            model_guid: view.guid.clone(),
        })
    }

    /// Run a stage that reports no intermediate progress
    async fn stage<T>(
        tracker: &mut ProgressTracker<'_>,
        stage: Stage,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let (sink, events) = ProgressSink::channel();
        drop(sink);
        Self::tracked_stage(tracker, stage, events, work).await
    }

    /// Run one stage: announce it, fold its progress events into the session
    /// while it works, then write its checkpoint.
    ///
    /// `work` must own the sending half of `events`, so the drain ends once the
    /// work does and every report of stage N lands before stage N+1 starts.
    async fn tracked_stage<T>(
        tracker: &mut ProgressTracker<'_>,
        stage: Stage,
        mut events: UnboundedReceiver<ProgressEvent>,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tracker.enter(stage).await?;
        debug!(%stage, "Stage started");

        let drain = async {
            while let Some(event) = events.recv().await {
                tracker.event(stage, &event).await;
            }
        };
        let (result, ()) = tokio::join!(work, drain);

        let value = result?;
        tracker.checkpoint(stage).await?;
        Ok(value)
    }

    /// Pick the root assembly among the uploaded files; everything else is a
    /// reference of it.
    async fn detect_assembly(
        &self,
        job: &StagedJob,
        uploaded: &[UploadedObject],
    ) -> Result<(UploadedObject, Vec<UploadedObject>)> {
        let primary = self
            .staging
            .locate_primary_assembly(&job.working_dir)
            .await?
            .ok_or_else(|| {
                CadError::Staging(format!(
                    "no primary assembly found in archive (expected one of: {})",
                    self.staging.assembly_extensions().join(", ")
                ))
            })?;

        let (roots, references): (Vec<_>, Vec<_>) = uploaded
            .iter()
            .cloned()
            .partition(|object| object.relative_path == primary.relative);

        let root = roots.into_iter().next().ok_or_else(|| {
            CadError::Staging(format!("assembly {} was not uploaded", primary.relative))
        })?;

        info!(
            root = %root.relative_path,
            references = references.len(),
            "Primary assembly located"
        );
        Ok((root, references))
    }
}

fn panic_message(join_error: tokio::task::JoinError) -> String {
    if join_error.is_cancelled() {
        return "pipeline run was cancelled".to_string();
    }
    let payload = join_error.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map(|s| format!("pipeline run panicked: {}", s))
        .unwrap_or_else(|| "pipeline run panicked".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StagingConfig};
    use crate::remote::testing::{FakeGeneration, FakeTranslation};
    use crate::remote::{PollPolicy, RetryPolicy};
    use crate::staging::tests::zip_bytes;
    use crate::storage::FileSessionStore;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        store: SharedSessionStore,
        staging: Arc<StagingManager>,
        orchestrator: Arc<PipelineOrchestrator>,
        translation: Arc<FakeTranslation>,
    }

    fn harness(translation: FakeTranslation) -> Harness {
        let dir = TempDir::new().unwrap();
        let store: SharedSessionStore = Arc::new(FileSessionStore::new(dir.path()));
        let staging = Arc::new(StagingManager::new(dir.path(), StagingConfig::default()));
        let translation = Arc::new(translation);
        let remote = RemoteStageClient::new(
            translation.clone(),
            Arc::new(FakeGeneration::replying("[]")),
            &Config::default(),
        )
        .with_retry(RetryPolicy {
            max_times: 1,
            min_delay: Duration::from_millis(1),
        })
        .with_poll_policies(
            PollPolicy::new(Duration::from_millis(2), Duration::from_millis(300)),
            PollPolicy::new(Duration::from_millis(2), Duration::from_millis(100)),
        );
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            store.clone(),
            staging.clone(),
            remote,
        ));
        Harness {
            _dir: dir,
            store,
            staging,
            orchestrator,
            translation,
        }
    }

    fn gearbox() -> Vec<u8> {
        zip_bytes(&[
            ("Gearbox.iam", b"assembly"),
            ("parts/Housing.ipt", b"housing"),
            ("parts/Shaft.ipt", b"shaft"),
        ])
    }

    async fn submit(h: &Harness, archive: Vec<u8>) -> StagedJob {
        let job = h.staging.stage(archive).await.unwrap();
        h.store
            .update(&job.job_id, SessionPatch::new())
            .await
            .unwrap();
        job
    }

    #[tokio::test]
    async fn test_successful_run_completes() {
        let h = harness(FakeTranslation {
            pending_polls: 2,
            ..Default::default()
        });
        let job = submit(&h, gearbox()).await;

        let session = h.orchestrator.run(&job).await.unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.progress, 100);
        let result = session.result.unwrap();
        assert_eq!(result.root_filename, "Gearbox.iam");
        assert_eq!(result.model_guid, "guid-3d");
        assert!(session.error.is_none());
        assert!(!job.working_dir.exists());

        let hierarchy = h
            .store
            .read_artifact(&job.job_id, HIERARCHY_FILE)
            .await
            .unwrap();
        assert!(hierarchy.is_some());
        assert!(
            h.store
                .read_artifact(&job.job_id, PROPERTIES_FILE)
                .await
                .unwrap()
                .is_some()
        );

        let mut linked = h.translation.linked.lock().unwrap().clone();
        linked.sort();
        assert_eq!(linked, vec!["parts/Housing.ipt", "parts/Shaft.ipt"]);
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let h = harness(FakeTranslation::default());
        let job = submit(&h, gearbox()).await;
        h.orchestrator.run(&job).await.unwrap();

        let mut seen: Vec<Stage> = h.translation.call_log();
        seen.dedup();
        assert_eq!(
            seen,
            vec![
                Stage::Authenticate,
                Stage::CreateStorage,
                Stage::Upload,
                Stage::LinkReferences,
                Stage::SubmitTranslation,
                Stage::AwaitTranslation,
                Stage::FetchMetadata,
                Stage::FetchHierarchy,
                Stage::FetchProperties,
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_assembly_fails_and_releases() {
        let h = harness(FakeTranslation::default());
        let job = submit(
            &h,
            zip_bytes(&[("Housing.ipt", b"housing"), ("Shaft.ipt", b"shaft")]),
        )
        .await;

        let session = h.orchestrator.run(&job).await.unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        let error = session.error.unwrap();
        assert!(error.contains("no primary assembly"), "got: {}", error);
        assert!(session.result.is_none());
        assert!(session.progress < 100);
        assert!(!job.working_dir.exists());
        assert!(!h.translation.call_log().contains(&Stage::SubmitTranslation));
    }

    #[tokio::test]
    async fn test_remote_failure_names_stage() {
        let h = harness(FakeTranslation {
            reject_stage: Some(Stage::SubmitTranslation),
            ..Default::default()
        });
        let job = submit(&h, gearbox()).await;

        let session = h.orchestrator.run(&job).await.unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.error.unwrap().contains("translation submission"));
        assert_eq!(session.progress, Stage::LinkReferences.checkpoint());
        assert!(!h.translation.call_log().contains(&Stage::AwaitTranslation));
        assert!(!job.working_dir.exists());
    }

    #[tokio::test]
    async fn test_exhausted_availability_is_fatal() {
        let h = harness(FakeTranslation {
            hierarchy_never_ready: true,
            ..Default::default()
        });
        let job = submit(&h, gearbox()).await;

        let session = h.orchestrator.run(&job).await.unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.error.unwrap().contains("hierarchy retrieval"));
        assert!(!h.translation.call_log().contains(&Stage::FetchProperties));
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let h = harness(FakeTranslation {
            pending_polls: 5,
            ..Default::default()
        });
        let job = submit(&h, gearbox()).await;

        let store = h.store.clone();
        let job_id = job.job_id.clone();
        let observer = tokio::spawn(async move {
            let mut seen = Vec::new();
            loop {
                if let Ok(Some(session)) = store.get(&job_id).await {
                    seen.push(session.progress);
                    if session.status.is_terminal() {
                        return seen;
                    }
                }
                tokio::task::yield_now().await;
            }
        });

        h.orchestrator.run(&job).await.unwrap();
        let seen = observer.await.unwrap();

        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
        assert_eq!(seen.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_panicking_run_is_contained() {
        let h = harness(FakeTranslation {
            panic_on_upload: true,
            ..Default::default()
        });
        let job = submit(&h, gearbox()).await;
        let working_dir = job.working_dir.clone();
        let job_id = job.job_id.clone();

        h.orchestrator.spawn(job).await.unwrap();

        let session = h.store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.error.unwrap().contains("upload blew up"));
        assert!(!working_dir.exists());
    }

    #[tokio::test]
    async fn test_spawned_run_completes_in_background() {
        fn assert_send<T: Send>(_: &T) {}

        let h = harness(FakeTranslation::default());
        let job = submit(&h, gearbox()).await;
        let job_id = job.job_id.clone();

        let run = h.orchestrator.run(&job);
        assert_send(&run);
        drop(run);

        h.orchestrator.spawn(job).await.unwrap();

        let session = h.store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.progress, 100);
    }
}
