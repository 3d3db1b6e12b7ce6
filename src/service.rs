//! Job Service
//!
//! The operations exposed to callers: submit an archive, query status,
//! request an animation, issue a viewer token. Wires the session store,
//! staging manager, remote client and orchestrator together.
//!
//! Failures before a session exists (bad archive, staging I/O) are returned
//! to the submitter. Failures inside a run are only visible through `status`.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::animation::{build_prompt, sanitize_commands};
use crate::config::Config;
use crate::constants::storage::{HIERARCHY_FILE, PROPERTIES_FILE};
use crate::pipeline::{PipelineOrchestrator, RetentionSweeper};
use crate::remote::{AccessToken, RemoteStageClient, TokenScope};
use crate::staging::{self, StagingManager};
use crate::storage::{FileSessionStore, SharedSessionStore};
use crate::types::{
    CadError, CommandSequence, Result, Session, SessionPatch, SessionStatus, validate_job_id,
};

/// Accepted submission
#[derive(Debug)]
pub struct Submission {
    pub job_id: String,
    /// Background run; the session record is the source of truth for its outcome
    pub handle: JoinHandle<()>,
}

pub struct CadService {
    config: Config,
    store: SharedSessionStore,
    staging: Arc<StagingManager>,
    remote: RemoteStageClient,
    orchestrator: Arc<PipelineOrchestrator>,
}

impl CadService {
    pub fn new(config: Config, remote: RemoteStageClient) -> Self {
        let data_dir = config.storage.data_dir.clone();
        let store: SharedSessionStore = Arc::new(FileSessionStore::new(&data_dir));
        let staging = Arc::new(StagingManager::new(&data_dir, config.staging.clone()));
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            store.clone(),
            staging.clone(),
            remote.clone(),
        ));
        Self {
            config,
            store,
            staging,
            remote,
            orchestrator,
        }
    }

    /// Build the service with the HTTP adapters
    pub fn from_config(config: Config) -> Result<Self> {
        let remote = RemoteStageClient::from_config(&config)?;
        Ok(Self::new(config, remote))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stage an archive, create its session and launch the run.
    ///
    /// Returns as soon as the run is spawned.
    pub async fn submit(&self, archive: Vec<u8>) -> Result<Submission> {
        let job = self.staging.stage(archive).await?;

        if let Err(e) = self.store.update(&job.job_id, SessionPatch::new()).await {
            if let Err(cleanup) = staging::release(&job.job_dir).await {
                warn!("Failed to clean up {}: {}", job.job_dir.display(), cleanup);
            }
            return Err(e);
        }

        info!(job_id = %job.job_id, files = job.file_count, "Job submitted");
        let job_id = job.job_id.clone();
        let handle = self.orchestrator.spawn(job);
        Ok(Submission { job_id, handle })
    }

    /// Current session record
    pub async fn status(&self, job_id: &str) -> Result<Session> {
        validate_job_id(job_id)?;
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| CadError::SessionNotFound(job_id.to_string()))
    }

    /// Generate an animation script for a completed job
    pub async fn animate(&self, job_id: &str) -> Result<CommandSequence> {
        let session = self.status(job_id).await?;
        if session.status != SessionStatus::Completed {
            return Err(CadError::SessionNotReady {
                job_id: job_id.to_string(),
                status: session.status,
            });
        }

        let hierarchy = self.artifact(job_id, HIERARCHY_FILE).await?;
        let properties = self.artifact(job_id, PROPERTIES_FILE).await?;

        let prompt = build_prompt(&hierarchy, &properties);
        let raw = self.remote.generate(prompt.system, &prompt.user).await?;
        let commands = sanitize_commands(&raw)?;

        info!(job_id, commands = commands.len(), "Animation generated");
        Ok(commands)
    }

    /// Issue a read-only token for viewing a job's translated model
    pub async fn viewer_token(&self, job_id: &str) -> Result<AccessToken> {
        let session = self.status(job_id).await?;

        let window = chrono::Duration::from_std(self.config.retention.window())
            .unwrap_or(chrono::Duration::MAX);
        if session.idle_for(Utc::now()) > window {
            return Err(CadError::SessionExpired(job_id.to_string()));
        }

        self.remote.acquire_token(TokenScope::Viewer).await
    }

    /// Sweeper over this service's data directory
    pub fn sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::new(
            self.store.clone(),
            self.config.retention.window(),
            self.config.retention.sweep_interval(),
        )
    }

    /// Start the periodic sweeper; it stops when `shutdown` flips to true
    pub fn spawn_sweeper(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        Arc::new(self.sweeper()).spawn(shutdown)
    }

    async fn artifact(&self, job_id: &str, name: &str) -> Result<serde_json::Value> {
        self.store
            .read_artifact(job_id, name)
            .await?
            .ok_or_else(|| CadError::store_io(job_id, format!("artifact {} is missing", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::storage::SESSION_FILE;
    use crate::remote::testing::{FakeGeneration, FakeTranslation};
    use crate::remote::{PollPolicy, RetryPolicy};
    use crate::staging::tests::zip_bytes;
    use crate::types::new_job_id;
    use std::time::Duration;
    use tempfile::TempDir;

    const REPLY: &str = "```json\n{\"commands\": [\
        {\"target\": \"Housing:1\", \"dbId\": 2, \"action\": \"translate\", \"x\": 0, \"y\": 0, \"z\": 40},\
        {\"target\": \"Shaft:1\", \"dbId\": 3, \"action\": \"rotate\", \"axis\": [1, 0, 0], \"angle\": 180}\
    ]}\n```";

    fn service_with(dir: &TempDir, translation: FakeTranslation, reply: &str) -> CadService {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        let remote = RemoteStageClient::new(
            Arc::new(translation),
            Arc::new(FakeGeneration::replying(reply)),
            &config,
        )
        .with_retry(RetryPolicy {
            max_times: 1,
            min_delay: Duration::from_millis(1),
        })
        .with_poll_policies(
            PollPolicy::new(Duration::from_millis(2), Duration::from_millis(300)),
            PollPolicy::new(Duration::from_millis(2), Duration::from_millis(300)),
        );
        CadService::new(config, remote)
    }

    fn service(dir: &TempDir) -> CadService {
        service_with(dir, FakeTranslation::default(), REPLY)
    }

    fn gearbox() -> Vec<u8> {
        zip_bytes(&[
            ("Gearbox.iam", b"assembly"),
            ("parts/Housing.ipt", b"housing"),
            ("parts/Shaft.ipt", b"shaft"),
        ])
    }

    fn dir_entries(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_submit_to_animation() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        let submission = service.submit(gearbox()).await.unwrap();
        submission.handle.await.unwrap();

        let session = service.status(&submission.job_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.progress, 100);
        assert!(session.result.is_some());

        let commands = service.animate(&submission.job_id).await.unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].target, "Housing:1");
    }

    #[tokio::test]
    async fn test_rejected_archive_creates_no_session() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        assert!(matches!(
            service.submit(Vec::new()).await,
            Err(CadError::InvalidArchive(_))
        ));
        assert!(matches!(
            service.submit(b"not a zip at all".to_vec()).await,
            Err(CadError::InvalidArchive(_))
        ));
        assert_eq!(dir_entries(&dir), 0);
    }

    #[tokio::test]
    async fn test_archive_without_assembly_fails() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        let submission = service
            .submit(zip_bytes(&[("a.ipt", b"a"), ("b.ipt", b"b")]))
            .await
            .unwrap();
        submission.handle.await.unwrap();

        let session = service.status(&submission.job_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.error.unwrap().contains("no primary assembly"));
        assert!(!dir.path().join(&submission.job_id).join("upload").exists());
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        assert!(matches!(
            service.status(&new_job_id()).await,
            Err(CadError::SessionNotFound(_))
        ));
        assert!(matches!(
            service.status("../../etc").await,
            Err(CadError::InvalidJobId(_))
        ));
    }

    #[tokio::test]
    async fn test_animate_requires_completion() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let job_id = new_job_id();
        service
            .store
            .update(&job_id, SessionPatch::new().status(SessionStatus::Processing))
            .await
            .unwrap();

        match service.animate(&job_id).await {
            Err(CadError::SessionNotReady { status, .. }) => {
                assert_eq!(status, SessionStatus::Processing)
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_generation_surfaces() {
        let dir = TempDir::new().unwrap();
        let service = service_with(&dir, FakeTranslation::default(), "I cannot help with that.");

        let submission = service.submit(gearbox()).await.unwrap();
        submission.handle.await.unwrap();

        match service.animate(&submission.job_id).await {
            Err(CadError::MalformedGeneration { raw, .. }) => {
                assert_eq!(raw, "I cannot help with that.")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_viewer_token_checks_retention() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        let fresh = new_job_id();
        service.store.update(&fresh, SessionPatch::new()).await.unwrap();
        let token = service.viewer_token(&fresh).await.unwrap();
        assert!(token.secret().contains("viewables:read"));

        let stale = new_job_id();
        let mut session = Session::new(&stale);
        session.updated_at = Utc::now() - chrono::Duration::days(3);
        std::fs::create_dir_all(dir.path().join(&stale)).unwrap();
        std::fs::write(
            dir.path().join(&stale).join(SESSION_FILE),
            serde_json::to_vec(&session).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            service.viewer_token(&stale).await,
            Err(CadError::SessionExpired(_))
        ));
    }
}
