//! Remote Stage Client
//!
//! Capability-typed access to the two external services the pipeline drives:
//! a CAD translation service and a generative-text service.
//!
//! ## Layers
//!
//! - [`TranslationService`] / [`GenerationService`]: thin transport traits,
//!   one method per remote call, implemented by [`aps`] and [`openai`]
//! - [`RemoteStageClient`]: what the orchestrator talks to; applies per-call
//!   timeouts, transient retry, polling and stage-scoped error tagging
//!
//! ## Modules
//!
//! - `poll`: bounded Poll-Until-Terminal primitive
//! - `timeout`: per-call deadlines

pub mod aps;
pub mod openai;
pub mod poll;
pub mod timeout;

#[cfg(test)]
pub(crate) mod testing;

pub use aps::ApsTranslationService;
pub use openai::OpenAiGenerationService;
pub use poll::{PollPolicy, PollState, poll_until_terminal};
pub use timeout::with_timeout;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::FutureExt;
use futures::stream::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::network;
use crate::pipeline::Stage;
use crate::staging::StagedFile;
use crate::types::{CadError, ProgressEvent, ProgressSink, Result};

// =============================================================================
// Shared Types
// =============================================================================

/// Scope of an issued access token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScope {
    /// Read/write access used by the pipeline itself
    Internal,
    /// Read-only access for viewing translated output
    Viewer,
}

impl TokenScope {
    pub fn scopes(&self) -> &'static str {
        match self {
            Self::Internal => "data:read data:write data:create bucket:create bucket:read",
            Self::Viewer => "viewables:read",
        }
    }

    fn stage(&self) -> Stage {
        match self {
            Self::Internal => Stage::Authenticate,
            Self::Viewer => Stage::ViewerToken,
        }
    }
}

/// Bearer token issued by the translation service
#[derive(Clone)]
pub struct AccessToken {
    token: SecretString,
    /// Lifetime in seconds as reported by the issuer
    pub expires_in: u64,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_in,
        }
    }

    /// Raw token value, for request headers and explicit hand-off only
    pub fn secret(&self) -> &str {
        self.token.expose_secret()
    }
}

/// An uploaded object inside the job's storage bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub object_key: String,
    pub object_id: String,
    /// Path relative to the staged working directory, '/'-separated
    pub relative_path: String,
}

impl UploadedObject {
    /// Encoded source identifier used by the translation endpoints
    pub fn urn(&self) -> String {
        encode_urn(&self.object_id)
    }

    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }
}

/// Encode an object id into the URL-safe source identifier
pub fn encode_urn(object_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(object_id.as_bytes())
}

/// One viewable inside a translated model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelView {
    pub guid: String,
    pub name: String,
    pub role: String,
}

// =============================================================================
// Transport Traits
// =============================================================================

/// Calls against the CAD translation service.
///
/// Implementations report failures as stage-scoped `CadError::RemoteStage`
/// values, carrying the HTTP status where one was received.
#[async_trait]
pub trait TranslationService: Send + Sync {
    async fn acquire_token(&self, scope: TokenScope) -> Result<AccessToken>;

    /// Create a bucket; an already-existing bucket is not an error
    async fn create_bucket(&self, token: &AccessToken, bucket_key: &str) -> Result<()>;

    async fn upload_file(
        &self,
        token: &AccessToken,
        bucket_key: &str,
        object_key: &str,
        path: &Path,
    ) -> Result<UploadedObject>;

    /// Declare `references` as dependencies of the root design
    async fn link_references(
        &self,
        token: &AccessToken,
        root: &UploadedObject,
        references: &[UploadedObject],
    ) -> Result<()>;

    async fn submit_translation(&self, token: &AccessToken, urn: &str) -> Result<()>;

    async fn translation_status(&self, token: &AccessToken, urn: &str) -> Result<PollState<()>>;

    async fn fetch_metadata(&self, token: &AccessToken, urn: &str) -> Result<Vec<ModelView>>;

    async fn fetch_hierarchy(
        &self,
        token: &AccessToken,
        urn: &str,
        guid: &str,
    ) -> Result<PollState<Value>>;

    async fn fetch_properties(
        &self,
        token: &AccessToken,
        urn: &str,
        guid: &str,
    ) -> Result<PollState<Value>>;
}

/// Calls against the generative-text service
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Submit a prompt and return the raw generated text
    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;

    fn name(&self) -> &str;

    fn model(&self) -> &str;
}

pub type SharedTranslationService = Arc<dyn TranslationService>;
pub type SharedGenerationService = Arc<dyn GenerationService>;

// =============================================================================
// Remote Stage Client
// =============================================================================

/// Retry schedule for idempotent calls that failed transiently
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_times: usize,
    pub min_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_times: network::MAX_NETWORK_RETRIES,
            min_delay: Duration::from_millis(network::BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_times(self.max_times)
            .with_jitter()
    }
}

/// Stage-level facade over the translation and generation services
#[derive(Clone)]
pub struct RemoteStageClient {
    translation: SharedTranslationService,
    generation: SharedGenerationService,
    call_timeout: Duration,
    generation_timeout: Duration,
    translation_poll: PollPolicy,
    availability_poll: PollPolicy,
    bucket_prefix: String,
    retry: RetryPolicy,
}

impl RemoteStageClient {
    pub fn new(
        translation: SharedTranslationService,
        generation: SharedGenerationService,
        config: &Config,
    ) -> Self {
        Self {
            translation,
            generation,
            call_timeout: config.translation.timeout(),
            generation_timeout: config.generation.timeout(),
            translation_poll: PollPolicy::translation(&config.polling),
            availability_poll: PollPolicy::availability(&config.polling),
            bucket_prefix: config.translation.bucket_prefix.clone(),
            retry: RetryPolicy::default(),
        }
    }

    /// Build both HTTP adapters from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let translation = Arc::new(ApsTranslationService::new(&config.translation)?);
        let generation = Arc::new(OpenAiGenerationService::new(&config.generation)?);
        Ok(Self::new(translation, generation, config))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_policies(mut self, translation: PollPolicy, availability: PollPolicy) -> Self {
        self.translation_poll = translation;
        self.availability_poll = availability;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Issue a token, retrying transient failures
    pub async fn acquire_token(&self, scope: TokenScope) -> Result<AccessToken> {
        let stage = scope.stage();
        let attempt = move || async move {
            with_timeout(stage, self.call_timeout, self.translation.acquire_token(scope))
                .await
                .map_err(|e| e.in_stage(stage))
        };

        attempt
            .retry(self.retry.backoff())
            .when(CadError::is_transient)
            .notify(|err, delay| warn!(%stage, "Retrying in {:?}: {}", delay, err))
            .await
    }

    /// Derive a per-job bucket key and create the bucket
    pub async fn create_storage(&self, token: &AccessToken, job_id: &str) -> Result<String> {
        let bucket_key = bucket_key(&self.bucket_prefix, job_id);
        self.call(
            Stage::CreateStorage,
            self.translation.create_bucket(token, &bucket_key),
        )
        .await?;
        debug!("Created bucket {}", bucket_key);
        Ok(bucket_key)
    }

    /// Upload every staged file, a few at a time, reporting each completion.
    ///
    /// The first failed upload ends the set; uploads still in flight are dropped.
    pub async fn upload_file_set(
        &self,
        token: &AccessToken,
        bucket_key: &str,
        files: &[StagedFile],
        progress: &ProgressSink,
    ) -> Result<Vec<UploadedObject>> {
        let total = files.len();
        let mut uploaded = Vec::with_capacity(total);

        let uploads: Vec<_> = files
            .iter()
            .map(|file| {
                async move {
                    self.call(
                        Stage::Upload,
                        self.translation
                            .upload_file(token, bucket_key, &file.relative, &file.path),
                    )
                    .await
                }
                .boxed()
            })
            .collect();
        let mut stream =
            futures::stream::iter(uploads).buffer_unordered(network::UPLOAD_CONCURRENCY);

        while let Some(result) = stream.next().await {
            let object = result?;
            progress.emit(ProgressEvent::FileUploaded {
                completed: uploaded.len() + 1,
                total,
                file: object.relative_path.clone(),
            });
            uploaded.push(object);
        }

        uploaded.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        info!("Uploaded {} files to {}", total, bucket_key);
        Ok(uploaded)
    }

    pub async fn link_references(
        &self,
        token: &AccessToken,
        root: &UploadedObject,
        references: &[UploadedObject],
    ) -> Result<()> {
        if references.is_empty() {
            debug!("No references to link for {}", root.relative_path);
            return Ok(());
        }
        self.call(
            Stage::LinkReferences,
            self.translation.link_references(token, root, references),
        )
        .await
    }

    pub async fn submit_translation(&self, token: &AccessToken, urn: &str) -> Result<()> {
        self.call(
            Stage::SubmitTranslation,
            self.translation.submit_translation(token, urn),
        )
        .await
    }

    /// Wait for the translation job to reach a terminal state
    pub async fn await_translation(
        &self,
        token: &AccessToken,
        urn: &str,
        progress: &ProgressSink,
    ) -> Result<()> {
        let stage = Stage::AwaitTranslation;
        poll_until_terminal(stage, &self.translation_poll, progress, move || {
            self.call(stage, self.translation.translation_status(token, urn))
        })
        .await
    }

    /// Pick the model view to inspect: first 3D view, else the first view
    pub async fn fetch_metadata(&self, token: &AccessToken, urn: &str) -> Result<ModelView> {
        let views = self
            .call(Stage::FetchMetadata, self.translation.fetch_metadata(token, urn))
            .await?;

        let chosen = views
            .iter()
            .find(|view| view.role.eq_ignore_ascii_case("3d"))
            .or_else(|| views.first())
            .cloned();

        chosen.ok_or_else(|| CadError::local(Stage::FetchMetadata, "translated model has no views"))
    }

    pub async fn fetch_hierarchy(
        &self,
        token: &AccessToken,
        urn: &str,
        guid: &str,
        progress: &ProgressSink,
    ) -> Result<Value> {
        let stage = Stage::FetchHierarchy;
        poll_until_terminal(stage, &self.availability_poll, progress, move || {
            self.call(stage, self.translation.fetch_hierarchy(token, urn, guid))
        })
        .await
    }

    pub async fn fetch_properties(
        &self,
        token: &AccessToken,
        urn: &str,
        guid: &str,
        progress: &ProgressSink,
    ) -> Result<Value> {
        let stage = Stage::FetchProperties;
        poll_until_terminal(stage, &self.availability_poll, progress, move || {
            self.call(stage, self.translation.fetch_properties(token, urn, guid))
        })
        .await
    }

    /// Submit a generation prompt, retrying transient failures
    pub async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let stage = Stage::Generate;
        info!(
            "Generating with {} (model: {})",
            self.generation.name(),
            self.generation.model()
        );

        let attempt = move || async move {
            with_timeout(
                stage,
                self.generation_timeout,
                self.generation.generate(system, prompt),
            )
            .await
            .map_err(|e| e.in_stage(stage))
        };

        attempt
            .retry(self.retry.backoff())
            .when(CadError::is_transient)
            .notify(|err, delay| warn!(%stage, "Retrying in {:?}: {}", delay, err))
            .await
    }

    /// One bounded call, with any failure tagged to `stage`
    async fn call<T>(
        &self,
        stage: Stage,
        future: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        with_timeout(stage, self.call_timeout, future)
            .await
            .map_err(|e| e.in_stage(stage))
    }
}

/// Bucket keys allow only `[-_.a-z0-9]`, 3 to 128 characters
fn bucket_key(prefix: &str, job_id: &str) -> String {
    let sanitized: String = prefix
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
        .collect();
    let mut key = if sanitized.is_empty() {
        job_id.to_string()
    } else {
        format!("{}-{}", sanitized, job_id)
    };
    key.truncate(128);
    key
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeGeneration, FakeTranslation};
    use super::*;
    use std::sync::atomic::Ordering;

    fn client(translation: FakeTranslation, generation: FakeGeneration) -> RemoteStageClient {
        RemoteStageClient::new(Arc::new(translation), Arc::new(generation), &Config::default())
            .with_retry(RetryPolicy {
                max_times: 2,
                min_delay: Duration::from_millis(1),
            })
            .with_poll_policies(
                PollPolicy::new(Duration::from_millis(2), Duration::from_millis(300))
                    .with_not_found_grace(2),
                PollPolicy::new(Duration::from_millis(2), Duration::from_millis(300)),
            )
    }

    #[test]
    fn test_encode_urn_is_url_safe() {
        let urn = encode_urn("urn:adsk.objects:os.object:bucket/asm?.iam");
        assert!(!urn.contains('='));
        assert!(!urn.contains('+'));
        assert!(!urn.contains('/'));
    }

    #[test]
    fn test_bucket_key_sanitized() {
        let key = bucket_key("Cad Motion!", "0f8fad5b-d9cb-469f-a165-70867728950e");
        assert_eq!(key, "cadmotion-0f8fad5b-d9cb-469f-a165-70867728950e");
    }

    #[test]
    fn test_access_token_debug_redacted() {
        let token = AccessToken::new("eyJsecret", 3599);
        assert!(!format!("{:?}", token).contains("eyJsecret"));
        assert_eq!(token.secret(), "eyJsecret");
    }

    #[tokio::test]
    async fn test_token_retries_transient_failures() {
        let translation = FakeTranslation::default();
        translation.token_failures.store(2, Ordering::SeqCst);
        let client = client(translation, FakeGeneration::replying("[]"));

        let token = client.acquire_token(TokenScope::Internal).await.unwrap();
        assert!(!token.secret().is_empty());
    }

    #[tokio::test]
    async fn test_viewer_token_failure_tagged() {
        let translation = FakeTranslation::default();
        translation.token_failures.store(10, Ordering::SeqCst);
        let client = client(translation, FakeGeneration::replying("[]"));

        match client.acquire_token(TokenScope::Viewer).await {
            Err(CadError::RemoteStage(err)) => assert_eq!(err.stage, Stage::ViewerToken),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_translation_failure_is_remote_error() {
        let translation = FakeTranslation {
            translation_failure: Some("Unsupported file".to_string()),
            ..Default::default()
        };
        let client = client(translation, FakeGeneration::replying("[]"));
        let token = AccessToken::new("t", 60);

        let err = client
            .await_translation(&token, "urn", &ProgressSink::disconnected())
            .await
            .unwrap_err();
        match err {
            CadError::RemoteStage(err) => {
                assert_eq!(err.stage, Stage::AwaitTranslation);
                assert!(err.message.contains("Unsupported file"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hierarchy_never_ready_times_out() {
        let translation = FakeTranslation {
            hierarchy_never_ready: true,
            ..Default::default()
        };
        let client = client(translation, FakeGeneration::replying("[]"));
        let token = AccessToken::new("t", 60);

        let err = client
            .fetch_hierarchy(&token, "urn", "guid", &ProgressSink::disconnected())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CadError::PollTimeout {
                stage: Stage::FetchHierarchy,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_metadata_prefers_3d_view() {
        let client = client(FakeTranslation::default(), FakeGeneration::replying("[]"));
        let token = AccessToken::new("t", 60);
        let view = client.fetch_metadata(&token, "urn").await.unwrap();
        assert_eq!(view.role, "3d");
    }

    #[tokio::test]
    async fn test_upload_reports_each_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let files: Vec<StagedFile> = ["a.ipt", "b.ipt"]
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                std::fs::write(&path, b"part").unwrap();
                StagedFile {
                    path,
                    relative: name.to_string(),
                    size: 4,
                }
            })
            .collect();

        let client = client(FakeTranslation::default(), FakeGeneration::replying("[]"));
        let token = AccessToken::new("t", 60);
        let (sink, mut rx) = ProgressSink::channel();

        let uploaded = client
            .upload_file_set(&token, "bucket", &files, &sink)
            .await
            .unwrap();
        drop(sink);

        assert_eq!(uploaded.len(), 2);
        let mut completed = Vec::new();
        while let Some(event) = rx.recv().await {
            if let ProgressEvent::FileUploaded { completed: n, .. } = event {
                completed.push(n);
            }
        }
        assert_eq!(completed, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_generation_returns_raw_text() {
        let client = client(
            FakeTranslation::default(),
            FakeGeneration::replying("```json\n[]\n```"),
        );
        let text = client.generate("system", "prompt").await.unwrap();
        assert!(text.starts_with("```"));
    }
}
