//! In-process fakes for the remote services

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{
    AccessToken, GenerationService, ModelView, PollState, TokenScope, TranslationService,
    UploadedObject,
};
use crate::pipeline::Stage;
use crate::types::{RemoteStageError, Result};

#[derive(Default)]
pub(crate) struct FakeTranslation {
    /// Token requests that fail with 503 before one succeeds
    pub token_failures: AtomicU32,
    /// Manifest reports this failure instead of succeeding
    pub translation_failure: Option<String>,
    /// Manifest polls that report pending before success
    pub pending_polls: u32,
    pub hierarchy_never_ready: bool,
    pub panic_on_upload: bool,
    /// Reject the call issued at this stage with a 400
    pub reject_stage: Option<Stage>,

    pub calls: Mutex<Vec<Stage>>,
    pub linked: Mutex<Vec<String>>,
    pub status_polls: AtomicU32,
}

impl FakeTranslation {
    fn record(&self, stage: Stage) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(stage);
        }
        if self.reject_stage == Some(stage) {
            return Err(RemoteStageError::with_status(stage, 400, "rejected by fake").into());
        }
        Ok(())
    }

    pub fn call_log(&self) -> Vec<Stage> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TranslationService for FakeTranslation {
    async fn acquire_token(&self, scope: TokenScope) -> Result<AccessToken> {
        let stage = match scope {
            TokenScope::Internal => Stage::Authenticate,
            TokenScope::Viewer => Stage::ViewerToken,
        };
        self.record(stage)?;
        let remaining = self.token_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.token_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RemoteStageError::with_status(stage, 503, "unavailable").into());
        }
        Ok(AccessToken::new(format!("token-{}", scope.scopes()), 3599))
    }

    async fn create_bucket(&self, _token: &AccessToken, _bucket_key: &str) -> Result<()> {
        self.record(Stage::CreateStorage)
    }

    async fn upload_file(
        &self,
        _token: &AccessToken,
        bucket_key: &str,
        object_key: &str,
        path: &Path,
    ) -> Result<UploadedObject> {
        if self.panic_on_upload {
            panic!("upload blew up");
        }
        self.record(Stage::Upload)?;
        assert!(path.exists(), "staged file must exist during upload");
        Ok(UploadedObject {
            object_key: object_key.to_string(),
            object_id: format!("urn:adsk.objects:os.object:{}/{}", bucket_key, object_key),
            relative_path: object_key.to_string(),
        })
    }

    async fn link_references(
        &self,
        _token: &AccessToken,
        _root: &UploadedObject,
        references: &[UploadedObject],
    ) -> Result<()> {
        self.record(Stage::LinkReferences)?;
        if let Ok(mut linked) = self.linked.lock() {
            linked.extend(references.iter().map(|r| r.relative_path.clone()));
        }
        Ok(())
    }

    async fn submit_translation(&self, _token: &AccessToken, _urn: &str) -> Result<()> {
        self.record(Stage::SubmitTranslation)
    }

    async fn translation_status(&self, _token: &AccessToken, _urn: &str) -> Result<PollState<()>> {
        self.record(Stage::AwaitTranslation)?;
        let polls = self.status_polls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.translation_failure {
            return Ok(PollState::Failed(reason.clone()));
        }
        if polls < self.pending_polls {
            let percent = ((polls + 1) * 100 / (self.pending_polls + 1)) as u8;
            return Ok(PollState::Pending {
                percent: Some(percent),
            });
        }
        Ok(PollState::Ready(()))
    }

    async fn fetch_metadata(&self, _token: &AccessToken, _urn: &str) -> Result<Vec<ModelView>> {
        self.record(Stage::FetchMetadata)?;
        Ok(vec![
            ModelView {
                guid: "guid-2d".to_string(),
                name: "Sheet".to_string(),
                role: "2d".to_string(),
            },
            ModelView {
                guid: "guid-3d".to_string(),
                name: "Assembly".to_string(),
                role: "3d".to_string(),
            },
        ])
    }

    async fn fetch_hierarchy(
        &self,
        _token: &AccessToken,
        _urn: &str,
        _guid: &str,
    ) -> Result<PollState<Value>> {
        self.record(Stage::FetchHierarchy)?;
        if self.hierarchy_never_ready {
            return Ok(PollState::Pending { percent: None });
        }
        Ok(PollState::Ready(json!({
            "data": {
                "type": "objects",
                "objects": [{
                    "objectid": 1,
                    "name": "Gearbox",
                    "objects": [
                        {"objectid": 2, "name": "Housing:1"},
                        {"objectid": 3, "name": "Shaft:1"}
                    ]
                }]
            }
        })))
    }

    async fn fetch_properties(
        &self,
        _token: &AccessToken,
        _urn: &str,
        _guid: &str,
    ) -> Result<PollState<Value>> {
        self.record(Stage::FetchProperties)?;
        Ok(PollState::Ready(json!({
            "data": {
                "type": "properties",
                "collection": [
                    {"objectid": 2, "name": "Housing:1", "properties": {"Material": "Aluminum"}},
                    {"objectid": 3, "name": "Shaft:1", "properties": {"Material": "Steel"}}
                ]
            }
        })))
    }
}

pub(crate) struct FakeGeneration {
    reply: String,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeGeneration {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl GenerationService for FakeGeneration {
    async fn generate(&self, _system: &str, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        Ok(self.reply.clone())
    }

    fn name(&self) -> &str {
        "fake"
    }

    fn model(&self) -> &str {
        "fake-model"
    }
}
