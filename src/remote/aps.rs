//! Autodesk Platform Services Adapter
//!
//! HTTP implementation of [`TranslationService`] over the OSS (object storage)
//! and Model Derivative endpoints. Credentials come from config or the
//! `APS_CLIENT_ID` / `APS_CLIENT_SECRET` environment variables.

use std::path::Path;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

use super::{AccessToken, ModelView, PollState, TokenScope, TranslationService, UploadedObject};
use crate::config::TranslationConfig;
use crate::pipeline::Stage;
use crate::types::{CadError, RemoteStageError, Result};

/// Translation service client with secure secret handling
pub struct ApsTranslationService {
    client_id: String,
    /// Client secret stored securely - never exposed in logs or debug output
    client_secret: SecretString,
    api_base: Url,
    output_format: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for ApsTranslationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApsTranslationService")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("api_base", &self.api_base.as_str())
            .field("output_format", &self.output_format)
            .finish()
    }
}

impl ApsTranslationService {
    pub fn new(config: &TranslationConfig) -> Result<Self> {
        let client_id = config
            .client_id
            .clone()
            .or_else(|| std::env::var("APS_CLIENT_ID").ok())
            .ok_or_else(|| {
                CadError::Config(
                    "Translation client id not found. Set APS_CLIENT_ID or translation.client_id"
                        .to_string(),
                )
            })?;

        let client_secret = config
            .client_secret
            .clone()
            .or_else(|| std::env::var("APS_CLIENT_SECRET").ok())
            .ok_or_else(|| {
                CadError::Config(
                    "Translation client secret not found. Set APS_CLIENT_SECRET or CADMOTION_TRANSLATION__CLIENT_SECRET"
                        .to_string(),
                )
            })?;

        let api_base = Url::parse(&config.api_base).map_err(|e| {
            CadError::Config(format!("Invalid translation api_base '{}': {}", config.api_base, e))
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| CadError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client_id,
            client_secret: SecretString::from(client_secret),
            api_base,
            output_format: config.output_format.clone(),
            client,
        })
    }

    /// Build an endpoint URL; each segment is percent-encoded individually
    fn endpoint(&self, stage: Stage, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| CadError::local(stage, "api_base cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn derivative_endpoint(&self, stage: Stage, urn: &str, tail: &[&str]) -> Result<Url> {
        let mut segments = vec!["modelderivative", "v2", "designdata", urn];
        segments.extend_from_slice(tail);
        self.endpoint(stage, &segments)
    }

    async fn send(stage: Stage, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| CadError::remote(stage, format!("request failed: {}", e)))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteStageError::with_status(stage, status.as_u16(), error_detail(&body, status)).into())
    }

    async fn json<T: serde::de::DeserializeOwned>(stage: Stage, response: reqwest::Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| CadError::local(stage, format!("failed to parse response: {}", e)))
    }

    /// Fetch a derived resource that answers 202 until it is ready
    async fn fetch_derived(
        &self,
        stage: Stage,
        token: &AccessToken,
        url: Url,
    ) -> Result<PollState<Value>> {
        let response = Self::send(
            stage,
            self.client
                .get(url)
                .query(&[("forceget", "true")])
                .bearer_auth(token.secret()),
        )
        .await?;

        if response.status() == reqwest::StatusCode::ACCEPTED {
            debug!(%stage, "Derived data still being prepared");
            return Ok(PollState::Pending { percent: None });
        }

        let body: Value = Self::json(stage, response).await?;
        Ok(derived_state(body))
    }
}

#[async_trait]
impl TranslationService for ApsTranslationService {
    async fn acquire_token(&self, scope: TokenScope) -> Result<AccessToken> {
        let stage = match scope {
            TokenScope::Internal => Stage::Authenticate,
            TokenScope::Viewer => Stage::ViewerToken,
        };
        let url = self.endpoint(stage, &["authentication", "v2", "token"])?;

        let response = Self::send(
            stage,
            self.client
                .post(url)
                .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
                .form(&[
                    ("grant_type", "client_credentials"),
                    ("scope", scope.scopes()),
                ]),
        )
        .await?;

        let body: TokenResponse = Self::json(stage, response).await?;
        Ok(AccessToken::new(body.access_token, body.expires_in))
    }

    async fn create_bucket(&self, token: &AccessToken, bucket_key: &str) -> Result<()> {
        let stage = Stage::CreateStorage;
        let url = self.endpoint(stage, &["oss", "v2", "buckets"])?;

        let result = Self::send(
            stage,
            self.client
                .post(url)
                .bearer_auth(token.secret())
                .json(&json!({ "bucketKey": bucket_key, "policyKey": "transient" })),
        )
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(CadError::RemoteStage(err)) if err.status == Some(409) => {
                debug!("Bucket {} already exists", bucket_key);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn upload_file(
        &self,
        token: &AccessToken,
        bucket_key: &str,
        object_key: &str,
        path: &Path,
    ) -> Result<UploadedObject> {
        let stage = Stage::Upload;
        let url = self.endpoint(
            stage,
            &["oss", "v2", "buckets", bucket_key, "objects", object_key, "signeds3upload"],
        )?;

        let response = Self::send(
            stage,
            self.client.get(url.clone()).bearer_auth(token.secret()),
        )
        .await?;
        let signed: SignedUpload = Self::json(stage, response).await?;
        let target = signed
            .urls
            .first()
            .ok_or_else(|| CadError::local(stage, "no signed upload URL returned"))?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CadError::local(stage, format!("cannot read {}: {}", path.display(), e)))?;
        debug!("Uploading {} ({} bytes)", object_key, bytes.len());

        Self::send(stage, self.client.put(target.as_str()).body(bytes)).await?;

        let response = Self::send(
            stage,
            self.client
                .post(url)
                .bearer_auth(token.secret())
                .json(&json!({ "uploadKey": signed.upload_key })),
        )
        .await?;
        let completed: CompletedUpload = Self::json(stage, response).await?;

        Ok(UploadedObject {
            object_key: completed.object_key,
            object_id: completed.object_id,
            relative_path: object_key.to_string(),
        })
    }

    async fn link_references(
        &self,
        token: &AccessToken,
        root: &UploadedObject,
        references: &[UploadedObject],
    ) -> Result<()> {
        let stage = Stage::LinkReferences;
        let root_urn = root.urn();
        let url = self.derivative_endpoint(stage, &root_urn, &["references"])?;

        let body = json!({
            "urn": root.object_id,
            "filename": root.file_name(),
            "references": references.iter().map(|r| json!({
                "urn": r.object_id,
                "relativePath": r.relative_path,
                "filename": r.file_name(),
            })).collect::<Vec<_>>(),
        });

        Self::send(
            stage,
            self.client.post(url).bearer_auth(token.secret()).json(&body),
        )
        .await?;
        info!("Linked {} references to {}", references.len(), root.relative_path);
        Ok(())
    }

    async fn submit_translation(&self, token: &AccessToken, urn: &str) -> Result<()> {
        let stage = Stage::SubmitTranslation;
        let url = self.endpoint(stage, &["modelderivative", "v2", "designdata", "job"])?;

        let body = json!({
            "input": { "urn": urn, "checkReferences": true },
            "output": {
                "formats": [{ "type": self.output_format, "views": ["2d", "3d"] }]
            }
        });

        Self::send(
            stage,
            self.client
                .post(url)
                .bearer_auth(token.secret())
                .header("x-ads-force", "true")
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn translation_status(&self, token: &AccessToken, urn: &str) -> Result<PollState<()>> {
        let stage = Stage::AwaitTranslation;
        let url = self.derivative_endpoint(stage, urn, &["manifest"])?;

        let response = Self::send(stage, self.client.get(url).bearer_auth(token.secret())).await?;
        let manifest: Value = Self::json(stage, response).await?;
        Ok(manifest_state(&manifest))
    }

    async fn fetch_metadata(&self, token: &AccessToken, urn: &str) -> Result<Vec<ModelView>> {
        let stage = Stage::FetchMetadata;
        let url = self.derivative_endpoint(stage, urn, &["metadata"])?;

        let response = Self::send(stage, self.client.get(url).bearer_auth(token.secret())).await?;
        let body: MetadataResponse = Self::json(stage, response).await?;

        Ok(body
            .data
            .metadata
            .into_iter()
            .map(|m| ModelView {
                guid: m.guid,
                name: m.name,
                role: m.role,
            })
            .collect())
    }

    async fn fetch_hierarchy(
        &self,
        token: &AccessToken,
        urn: &str,
        guid: &str,
    ) -> Result<PollState<Value>> {
        let stage = Stage::FetchHierarchy;
        let url = self.derivative_endpoint(stage, urn, &["metadata", guid])?;
        self.fetch_derived(stage, token, url).await
    }

    async fn fetch_properties(
        &self,
        token: &AccessToken,
        urn: &str,
        guid: &str,
    ) -> Result<PollState<Value>> {
        let stage = Stage::FetchProperties;
        let url = self.derivative_endpoint(stage, urn, &["metadata", guid, "properties"])?;
        self.fetch_derived(stage, token, url).await
    }
}

// =============================================================================
// Response Interpretation
// =============================================================================

/// Map a manifest document onto a poll outcome
fn manifest_state(manifest: &Value) -> PollState<()> {
    let status = manifest
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("pending");

    match status {
        "success" => PollState::Ready(()),
        "failed" | "timeout" => PollState::Failed(manifest_failure(manifest, status)),
        _ => PollState::Pending {
            percent: manifest
                .get("progress")
                .and_then(Value::as_str)
                .and_then(parse_progress),
        },
    }
}

/// Collect error messages nested in derivative entries
fn manifest_failure(manifest: &Value, status: &str) -> String {
    let mut messages = Vec::new();
    collect_messages(manifest, &mut messages);
    if messages.is_empty() {
        format!("translation {}", status)
    } else {
        format!("translation {}: {}", status, messages.join("; "))
    }
}

fn collect_messages(node: &Value, out: &mut Vec<String>) {
    match node {
        Value::Object(map) => {
            if let Some(Value::Array(messages)) = map.get("messages") {
                for message in messages {
                    let is_error = message.get("type").and_then(Value::as_str) == Some("error");
                    if is_error && let Some(text) = message.get("message").and_then(Value::as_str) {
                        out.push(text.to_string());
                    }
                }
            }
            if let Some(Value::Array(children)) = map.get("derivatives") {
                children.iter().for_each(|c| collect_messages(c, out));
            }
            if let Some(Value::Array(children)) = map.get("children") {
                children.iter().for_each(|c| collect_messages(c, out));
            }
        }
        Value::Array(items) => items.iter().for_each(|c| collect_messages(c, out)),
        _ => {}
    }
}

/// Parse "45% complete" style progress strings
fn parse_progress(text: &str) -> Option<u8> {
    if text.eq_ignore_ascii_case("complete") {
        return Some(100);
    }
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<u32>().ok().map(|p| p.min(100) as u8)
}

/// Derived endpoints may answer 200 with a "still processing" envelope
fn derived_state(body: Value) -> PollState<Value> {
    let processing = body
        .get("result")
        .and_then(Value::as_str)
        .is_some_and(|r| r.eq_ignore_ascii_case("success") && body.get("data").is_none());
    let empty = body.get("data").is_some_and(|d| {
        d.get("objects").is_none() && d.get("collection").is_none()
    });

    if processing || empty {
        PollState::Pending { percent: None }
    } else {
        PollState::Ready(body)
    }
}

fn error_detail(body: &str, status: reqwest::StatusCode) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["developerMessage", "diagnostic", "reason", "errorMessage", "message"]
                .iter()
                .find_map(|key| v.get(key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.canonical_reason().unwrap_or("request rejected").to_string()
            } else {
                body.chars().take(300).collect()
            }
        })
}

// Response types

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedUpload {
    upload_key: String,
    urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletedUpload {
    object_id: String,
    object_key: String,
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    data: MetadataData,
}

#[derive(Debug, Deserialize)]
struct MetadataData {
    #[serde(default)]
    metadata: Vec<MetadataEntry>,
}

#[derive(Debug, Deserialize)]
struct MetadataEntry {
    guid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    role: String,
}
