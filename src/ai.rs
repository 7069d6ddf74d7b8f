//! Generation gateway and document store.
//! Both are capability traits so the session machine never sees HTTP;
//! the Gemini implementations below are what the server wires in.

use async_trait::async_trait;
use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::AuraError;
use crate::util::truncate_chars;

fn ai_err(msg: impl Into<String>) -> AuraError {
    AuraError::AiBackend(msg.into())
}

fn store_err(msg: impl Into<String>) -> AuraError {
    AuraError::DocumentStore(msg.into())
}

const AI_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// One history entry. `failed` marks a sentinel reply standing in for a
/// generation that produced nothing; such entries are shown but never sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { speaker: Speaker::User, text: text.into(), failed: false }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { speaker: Speaker::Assistant, text: text.into(), failed: false }
    }

    pub fn sentinel() -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: crate::prompts::FAILURE_SENTINEL.into(),
            failed: true,
        }
    }
}

/// Opaque handle to an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub uri: String,
    pub mime_type: String,
}

#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Stateless: `history` is the whole conversation, oldest first.
    /// The attachment, if any, rides on the last user turn only.
    async fn generate(
        &self,
        system: Option<&str>,
        history: &[Turn],
        attachment: Option<&Attachment>,
    ) -> Result<String, AuraError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upload(&self, data: Bytes, mime_type: &str) -> Result<Attachment, AuraError>;
}

#[async_trait]
impl<S: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<S> {
    async fn upload(&self, data: Bytes, mime_type: &str) -> Result<Attachment, AuraError> {
        (**self).upload(data, mime_type).await
    }
}

/// Call the gateway and treat blank text as a failure.
pub async fn generate_text(
    gateway: &dyn GenerationGateway,
    system: Option<&str>,
    history: &[Turn],
    attachment: Option<&Attachment>,
) -> Result<String, AuraError> {
    let text = gateway.generate(system, history, attachment).await?;
    if text.trim().is_empty() {
        return Err(AuraError::EmptyGeneration);
    }
    Ok(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff: Duration::from_secs(1) }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let d = Self::default();
        let max_attempts = std::env::var("AURA_UPLOAD_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n: &u32| *n > 0)
            .unwrap_or(d.max_attempts);
        let backoff = std::env::var("AURA_UPLOAD_BACKOFF_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(d.backoff);
        Self { max_attempts, backoff }
    }
}

/// Wraps a store with a bounded, fixed-backoff retry.
pub struct RetryingDocumentStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: DocumentStore> RetryingDocumentStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for RetryingDocumentStore<S> {
    async fn upload(&self, data: Bytes, mime_type: &str) -> Result<Attachment, AuraError> {
        let max = self.policy.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.inner.upload(data.clone(), mime_type).await {
                Ok(a) => return Ok(a),
                Err(e) if attempts < max => {
                    warn!(error = %e, attempt = attempts, "document upload failed, retrying");
                    tokio::time::sleep(self.policy.backoff).await;
                }
                Err(e) => {
                    warn!(error = %e, attempts, "document upload failed, giving up");
                    return Err(e);
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f64,
    pub client: reqwest::Client,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, AuraError> {
        let client = reqwest::Client::builder()
            .timeout(AI_TIMEOUT)
            .build()
            .map_err(|e| AuraError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            temperature: 0.8,
            client,
        })
    }

    /// Returns `None` if neither `GEMINI_API_KEY` nor `AURA_GEMINI_KEY` is set.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("AURA_GEMINI_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .ok()
            .filter(|k| !k.is_empty())?;
        let base_url =
            std::env::var("AURA_GEMINI_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        let mut cfg = match Self::new(api_key, base_url) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "gemini client unavailable");
                return None;
            }
        };
        if let Ok(m) = std::env::var("AURA_GEMINI_MODEL") {
            cfg = cfg.with_model(m);
        }
        if let Some(t) = std::env::var("AURA_TEMPERATURE").ok().and_then(|v| v.parse().ok()) {
            cfg.temperature = t;
        }
        Some(cfg)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
enum Part {
    Text(String),
    FileData {
        #[serde(rename = "mimeType")]
        mime_type: String,
        #[serde(rename = "fileUri")]
        file_uri: String,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

/// Map history to Gemini `contents`. Sentinel turns are dropped and the
/// attachment is appended to the final user turn only.
pub(crate) fn build_contents(history: &[Turn], attachment: Option<&Attachment>) -> Vec<Content> {
    let mut contents: Vec<Content> = history
        .iter()
        .filter(|t| !t.failed)
        .map(|t| Content {
            role: match t.speaker {
                Speaker::User => "user",
                Speaker::Assistant => "model",
            },
            parts: vec![Part::Text(t.text.clone())],
        })
        .collect();
    if let Some(att) = attachment {
        if let Some(last_user) = contents.iter_mut().rev().find(|c| c.role == "user") {
            last_user.parts.push(Part::FileData {
                mime_type: att.mime_type.clone(),
                file_uri: att.uri.clone(),
            });
        }
    }
    contents
}

pub struct GeminiGateway {
    cfg: GeminiConfig,
}

impl GeminiGateway {
    pub fn new(cfg: GeminiConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl GenerationGateway for GeminiGateway {
    async fn generate(
        &self,
        system: Option<&str>,
        history: &[Turn],
        attachment: Option<&Attachment>,
    ) -> Result<String, AuraError> {
        let cfg = &self.cfg;
        let req = GenerateRequest {
            system_instruction: system
                .filter(|s| !s.is_empty())
                .map(|s| SystemInstruction { parts: vec![Part::Text(s.into())] }),
            contents: build_contents(history, attachment),
            generation_config: GenerationConfig { temperature: cfg.temperature },
        };
        let url = format!("{}/v1beta/models/{}:generateContent", cfg.base_url, cfg.model);

        let start = std::time::Instant::now();
        let resp = cfg
            .client
            .post(&url)
            .header("x-goog-api-key", &cfg.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| ai_err(format!("request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = truncate_chars(&resp.text().await.unwrap_or_default(), 500);
            return Err(ai_err(format!("gemini returned {status}: {body}")));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| ai_err(format!("response parse failed: {e}")))?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        debug!(
            model = %cfg.model,
            turns = history.len(),
            with_attachment = attachment.is_some(),
            duration_ms = start.elapsed().as_millis() as u64,
            "generation finished"
        );
        if text.trim().is_empty() {
            return Err(AuraError::EmptyGeneration);
        }
        Ok(text)
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
}

/// Gemini Files API, resumable protocol: one `start` call to obtain the
/// session URL, then a single `upload, finalize` call carrying the bytes.
pub struct GeminiFileStore {
    cfg: GeminiConfig,
}

impl GeminiFileStore {
    pub fn new(cfg: GeminiConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl DocumentStore for GeminiFileStore {
    async fn upload(&self, data: Bytes, mime_type: &str) -> Result<Attachment, AuraError> {
        let cfg = &self.cfg;
        let start_url = format!("{}/upload/v1beta/files", cfg.base_url);
        let len = data.len();

        let resp = cfg
            .client
            .post(&start_url)
            .header("x-goog-api-key", &cfg.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", len.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": "aura-document" } }))
            .send()
            .await
            .map_err(|e| store_err(format!("upload start failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = truncate_chars(&resp.text().await.unwrap_or_default(), 500);
            return Err(store_err(format!("upload start returned {status}: {body}")));
        }
        let session_url = resp
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| store_err("upload start response has no upload url"))?;

        let resp = cfg
            .client
            .post(&session_url)
            .header("x-goog-api-key", &cfg.api_key)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(data)
            .send()
            .await
            .map_err(|e| store_err(format!("upload failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = truncate_chars(&resp.text().await.unwrap_or_default(), 500);
            return Err(store_err(format!("upload returned {status}: {body}")));
        }
        let uploaded: UploadResponse = resp
            .json()
            .await
            .map_err(|e| store_err(format!("upload response parse failed: {e}")))?;

        debug!(bytes = len, uri = %uploaded.file.uri, "document uploaded");
        Ok(Attachment {
            uri: uploaded.file.uri,
            mime_type: uploaded.file.mime_type.unwrap_or_else(|| mime_type.to_string()),
        })
    }
}
