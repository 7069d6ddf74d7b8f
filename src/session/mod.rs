//! Persona build session.
//!
//! intro Q&A → document upload → document Q&A → finalize → done, plus a
//! standalone chat phase for talking to an already finished persona.
//! A session is a plain value; the caller owns it and serializes access
//! (see `store`).

pub mod store;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::ai::{self, Attachment, DocumentStore, GenerationGateway, Turn};
use crate::error::AuraError;
use crate::prompts;
use crate::util::preview;

pub use crate::ai::Speaker;

const MB: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Intro,
    AwaitingDocument,
    DocumentQa,
    Finalizing,
    Done,
    StandaloneChat,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Intro => "intro",
            Phase::AwaitingDocument => "awaiting_document",
            Phase::DocumentQa => "document_qa",
            Phase::Finalizing => "finalizing",
            Phase::Done => "done",
            Phase::StandaloneChat => "standalone_chat",
        }
    }

    /// Position along the build path. Standalone chat sits outside it.
    fn rank(self) -> u8 {
        match self {
            Phase::Intro => 0,
            Phase::AwaitingDocument => 1,
            Phase::DocumentQa => 2,
            Phase::Finalizing => 3,
            Phase::Done => 4,
            Phase::StandaloneChat => 5,
        }
    }

    pub fn accepts_turns(self) -> bool {
        matches!(self, Phase::Intro | Phase::DocumentQa | Phase::StandaloneChat)
    }

    pub fn has_attachment(self) -> bool {
        matches!(self, Phase::DocumentQa | Phase::Finalizing | Phase::Done)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens when the final analysis comes back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalizePolicy {
    /// Stay in `Finalizing` with no artifact; `finalize` may be called again.
    #[default]
    Retry,
    /// Store the sentinel as the artifact and move on to `Done`.
    Degrade,
}

impl FromStr for FinalizePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(Self::Retry),
            "degrade" => Ok(Self::Degrade),
            other => Err(format!("unknown finalize policy '{other}' (expected retry or degrade)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Successful intro answers needed before asking for a document.
    pub intro_questions: u32,
    /// Answered document Q&A entries (user + assistant) before finalizing.
    pub qa_threshold: usize,
    pub max_upload_bytes: usize,
    pub finalize_policy: FinalizePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            intro_questions: 3,
            qa_threshold: 8,
            max_upload_bytes: 90 * MB,
            finalize_policy: FinalizePolicy::Retry,
        }
    }
}

/// A document as received from the client, before validation.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: axum::body::Bytes,
}

/// Resolve the MIME type to send to the document store.
/// Explicit content type first, then the `.txt`/`.docx` text fallback,
/// then a guess from the extension.
pub fn resolve_mime(file_name: &str, content_type: Option<&str>) -> Option<String> {
    if let Some(ct) = content_type {
        let essence = ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        if !essence.is_empty() && essence != "application/octet-stream" {
            return Some(essence);
        }
    }
    let ext = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)?;
    if matches!(ext.as_str(), "txt" | "docx") {
        return Some("text/plain".into());
    }
    mime_guess::from_ext(&ext).first().map(|m| m.essence_str().to_string())
}

/// Size and type checks. Runs before any call to the document store.
pub fn validate_upload(cfg: &SessionConfig, upload: &Upload) -> Result<String, AuraError> {
    if upload.data.is_empty() {
        return Err(AuraError::Validation("document is empty".into()));
    }
    if upload.data.len() > cfg.max_upload_bytes {
        return Err(AuraError::UploadTooLarge {
            size: upload.data.len(),
            limit: cfg.max_upload_bytes,
        });
    }
    resolve_mime(&upload.file_name, upload.content_type.as_deref())
        .ok_or_else(|| AuraError::UnsupportedDocument(upload.file_name.clone()))
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub failed: bool,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonaSession {
    phase: Phase,
    history: Vec<Turn>,
    system_prompt: String,
    attachment: Option<Attachment>,
    intro_question_count: u32,
    final_artifact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    published_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    share_link: Option<String>,
    #[serde(skip)]
    config: SessionConfig,
}

impl PersonaSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            phase: Phase::Intro,
            history: Vec::new(),
            system_prompt: prompts::INTRO_SYSTEM_PROMPT.into(),
            attachment: None,
            intro_question_count: 0,
            final_artifact: None,
            published_id: None,
            share_link: None,
            config,
        }
    }

    /// Chat directly with a finished persona, skipping the build flow.
    pub fn standalone(config: SessionConfig, persona_prompt: impl Into<String>) -> Self {
        Self {
            phase: Phase::StandaloneChat,
            system_prompt: persona_prompt.into(),
            ..Self::new(config)
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub fn intro_question_count(&self) -> u32 {
        self.intro_question_count
    }

    pub fn final_artifact(&self) -> Option<&str> {
        self.final_artifact.as_deref()
    }

    pub fn published_id(&self) -> Option<i64> {
        self.published_id
    }

    pub fn share_link(&self) -> Option<&str> {
        self.share_link.as_deref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// History entries that got a real answer (sentinels excluded).
    pub fn answered_len(&self) -> usize {
        self.history.iter().filter(|t| !t.failed).count()
    }

    /// Move forward to `next`, clearing the per-phase history.
    fn enter(&mut self, next: Phase, system_prompt: &str) {
        debug_assert!(next.rank() > self.phase.rank(), "{} -> {}", self.phase, next);
        info!(from = %self.phase, to = %next, "session phase change");
        self.phase = next;
        self.history.clear();
        self.system_prompt = system_prompt.into();
    }

    /// One user turn. Gateway failures never surface as errors: the user
    /// entry is rolled back, a sentinel reply is kept, the phase holds.
    pub async fn submit_turn(
        &mut self,
        gateway: &dyn GenerationGateway,
        text: &str,
    ) -> Result<TurnOutcome, AuraError> {
        if !self.phase.accepts_turns() {
            return Err(AuraError::InvalidPhase { op: "chat turn", phase: self.phase });
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(AuraError::MissingField("text"));
        }

        debug!(phase = %self.phase, text = %preview(text, 80), "user turn");
        self.history.push(Turn::user(text));
        let sent: Vec<Turn> = self.history.iter().filter(|t| !t.failed).cloned().collect();
        let attachment = self.attachment.clone();
        let result =
            ai::generate_text(gateway, Some(self.system_prompt.as_str()), &sent, attachment.as_ref())
                .await;

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, phase = %self.phase, "generation failed, rolling back user turn");
                self.history.pop();
                self.history.push(Turn::sentinel());
                return Ok(TurnOutcome {
                    reply: prompts::FAILURE_SENTINEL.into(),
                    failed: true,
                    phase: self.phase,
                    transition: None,
                });
            }
        };
        self.history.push(Turn::assistant(reply.clone()));

        let transition = self.after_answer(gateway).await;
        Ok(TurnOutcome { reply, failed: false, phase: self.phase, transition })
    }

    async fn after_answer(&mut self, gateway: &dyn GenerationGateway) -> Option<&'static str> {
        match self.phase {
            Phase::Intro => {
                self.intro_question_count += 1;
                if self.intro_question_count < self.config.intro_questions {
                    return None;
                }
                self.enter(Phase::AwaitingDocument, prompts::INTRO_SYSTEM_PROMPT);
                self.intro_question_count = 0;
                Some(prompts::TO_DOCUMENT_NOTICE)
            }
            Phase::DocumentQa => {
                if self.answered_len() < self.config.qa_threshold {
                    return None;
                }
                self.enter(Phase::Finalizing, prompts::FINALIZE_SYSTEM_PROMPT);
                match self.finalize(gateway).await {
                    Ok(_) => Some(prompts::DONE_NOTICE),
                    Err(e) => {
                        warn!(error = %e, "final analysis failed, session stays in finalizing");
                        Some(prompts::TO_FINALIZE_NOTICE)
                    }
                }
            }
            _ => None,
        }
    }

    /// Accept the business document. Legal only while awaiting one.
    pub async fn attach_document(
        &mut self,
        store: &dyn DocumentStore,
        upload: Upload,
    ) -> Result<&'static str, AuraError> {
        if self.phase != Phase::AwaitingDocument {
            return Err(AuraError::InvalidPhase { op: "document upload", phase: self.phase });
        }
        let mime = validate_upload(&self.config, &upload)?;
        let size = upload.data.len();
        let attachment = store.upload(upload.data, &mime).await?;
        info!(file = %upload.file_name, mime = %mime, bytes = size, "document attached");
        self.attachment = Some(attachment);
        self.enter(Phase::DocumentQa, prompts::DOCUMENT_QA_SYSTEM_PROMPT);
        Ok(prompts::DOCUMENT_READY_NOTICE)
    }

    /// Produce the final persona prompt. Memoized: once an artifact exists
    /// the gateway is never called again.
    pub async fn finalize(&mut self, gateway: &dyn GenerationGateway) -> Result<String, AuraError> {
        match self.phase {
            Phase::Finalizing | Phase::Done => {}
            phase => return Err(AuraError::InvalidPhase { op: "finalize", phase }),
        }
        if let Some(artifact) = &self.final_artifact {
            self.phase = Phase::Done;
            return Ok(artifact.clone());
        }

        let instruction = [Turn::user(prompts::FINAL_ANALYSIS_INSTRUCTION)];
        let attachment = self.attachment.clone();
        let artifact = match ai::generate_text(
            gateway,
            Some(self.system_prompt.as_str()),
            &instruction,
            attachment.as_ref(),
        )
        .await
        {
            Ok(text) => text,
            Err(e) => match self.config.finalize_policy {
                FinalizePolicy::Retry => return Err(e),
                FinalizePolicy::Degrade => {
                    warn!(error = %e, "final analysis failed, storing sentinel");
                    prompts::FAILURE_SENTINEL.to_string()
                }
            },
        };

        self.final_artifact = Some(artifact.clone());
        // Done keeps the history it inherits.
        info!(from = %self.phase, to = %Phase::Done, "session phase change");
        self.phase = Phase::Done;
        Ok(artifact)
    }

    /// Record a successful publish. Only the first call sticks.
    pub fn mark_published(&mut self, id: i64, share_link: String) {
        if self.published_id.is_none() {
            self.published_id = Some(id);
            self.share_link = Some(share_link);
        }
    }

    /// Back to a fresh intro, keeping only the configuration.
    pub fn reset(&mut self) {
        info!(from = %self.phase, "session reset");
        *self = Self::new(self.config.clone());
    }
}
