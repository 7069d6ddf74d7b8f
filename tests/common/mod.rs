#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use parking_lot::Mutex;

use aura::ai::{Attachment, DocumentStore, GenerationGateway, Turn};
use aura::error::AuraError;
use aura::session::store::SessionStore;
use aura::session::SessionConfig;
use aura::{AppState, Backends};

/// What one `generate` call was handed.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub system: Option<String>,
    pub history: Vec<Turn>,
    pub attachment: Option<Attachment>,
}

/// Scripted gateway: pops queued replies, falls back to a canned one.
/// `Err(msg)` entries fail the call.
pub struct MockGateway {
    script: Mutex<VecDeque<Result<String, String>>>,
    fallback: Mutex<Result<String, String>>,
    calls: Mutex<Vec<Recorded>>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok("Sawa, tell me more.".into())),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Every call fails.
    pub fn failing() -> Arc<Self> {
        let g = Self::new();
        *g.fallback.lock() = Err("backend down".into());
        g
    }

    pub fn push_ok(&self, text: &str) {
        self.script.lock().push_back(Ok(text.into()));
    }

    pub fn push_err(&self, msg: &str) {
        self.script.lock().push_back(Err(msg.into()));
    }

    pub fn set_fallback(&self, reply: Result<&str, &str>) {
        *self.fallback.lock() = reply.map(str::to_string).map_err(str::to_string);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().clone()
    }

    pub fn last_call(&self) -> Option<Recorded> {
        self.calls.lock().last().cloned()
    }
}

#[async_trait]
impl GenerationGateway for MockGateway {
    async fn generate(
        &self,
        system: Option<&str>,
        history: &[Turn],
        attachment: Option<&Attachment>,
    ) -> Result<String, AuraError> {
        self.calls.lock().push(Recorded {
            system: system.map(str::to_string),
            history: history.to_vec(),
            attachment: attachment.cloned(),
        });
        let next = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone());
        next.map_err(AuraError::AiBackend)
    }
}

/// Document store that fails its first `fail_first` uploads.
pub struct MockStore {
    fail_first: u32,
    calls: AtomicU32,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Self::failing_first(0)
    }

    pub fn failing_first(n: u32) -> Arc<Self> {
        Arc::new(Self { fail_first: n, calls: AtomicU32::new(0) })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MockStore {
    async fn upload(&self, data: Bytes, mime_type: &str) -> Result<Attachment, AuraError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.fail_first {
            return Err(AuraError::DocumentStore(format!("upload attempt {n} refused")));
        }
        Ok(Attachment {
            uri: format!("files/mock-{}", data.len()),
            mime_type: mime_type.to_string(),
        })
    }
}

pub fn test_state(
    gateway: Option<Arc<MockGateway>>,
    store: Option<Arc<MockStore>>,
    api_key: Option<&str>,
) -> AppState {
    let pdb = aura::db::PersonaDB::open(":memory:").unwrap();
    let ai = gateway.map(|g| Backends {
        gateway: g,
        documents: store.unwrap_or_else(MockStore::new),
    });
    AppState {
        db: Arc::new(pdb),
        ai,
        sessions: SessionStore::new(),
        session_config: SessionConfig::default(),
        api_key: api_key.map(|s| s.to_string()),
        public_url: "http://aura.test".into(),
        started_at: std::time::Instant::now(),
    }
}
