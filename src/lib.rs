pub mod ai;
pub mod api;
pub mod db;
pub mod error;
pub mod prompts;
pub mod session;
pub mod synth;
pub mod util;

use std::sync::Arc;

pub type SharedDB = Arc<db::PersonaDB>;

/// Run a blocking DB operation on tokio's blocking thread pool.
///
/// All synchronous PersonaDB calls in async context MUST go through this
/// to avoid starving tokio worker threads.
pub async fn db_call<F, T>(db: &SharedDB, f: F) -> Result<T, error::AuraError>
where
    F: FnOnce(&db::PersonaDB) -> T + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| error::AuraError::Internal(e.to_string()))
}

/// The external collaborators a running server talks to.
#[derive(Clone)]
pub struct Backends {
    pub gateway: Arc<dyn ai::GenerationGateway>,
    pub documents: Arc<dyn ai::DocumentStore>,
}

impl Backends {
    /// Gemini for both generation and document storage, uploads retried
    /// per `policy`.
    pub fn gemini(cfg: ai::GeminiConfig, policy: ai::RetryPolicy) -> Self {
        Self {
            gateway: Arc::new(ai::GeminiGateway::new(cfg.clone())),
            documents: Arc::new(ai::RetryingDocumentStore::new(
                ai::GeminiFileStore::new(cfg),
                policy,
            )),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDB,
    /// `None` when no generation backend is configured.
    pub ai: Option<Backends>,
    pub sessions: session::store::SessionStore,
    pub session_config: session::SessionConfig,
    pub api_key: Option<String>,
    pub public_url: String,
    pub started_at: std::time::Instant,
}

impl AppState {
    pub fn backends(&self) -> Result<&Backends, error::AuraError> {
        self.ai.as_ref().ok_or(error::AuraError::AiNotConfigured)
    }
}
