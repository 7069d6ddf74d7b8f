//! aura: business persona builder.
//! intro chat → document upload → document Q&A → final persona prompt.

use aura::ai::{GeminiConfig, RetryPolicy};
use aura::db::PersonaDB;
use aura::session::store::SessionStore;
use aura::session::{FinalizePolicy, SessionConfig};
use aura::{api, AppState, Backends, SharedDB};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aura", version, about = "Builds AI personas for small businesses")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5000", env = "AURA_PORT")]
    port: u16,

    /// SQLite database path
    #[arg(short, long, default_value = "aura.db", env = "AURA_DB")]
    db: String,

    /// Largest accepted business document, in megabytes
    #[arg(long, default_value = "90", env = "AURA_MAX_UPLOAD_MB")]
    max_upload_mb: usize,

    /// Intro answers collected before asking for the document
    #[arg(long, default_value = "3", env = "AURA_INTRO_QUESTIONS")]
    intro_questions: u32,

    /// Document Q&A entries (user + assistant) before the final analysis
    #[arg(long, default_value = "8", env = "AURA_QA_THRESHOLD")]
    qa_threshold: usize,

    /// What to do when the final analysis fails: retry or degrade
    #[arg(long, default_value = "retry", env = "AURA_FINALIZE_POLICY")]
    finalize_policy: FinalizePolicy,

    /// Base URL used in persona share links
    #[arg(long, env = "AURA_PUBLIC_URL")]
    public_url: Option<String>,

    /// Drop sessions idle for this many minutes (0 keeps them forever)
    #[arg(long, default_value = "120", env = "AURA_SESSION_TTL_MINS")]
    session_ttl_mins: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let pdb = PersonaDB::open(&args.db).expect("failed to open database");
    let shared: SharedDB = Arc::new(pdb);

    let ai = GeminiConfig::from_env().map(|cfg| {
        info!(model = %cfg.model, "gemini enabled");
        Backends::gemini(cfg, RetryPolicy::from_env())
    });
    if ai.is_none() {
        warn!("GEMINI_API_KEY not set, persona generation is disabled");
    }

    let api_key = std::env::var("AURA_API_KEY").ok().filter(|k| !k.is_empty());
    let auth_status = if api_key.is_some() { "enabled" } else { "disabled" };

    let session_config = SessionConfig {
        intro_questions: args.intro_questions.max(1),
        qa_threshold: args.qa_threshold.max(1),
        max_upload_bytes: args.max_upload_mb.saturating_mul(1024 * 1024),
        finalize_policy: args.finalize_policy,
    };
    let public_url = args
        .public_url
        .clone()
        .unwrap_or_else(|| format!("http://localhost:{}", args.port));

    let state = AppState {
        db: shared,
        ai,
        sessions: SessionStore::new(),
        session_config,
        api_key,
        public_url,
        started_at: std::time::Instant::now(),
    };

    let app = api::router(state.clone());

    if args.session_ttl_mins > 0 {
        let sessions = state.sessions.clone();
        let ttl = Duration::from_secs(args.session_ttl_mins.saturating_mul(60));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                let dropped = sessions.prune_idle(ttl);
                if dropped > 0 {
                    info!(dropped, remaining = sessions.len(), "pruned idle sessions");
                }
            }
        });
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        db = %args.db,
        ai = state.ai.is_some(),
        auth = auth_status,
        finalize_policy = ?state.session_config.finalize_policy,
        "aura starting"
    );

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    info!("shutting down");
}
