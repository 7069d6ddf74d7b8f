use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use subtle::ConstantTimeEq;
use tower_http::limit::RequestBodyLimitLayer;

use crate::error::AuraError;
use crate::{db_call, AppState};

mod personas;
mod sessions;

use personas::*;
use sessions::*;

/// Headroom on top of the document ceiling so oversized uploads reach the
/// session's own size check and get a proper error instead of a bare 413.
const UPLOAD_HEADROOM: usize = 1024 * 1024;

const JSON_BODY_LIMIT: usize = 64 * 1024;

/// Auth middleware: checks Bearer token if AURA_API_KEY is configured.
async fn require_auth(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuraError> {
    let Some(ref expected) = state.api_key else {
        return Ok(next.run(req).await);
    };

    let unauthorized = || AuraError::Unauthorized;

    let header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or_else(unauthorized)?;

    // constant-time comparison to prevent timing attacks
    if token.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(next.run(req).await)
    } else {
        Err(unauthorized())
    }
}

/// Body limit rejections come back as plain text; give them the same JSON
/// shape as every other error. Our own JSON 413s pass through.
async fn json_body_limit(State(limit): State<usize>, resp: Response) -> Response {
    let is_json = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if resp.status() != StatusCode::PAYLOAD_TOO_LARGE || is_json {
        return resp;
    }
    AuraError::BodyTooLarge { limit }.into_response()
}

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/", get(index))
        .route("/health", get(health_only));

    let protected = Router::new()
        .route("/personas", post(create_persona).get(list_personas))
        .route("/personas/{id}", get(get_persona))
        .route("/personas/{id}/chat", post(chat_persona))
        .route("/sessions", post(create_session))
        .route("/sessions/standalone", post(create_standalone_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/turns", post(session_turn))
        .route("/sessions/{id}/finalize", post(session_finalize))
        .route("/sessions/{id}/publish", post(session_publish))
        .route("/sessions/{id}/reset", post(session_reset))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let upload_limit = state.session_config.max_upload_bytes.saturating_add(UPLOAD_HEADROOM);
    let upload_route = Router::new()
        .route("/sessions/{id}/document", post(session_document))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(upload_limit))
        .layer(middleware::map_response_with_state(upload_limit, json_body_limit));

    // 64KB for JSON requests, the document ceiling (plus headroom) for uploads
    public
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(JSON_BODY_LIMIT))
        .layer(middleware::map_response_with_state(JSON_BODY_LIMIT, json_body_limit))
        .merge(upload_route)
        .with_state(state)
}

async fn health_data(state: &AppState) -> serde_json::Value {
    // health stays up even when the database is not
    let personas = match db_call(&state.db, |db| db.count()).await {
        Ok(Ok(n)) => n,
        _ => 0,
    };
    serde_json::json!({
        "name": "aura",
        "status": "live",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "ai_enabled": state.ai.is_some(),
        "auth": state.api_key.is_some(),
        "personas": personas,
        "active_sessions": state.sessions.len(),
        "session": {
            "intro_questions": state.session_config.intro_questions,
            "qa_threshold": state.session_config.qa_threshold,
            "max_upload_bytes": state.session_config.max_upload_bytes,
            "finalize_policy": state.session_config.finalize_policy,
        },
    })
}

/// GET /: health data + endpoint list.
async fn index(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut data = health_data(&state).await;
    if let Some(obj) = data.as_object_mut() {
        obj.insert("endpoints".to_string(), serde_json::json!({
            "GET /": "index with health data + endpoint list",
            "GET /health": "health only",
            "POST /personas": "generate and store a persona (body: {business_name, business_field, ai_role, contact?})",
            "GET /personas": "stored personas, most recent first (?limit=N)",
            "GET /personas/:id": "one stored persona",
            "POST /personas/:id/chat": "ask a stored persona one question (body: {prompt})",
            "POST /sessions": "start a guided build session",
            "POST /sessions/standalone": "chat session with a stored persona (body: {persona_id})",
            "GET /sessions/:id": "session snapshot",
            "DELETE /sessions/:id": "discard a session",
            "POST /sessions/:id/turns": "send a chat turn (body: {text})",
            "POST /sessions/:id/document": "upload the business document (raw body, ?filename=)",
            "POST /sessions/:id/finalize": "retry the final prompt synthesis",
            "POST /sessions/:id/publish": "store the final prompt (body: {business_name, business_field, ai_role, contact?})",
            "POST /sessions/:id/reset": "restart the session from the intro",
        }));
    }
    Json(data)
}

/// GET /health: health data only (no endpoint list).
async fn health_only(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(health_data(&state).await)
}
