//! Build session handlers. Each session sits behind its own async mutex so
//! concurrent requests against one session are applied one at a time.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::PersonaProfile;
use crate::error::AuraError;
use crate::session::store::SharedSession;
use crate::session::{PersonaSession, Phase, TurnOutcome, Upload};
use crate::{synth, AppState};

#[derive(Serialize)]
struct SessionView<'a> {
    id: &'a str,
    #[serde(flatten)]
    session: &'a PersonaSession,
}

fn view(id: &str, session: &PersonaSession) -> Json<serde_json::Value> {
    Json(serde_json::to_value(SessionView { id, session }).unwrap_or_default())
}

fn lookup(state: &AppState, id: &str) -> Result<SharedSession, AuraError> {
    state.sessions.get(id).ok_or(AuraError::NotFound)
}

pub(super) async fn create_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let session = PersonaSession::new(state.session_config.clone());
    let id = state.sessions.insert(session.clone());
    info!(session = %id, "build session started");
    (StatusCode::CREATED, view(&id, &session))
}

#[derive(Deserialize)]
pub(super) struct StandaloneBody {
    persona_id: i64,
}

pub(super) async fn create_standalone_session(
    State(state): State<AppState>,
    Json(body): Json<StandaloneBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), AuraError> {
    let rec = synth::load_persona(&state.db, body.persona_id).await?;
    let session = PersonaSession::standalone(state.session_config.clone(), rec.generated_prompt);
    let id = state.sessions.insert(session.clone());
    info!(session = %id, persona_id = rec.id, "standalone chat started");
    Ok((StatusCode::CREATED, view(&id, &session)))
}

pub(super) async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AuraError> {
    let shared = lookup(&state, &id)?;
    let session = shared.lock().await;
    Ok(view(&id, &session))
}

pub(super) async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AuraError> {
    if state.sessions.remove(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AuraError::NotFound)
    }
}

#[derive(Deserialize)]
pub(super) struct TurnBody {
    #[serde(default)]
    text: String,
}

pub(super) async fn session_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TurnBody>,
) -> Result<Json<TurnOutcome>, AuraError> {
    let shared = lookup(&state, &id)?;
    let backends = state.backends()?;
    let mut session = shared.lock().await;
    session
        .submit_turn(backends.gateway.as_ref(), &body.text)
        .await
        .map(Json)
}

#[derive(Deserialize)]
pub(super) struct DocumentQuery {
    filename: Option<String>,
}

pub(super) async fn session_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<DocumentQuery>,
    headers: HeaderMap,
    data: Bytes,
) -> Result<Json<serde_json::Value>, AuraError> {
    let shared = lookup(&state, &id)?;
    let backends = state.backends()?;
    let upload = Upload {
        file_name: q
            .filename
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| "document".into()),
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        data,
    };
    let mut session = shared.lock().await;
    let notice = session
        .attach_document(backends.documents.as_ref(), upload)
        .await?;
    Ok(Json(serde_json::json!({
        "notice": notice,
        "phase": session.phase(),
        "attachment": session.attachment(),
    })))
}

pub(super) async fn session_finalize(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AuraError> {
    let shared = lookup(&state, &id)?;
    let mut session = shared.lock().await;
    // a memoized artifact needs no backend
    let memo = session.final_artifact().map(str::to_string);
    let final_prompt = match memo {
        Some(artifact) if session.phase() == Phase::Done => artifact,
        _ => {
            if !matches!(session.phase(), Phase::Finalizing | Phase::Done) {
                return Err(AuraError::InvalidPhase { op: "finalize", phase: session.phase() });
            }
            let backends = state.backends()?;
            session.finalize(backends.gateway.as_ref()).await?
        }
    };
    Ok(Json(serde_json::json!({
        "final_prompt": final_prompt,
        "phase": session.phase(),
    })))
}

pub(super) async fn session_publish(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(profile): Json<PersonaProfile>,
) -> Result<(StatusCode, Json<synth::Published>), AuraError> {
    let shared = lookup(&state, &id)?;
    let mut session = shared.lock().await;
    let published = synth::publish(&state.db, &mut session, profile, &state.public_url).await?;
    Ok((StatusCode::CREATED, Json(published)))
}

pub(super) async fn session_reset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AuraError> {
    let shared = lookup(&state, &id)?;
    let mut session = shared.lock().await;
    session.reset();
    Ok(view(&id, &session))
}
