//! Stored persona handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::db::{PersonaProfile, PersonaRecord};
use crate::error::AuraError;
use crate::synth::{self, ChatReply};
use crate::{db_call, AppState};

pub(super) async fn create_persona(
    State(state): State<AppState>,
    Json(profile): Json<PersonaProfile>,
) -> Result<(StatusCode, Json<serde_json::Value>), AuraError> {
    // validate before touching the backend so bad input is a 400, not a 503
    let profile = profile.validated()?;
    let backends = state.backends()?;
    let rec = synth::synthesize(&state.db, backends.gateway.as_ref(), profile).await?;
    let link = synth::share_link(&state.public_url, rec.id);
    let mut body = serde_json::to_value(&rec).map_err(|e| AuraError::Internal(e.to_string()))?;
    if let Some(obj) = body.as_object_mut() {
        obj.insert("share_link".into(), link.into());
    }
    Ok((StatusCode::CREATED, Json(body)))
}

#[derive(Deserialize)]
pub(super) struct ListQuery {
    limit: Option<usize>,
}

pub(super) async fn list_personas(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AuraError> {
    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let (personas, total) = db_call(&state.db, move |db| {
        let personas = db.list_recent(limit)?;
        Ok::<_, AuraError>((personas, db.count()?))
    })
    .await??;
    Ok(Json(serde_json::json!({
        "personas": personas,
        "count": personas.len(),
        "total": total,
        "limit": limit,
    })))
}

pub(super) async fn get_persona(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PersonaRecord>, AuraError> {
    synth::load_persona(&state.db, id).await.map(Json)
}

#[derive(Deserialize)]
pub(super) struct ChatBody {
    #[serde(default)]
    prompt: String,
}

pub(super) async fn chat_persona(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatReply>, AuraError> {
    if body.prompt.trim().is_empty() {
        return Err(AuraError::MissingField("prompt"));
    }
    let backends = state.backends()?;
    synth::chat_with_persona(&state.db, backends.gateway.as_ref(), id, &body.prompt)
        .await
        .map(Json)
}
