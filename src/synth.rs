//! Single-shot persona synthesis, persona chat, and publishing a finished
//! build session.

use serde::Serialize;
use tracing::{info, warn};

use crate::ai::{self, GenerationGateway, Turn};
use crate::db::{PersonaProfile, PersonaRecord};
use crate::error::AuraError;
use crate::prompts;
use crate::session::{Phase, PersonaSession};
use crate::{db_call, SharedDB};

/// Generate a persona prompt from the business facts and store it.
/// One gateway call, no history, no system instruction. Nothing is stored
/// unless the call produced text.
pub async fn synthesize(
    db: &SharedDB,
    gateway: &dyn GenerationGateway,
    profile: PersonaProfile,
) -> Result<PersonaRecord, AuraError> {
    let profile = profile.validated()?;
    let instruction = prompts::synthesis_instruction(
        &profile.business_name,
        &profile.business_field,
        &profile.ai_role,
        profile.contact.as_deref(),
    );
    let prompt = ai::generate_text(gateway, None, &[Turn::user(instruction)], None)
        .await
        .map_err(|e| {
            warn!(error = %e, business = %profile.business_name, "persona synthesis failed");
            e
        })?;

    let rec = db_call(db, move |db| db.insert(&profile, &prompt)).await??;
    info!(id = rec.id, business = %rec.business_name, "persona created");
    Ok(rec)
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub persona_id: i64,
    pub business_name: String,
    pub response: String,
    pub failed: bool,
}

/// One stateless question to a stored persona.
pub async fn chat_with_persona(
    db: &SharedDB,
    gateway: &dyn GenerationGateway,
    persona_id: i64,
    prompt: &str,
) -> Result<ChatReply, AuraError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(AuraError::MissingField("prompt"));
    }
    let rec = load_persona(db, persona_id).await?;
    let (response, failed) = match ai::generate_text(
        gateway,
        Some(rec.generated_prompt.as_str()),
        &[Turn::user(prompt)],
        None,
    )
    .await
    {
        Ok(text) => (text, false),
        Err(e) => {
            warn!(error = %e, persona_id, "persona chat failed");
            (prompts::FAILURE_SENTINEL.to_string(), true)
        }
    };
    Ok(ChatReply { persona_id, business_name: rec.business_name, response, failed })
}

pub async fn load_persona(db: &SharedDB, id: i64) -> Result<PersonaRecord, AuraError> {
    db_call(db, move |db| db.get(id)).await??.ok_or(AuraError::NotFound)
}

/// Share link for a stored persona.
pub fn share_link(public_url: &str, id: i64) -> String {
    format!("{}/personas/{id}/chat", public_url.trim_end_matches('/'))
}

#[derive(Debug, Clone, Serialize)]
pub struct Published {
    pub id: i64,
    pub share_link: String,
}

/// Persist the final artifact of a finished session. Idempotent: a session
/// that was already published returns its existing record.
pub async fn publish(
    db: &SharedDB,
    session: &mut PersonaSession,
    profile: PersonaProfile,
    public_url: &str,
) -> Result<Published, AuraError> {
    if session.phase() != Phase::Done {
        return Err(AuraError::InvalidPhase { op: "publish", phase: session.phase() });
    }
    if let (Some(id), Some(link)) = (session.published_id(), session.share_link()) {
        return Ok(Published { id, share_link: link.to_string() });
    }
    let profile = profile.validated()?;
    let artifact = session
        .final_artifact()
        .map(str::to_string)
        .ok_or_else(|| AuraError::Internal("done session has no final prompt".into()))?;
    if artifact == prompts::FAILURE_SENTINEL {
        return Err(AuraError::Validation(
            "final prompt generation failed; reset the session and try again".into(),
        ));
    }

    let rec = db_call(db, move |db| db.insert(&profile, &artifact)).await??;
    let link = share_link(public_url, rec.id);
    session.mark_published(rec.id, link.clone());
    info!(id = rec.id, business = %rec.business_name, "session published");
    Ok(Published { id: rec.id, share_link: link })
}
