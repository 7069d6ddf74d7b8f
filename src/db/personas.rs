//! Persona record inserts and reads. There is no update or delete path.

use rusqlite::{params, OptionalExtension};

use super::*;

const COLS: &str =
    "id, business_name, business_field, ai_role, contact, generated_prompt, created_at";

impl PersonaDB {
    /// Insert a finished persona. `profile` should already be validated.
    pub fn insert(&self, profile: &PersonaProfile, generated_prompt: &str) -> Result<PersonaRecord, AuraError> {
        if generated_prompt.trim().is_empty() {
            return Err(AuraError::MissingField("generated_prompt"));
        }
        let conn = self.conn()?;
        let now = now_ms();
        let contact = profile.contact.clone().unwrap_or_default();
        conn.execute(
            "INSERT INTO personas (business_name, business_field, ai_role, contact, generated_prompt, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                profile.business_name,
                profile.business_field,
                profile.ai_role,
                contact,
                generated_prompt,
                now
            ],
        )?;
        let id = conn.last_insert_rowid();
        tracing::debug!(id, business = %profile.business_name, "persona stored");
        Ok(PersonaRecord {
            id,
            business_name: profile.business_name.clone(),
            business_field: profile.business_field.clone(),
            ai_role: profile.ai_role.clone(),
            contact,
            generated_prompt: generated_prompt.to_string(),
            created_at: now,
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<PersonaRecord>, AuraError> {
        let conn = self.conn()?;
        let rec = conn
            .query_row(
                &format!("SELECT {COLS} FROM personas WHERE id = ?1"),
                params![id],
                row_to_record,
            )
            .optional()?;
        Ok(rec)
    }

    /// Most recent first. Ties on the millisecond fall back to insert order.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<PersonaRecord>, AuraError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLS} FROM personas ORDER BY created_at DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count(&self) -> Result<usize, AuraError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM personas", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}
