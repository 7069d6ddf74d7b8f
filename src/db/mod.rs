//! SQLite-backed persona storage.

mod personas;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};

use crate::error::AuraError;

/// Set busy_timeout on every connection handed out by the pool.
/// Prevents SQLITE_BUSY when two requests insert at once.
#[derive(Debug)]
struct BusyTimeoutCustomizer;
impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error> for BusyTimeoutCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }
}

type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

const MAX_NAME_LEN: usize = 120;
const MAX_FIELD_LEN: usize = 120;
const MAX_ROLE_LEN: usize = 500;
const MAX_CONTACT_LEN: usize = 120;

/// A finished persona. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaRecord {
    pub id: i64,
    pub business_name: String,
    pub business_field: String,
    pub ai_role: String,
    #[serde(default)]
    pub contact: String,
    pub generated_prompt: String,
    pub created_at: i64,
}

/// The business facts behind a persona, as submitted by the owner.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonaProfile {
    #[serde(default)]
    pub business_name: String,
    #[serde(default)]
    pub business_field: String,
    #[serde(default)]
    pub ai_role: String,
    #[serde(default)]
    pub contact: Option<String>,
}

impl PersonaProfile {
    pub fn new(
        business_name: impl Into<String>,
        business_field: impl Into<String>,
        ai_role: impl Into<String>,
    ) -> Self {
        Self {
            business_name: business_name.into(),
            business_field: business_field.into(),
            ai_role: ai_role.into(),
            contact: None,
        }
    }

    pub fn contact(mut self, c: impl Into<String>) -> Self {
        self.contact = Some(c.into());
        self
    }

    /// Trim every field and reject missing or oversized ones.
    pub fn validated(self) -> Result<Self, AuraError> {
        let business_name = required("business_name", &self.business_name, MAX_NAME_LEN)?;
        let business_field = required("business_field", &self.business_field, MAX_FIELD_LEN)?;
        let ai_role = required("ai_role", &self.ai_role, MAX_ROLE_LEN)?;
        let contact = self
            .contact
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if let Some(ref c) = contact {
            if c.chars().count() > MAX_CONTACT_LEN {
                return Err(AuraError::Validation(format!("contact too long (max {MAX_CONTACT_LEN})")));
            }
        }
        Ok(Self { business_name, business_field, ai_role, contact })
    }
}

fn required(name: &'static str, value: &str, max: usize) -> Result<String, AuraError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(AuraError::MissingField(name));
    }
    if v.chars().count() > max {
        return Err(AuraError::Validation(format!("{name} too long (max {max})")));
    }
    Ok(v.to_string())
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS personas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    business_name TEXT NOT NULL,
    business_field TEXT NOT NULL,
    ai_role TEXT NOT NULL,
    contact TEXT NOT NULL DEFAULT '',
    generated_prompt TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_personas_created ON personas(created_at);
"#;

/// SQLite-backed persona store. Insert and read only.
pub struct PersonaDB {
    pool: Pool<SqliteConnectionManager>,
}

impl PersonaDB {
    fn conn(&self) -> Result<PooledConn, AuraError> {
        self.pool.get().map_err(|e| AuraError::Internal(format!("pool: {e}")))
    }

    /// Open (or create) a database at the given path.
    pub fn open(path: &str) -> Result<Self, AuraError> {
        let pool_size = if path == ":memory:" { 2 } else { 8 };
        let manager = if path == ":memory:" {
            // Shared cache so all pool connections see the same in-memory DB.
            // Each caller gets a unique name to avoid cross-test pollution.
            let name = uuid::Uuid::new_v4().to_string();
            SqliteConnectionManager::file(format!("file:{name}?mode=memory&cache=shared"))
        } else {
            SqliteConnectionManager::file(path)
        };
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_customizer(Box::new(BusyTimeoutCustomizer))
            .build(manager)
            .map_err(|e| AuraError::Internal(format!("pool: {e}")))?;

        let conn = pool.get().map_err(|e| AuraError::Internal(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        if conn.prepare("SELECT contact FROM personas LIMIT 0").is_err() {
            conn.execute("ALTER TABLE personas ADD COLUMN contact TEXT NOT NULL DEFAULT ''", [])?;
        }
        drop(conn);
        Ok(Self { pool })
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<PersonaRecord> {
    Ok(PersonaRecord {
        id: row.get("id")?,
        business_name: row.get("business_name")?,
        business_field: row.get("business_field")?,
        ai_role: row.get("ai_role")?,
        contact: row.get::<_, String>("contact").unwrap_or_default(),
        generated_prompt: row.get("generated_prompt")?,
        created_at: row.get("created_at")?,
    })
}
