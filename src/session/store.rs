//! In-memory session registry keyed by session id.
//!
//! Each session sits behind its own async mutex, held for the whole of a
//! turn, so a second request on the same session waits until the first one
//! (gateway round trip included) has resolved. Different sessions never
//! contend beyond the brief map lookup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::PersonaSession;
use crate::db::now_ms;

pub type SharedSession = Arc<tokio::sync::Mutex<PersonaSession>>;

struct Entry {
    session: SharedSession,
    touched_ms: i64,
}

#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and return its new id.
    pub fn insert(&self, session: PersonaSession) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let entry = Entry {
            session: Arc::new(tokio::sync::Mutex::new(session)),
            touched_ms: now_ms(),
        };
        self.inner.lock().insert(id.clone(), entry);
        id
    }

    pub fn get(&self, id: &str) -> Option<SharedSession> {
        let mut map = self.inner.lock();
        let entry = map.get_mut(id)?;
        entry.touched_ms = now_ms();
        Some(entry.session.clone())
    }

    pub fn remove(&self, id: &str) -> bool {
        self.inner.lock().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drop sessions nobody has touched for `max_idle`. Returns how many went.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let idle_ms = i64::try_from(max_idle.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms().saturating_sub(idle_ms);
        let mut map = self.inner.lock();
        let before = map.len();
        map.retain(|_, e| e.touched_ms >= cutoff);
        before - map.len()
    }
}
