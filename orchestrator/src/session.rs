//! In-memory session store.
//!
//! A session is an append-only event log plus the key/value state derived
//! from it. Appending an event is the only way state changes: the event's
//! `state_delta` is applied as part of the append, so replaying the log
//! from an empty state reproduces the current state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::core::event::{Event, NewEvent};
use crate::core::state::State;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub state: State,
    pub events: Vec<Event>,
}

impl Session {
    pub fn new(app_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            app_name: app_name.into(),
            user_id: user_id.into(),
            created_at: now,
            last_update_time: now,
            state: State::new(),
            events: Vec::new(),
        }
    }

    /// Record `event`, assigning the next ordinal and applying its state delta.
    pub fn append(&mut self, invocation_id: &str, event: NewEvent) -> Event {
        let timestamp = Utc::now().max(self.last_update_time);
        let event = Event {
            ordinal: self.events.len() as u64,
            invocation_id: invocation_id.to_string(),
            author: event.author,
            timestamp,
            content: event.content,
            error: event.error,
            actions: event.actions,
        };
        for (key, value) in &event.actions.state_delta {
            self.state.set(key.clone(), value.clone());
        }
        self.last_update_time = timestamp;
        self.events.push(event.clone());
        debug!(
            session_id = %self.id,
            ordinal = event.ordinal,
            author = %event.author,
            "event appended"
        );
        event
    }
}

/// State reconstructed by applying every event's delta in order.
pub fn replay(events: &[Event]) -> State {
    let mut state = State::new();
    for event in events {
        for (key, value) in &event.actions.state_delta {
            state.set(key.clone(), value.clone());
        }
    }
    state
}

/// Shared handle to one live session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: String,
    app_name: String,
    user_id: String,
    inner: Arc<Mutex<Session>>,
    run_lock: Arc<Mutex<()>>,
}

impl SessionHandle {
    fn new(session: Session) -> Self {
        Self {
            id: session.id.clone(),
            app_name: session.app_name.clone(),
            user_id: session.user_id.clone(),
            inner: Arc::new(Mutex::new(session)),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn snapshot(&self) -> Session {
        self.inner.lock().await.clone()
    }

    pub async fn state(&self) -> State {
        self.inner.lock().await.state.clone()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.inner.lock().await.events.clone()
    }

    pub async fn append(&self, invocation_id: &str, event: NewEvent) -> Event {
        self.inner.lock().await.append(invocation_id, event)
    }

    /// Serialize pipeline runs on this session. Held for the whole run.
    pub async fn begin_run(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.run_lock).lock_owned().await
    }
}

type SessionKey = (String, String, String);

/// All live sessions, keyed by `(app_name, user_id, session_id)`.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<SessionKey, SessionHandle>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, app_name: &str, user_id: &str) -> SessionHandle {
        let handle = SessionHandle::new(Session::new(app_name, user_id));
        let key = (
            app_name.to_string(),
            user_id.to_string(),
            handle.id().to_string(),
        );
        self.sessions.write().await.insert(key, handle.clone());
        debug!(app_name, user_id, session_id = %handle.id(), "session created");
        handle
    }

    pub async fn get(&self, app_name: &str, user_id: &str, session_id: &str) -> Option<SessionHandle> {
        let key = (
            app_name.to_string(),
            user_id.to_string(),
            session_id.to_string(),
        );
        self.sessions.read().await.get(&key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::Content;
    use serde_json::json;

    #[test]
    fn append_assigns_ordinals_and_applies_delta() {
        let mut session = Session::new("app", "user");
        let first = session.append("e-1", NewEvent::new("user").with_content(Content::text("hi")));
        let second = session.append(
            "e-1",
            NewEvent::new("architecture_parser_agent").with_state("architecture_summary", json!("s")),
        );
        assert_eq!(first.ordinal, 0);
        assert_eq!(second.ordinal, 1);
        assert!(second.timestamp >= first.timestamp);
        assert_eq!(session.state.get("architecture_summary"), Some(&json!("s")));
        assert_eq!(session.last_update_time, second.timestamp);
    }

    #[test]
    fn replay_reproduces_state() {
        let mut session = Session::new("app", "user");
        session.append("e-1", NewEvent::new("a").with_state("k", json!(1)));
        session.append("e-1", NewEvent::new("b").with_error("boom"));
        session.append("e-1", NewEvent::new("c").with_state("k", json!(2)).with_state("j", json!("x")));
        assert_eq!(replay(&session.events), session.state);
    }

    #[test]
    fn session_serializes_camel_case() {
        let session = Session::new("app", "user");
        let value = serde_json::to_value(&session).expect("serialize");
        assert_eq!(value["appName"], json!("app"));
        assert_eq!(value["userId"], json!("user"));
        assert!(value.get("lastUpdateTime").is_some());
    }

    #[tokio::test]
    async fn store_scopes_sessions_by_app_and_user() {
        let store = SessionStore::new();
        let handle = store.create("app", "alice").await;
        assert!(store.get("app", "alice", handle.id()).await.is_some());
        assert!(store.get("app", "bob", handle.id()).await.is_none());
        assert!(store.get("other", "alice", handle.id()).await.is_none());
    }

    #[tokio::test]
    async fn handles_share_one_log() {
        let store = SessionStore::new();
        let handle = store.create("app", "alice").await;
        let again = store.get("app", "alice", handle.id()).await.expect("session");
        handle.append("e-1", NewEvent::new("user")).await;
        assert_eq!(again.events().await.len(), 1);
    }
}
