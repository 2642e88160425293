use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::store::{SessionError, SessionStore, StaleSessionError};
use super::types::{Event, Session};

fn key(app: &str, user: &str, id: &str) -> String {
    format!("{app}\u{0}{user}\u{0}{id}")
}

/// `spec.md` §4.5's "in-memory" backend: a `DashMap` keyed by
/// `(app, user, id)`, used in tests and single-process dev deployments.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(
        &self,
        app: &str,
        user: &str,
        id: Option<&str>,
    ) -> Result<Session, SessionError> {
        let id = id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = Session {
            app: app.to_string(),
            user: user.to_string(),
            id: id.clone(),
            last_update_time: 0,
            events: Vec::new(),
        };
        self.sessions.insert(key(app, user, &id), session.clone());
        Ok(session)
    }

    async fn get_session(&self, app: &str, user: &str, id: &str) -> Result<Session, SessionError> {
        let session = self
            .sessions
            .get(&key(app, user, id))
            .map(|s| s.clone())
            .ok_or_else(|| SessionError::NotFound {
                app: app.to_string(),
                user: user.to_string(),
                id: id.to_string(),
            })?;
        Ok(Session {
            events: session.filtered_events(),
            ..session
        })
    }

    async fn append_event(&self, session: &Session, mut event: Event) -> Result<Event, SessionError> {
        let k = key(&session.app, &session.user, &session.id);
        let mut stored = self.sessions.get_mut(&k).ok_or_else(|| SessionError::NotFound {
            app: session.app.clone(),
            user: session.user.clone(),
            id: session.id.clone(),
        })?;
        if session.last_update_time < stored.last_update_time {
            return Err(SessionError::Stale(StaleSessionError {
                in_hand: session.last_update_time,
                storage: stored.last_update_time,
            }));
        }
        event.seq = stored.events.len() as i64;
        stored.events.push(event.clone());
        stored.last_update_time = event.timestamp;
        Ok(event)
    }

    async fn list_sessions(&self, app: &str, user: &str) -> Result<Vec<Session>, SessionError> {
        let prefix = key(app, user, "");
        Ok(self
            .sessions
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn delete_session(&self, app: &str, user: &str, id: &str) -> Result<(), SessionError> {
        self.sessions.remove(&key(app, user, id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evt(ts: i64) -> Event {
        Event {
            seq: 0,
            invocation_id: "inv".into(),
            author: "user".into(),
            content_json: serde_json::Value::Null,
            actions_json: serde_json::Value::Null,
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemorySessionStore::new();
        let created = store.create_session("app", "user", Some("s1")).await.unwrap();
        let fetched = store.get_session("app", "user", "s1").await.unwrap();
        assert_eq!(created.id, fetched.id);
    }

    #[tokio::test]
    async fn append_event_assigns_increasing_seq() {
        let store = InMemorySessionStore::new();
        let session = store.create_session("app", "user", Some("s1")).await.unwrap();
        let e0 = store.append_event(&session, evt(1)).await.unwrap();
        let session = store.get_session("app", "user", "s1").await.unwrap();
        let e1 = store.append_event(&session, evt(2)).await.unwrap();
        assert_eq!(e0.seq, 0);
        assert_eq!(e1.seq, 1);
    }

    #[tokio::test]
    async fn append_event_with_stale_handle_fails() {
        let store = InMemorySessionStore::new();
        let session = store.create_session("app", "user", Some("s1")).await.unwrap();
        store.append_event(&session, evt(5)).await.unwrap();
        // `session` still has last_update_time == 0, now behind storage's 5.
        let result = store.append_event(&session, evt(6)).await;
        assert!(matches!(result, Err(SessionError::Stale(_))));
    }

    #[tokio::test]
    async fn delete_then_get_not_found() {
        let store = InMemorySessionStore::new();
        store.create_session("app", "user", Some("s1")).await.unwrap();
        store.delete_session("app", "user", "s1").await.unwrap();
        let result = store.get_session("app", "user", "s1").await;
        assert!(matches!(result, Err(SessionError::NotFound { .. })));
    }

    #[tokio::test]
    async fn list_sessions_filters_by_app_and_user() {
        let store = InMemorySessionStore::new();
        store.create_session("app", "u1", Some("s1")).await.unwrap();
        store.create_session("app", "u1", Some("s2")).await.unwrap();
        store.create_session("app", "u2", Some("s3")).await.unwrap();
        let list = store.list_sessions("app", "u1").await.unwrap();
        assert_eq!(list.len(), 2);
    }
}
