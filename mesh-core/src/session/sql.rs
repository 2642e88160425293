//! SQL-backed `SessionStore`, grounded on
//! `loom::memory::sqlite_saver::SqliteSaver`: every DB call is wrapped in
//! `tokio::task::spawn_blocking` since `rusqlite` is synchronous, and the
//! schema (spec §7.6) is `sessions(app, user, id, last_update_time)` plus
//! `events(session_fk, seq, invocation_id, author, content_json,
//! actions_json, timestamp)`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;

use super::store::{SessionError, SessionStore, StaleSessionError};
use super::types::{Event, Session};

pub struct SqlSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlSessionStore {
    pub fn open(db_path: PathBuf) -> Result<Self, SessionError> {
        let conn = Connection::open(db_path).map_err(|e| SessionError::Storage(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                app TEXT NOT NULL,
                user TEXT NOT NULL,
                id TEXT NOT NULL,
                last_update_time INTEGER NOT NULL,
                PRIMARY KEY (app, user, id)
            );
            CREATE TABLE IF NOT EXISTS events (
                session_fk TEXT NOT NULL,
                seq INTEGER NOT NULL,
                invocation_id TEXT NOT NULL,
                author TEXT NOT NULL,
                content_json TEXT NOT NULL,
                actions_json TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                PRIMARY KEY (session_fk, seq)
            );",
        )
        .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, SessionError> {
        Self::open(PathBuf::from(":memory:"))
    }

    fn session_fk(app: &str, user: &str, id: &str) -> String {
        format!("{app}\u{0}{user}\u{0}{id}")
    }
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn create_session(
        &self,
        app: &str,
        user: &str,
        id: Option<&str>,
    ) -> Result<Session, SessionError> {
        let id = id.map(str::to_string).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let conn = self.conn.clone();
        let app_o = app.to_string();
        let user_o = user.to_string();
        let id_o = id.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO sessions (app, user, id, last_update_time) VALUES (?1, ?2, ?3, 0)",
                params![app_o, user_o, id_o],
            )
        })
        .await
        .map_err(|e| SessionError::Storage(e.to_string()))?
        .map_err(|e| SessionError::Storage(e.to_string()))?;

        Ok(Session {
            app: app.to_string(),
            user: user.to_string(),
            id,
            last_update_time: 0,
            events: Vec::new(),
        })
    }

    async fn get_session(&self, app: &str, user: &str, id: &str) -> Result<Session, SessionError> {
        let conn = self.conn.clone();
        let (app_o, user_o, id_o) = (app.to_string(), user.to_string(), id.to_string());
        let fk = Self::session_fk(app, user, id);
        let session = tokio::task::spawn_blocking(move || -> Result<Session, SessionError> {
            let conn = conn.blocking_lock();
            let last_update_time: i64 = conn
                .query_row(
                    "SELECT last_update_time FROM sessions WHERE app = ?1 AND user = ?2 AND id = ?3",
                    params![app_o, user_o, id_o],
                    |row| row.get(0),
                )
                .map_err(|_| SessionError::NotFound {
                    app: app_o.clone(),
                    user: user_o.clone(),
                    id: id_o.clone(),
                })?;

            let mut stmt = conn
                .prepare(
                    "SELECT seq, invocation_id, author, content_json, actions_json, timestamp
                     FROM events WHERE session_fk = ?1 ORDER BY seq ASC",
                )
                .map_err(|e| SessionError::Storage(e.to_string()))?;
            let events = stmt
                .query_map(params![fk], |row| {
                    let content: String = row.get(3)?;
                    let actions: String = row.get(4)?;
                    Ok(Event {
                        seq: row.get(0)?,
                        invocation_id: row.get(1)?,
                        author: row.get(2)?,
                        content_json: serde_json::from_str(&content).unwrap_or(serde_json::Value::Null),
                        actions_json: serde_json::from_str(&actions).unwrap_or(serde_json::Value::Null),
                        timestamp: row.get(5)?,
                    })
                })
                .map_err(|e| SessionError::Storage(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| SessionError::Storage(e.to_string()))?;

            Ok(Session {
                app: app_o,
                user: user_o,
                id: id_o,
                last_update_time,
                events,
            })
        })
        .await
        .map_err(|e| SessionError::Storage(e.to_string()))??;

        Ok(Session {
            events: session.filtered_events(),
            ..session
        })
    }

    async fn append_event(&self, session: &Session, event: Event) -> Result<Event, SessionError> {
        let conn = self.conn.clone();
        let fk = Self::session_fk(&session.app, &session.user, &session.id);
        let (app, user, id) = (session.app.clone(), session.user.clone(), session.id.clone());
        let in_hand = session.last_update_time;
        let mut event = event;

        tokio::task::spawn_blocking(move || -> Result<Event, SessionError> {
            let conn = conn.blocking_lock();
            let storage_time: i64 = conn
                .query_row(
                    "SELECT last_update_time FROM sessions WHERE app = ?1 AND user = ?2 AND id = ?3",
                    params![app, user, id],
                    |row| row.get(0),
                )
                .map_err(|_| SessionError::NotFound {
                    app: app.clone(),
                    user: user.clone(),
                    id: id.clone(),
                })?;
            if in_hand < storage_time {
                return Err(SessionError::Stale(StaleSessionError {
                    in_hand,
                    storage: storage_time,
                }));
            }
            let next_seq: i64 = conn
                .query_row(
                    "SELECT COALESCE(MAX(seq) + 1, 0) FROM events WHERE session_fk = ?1",
                    params![fk],
                    |row| row.get(0),
                )
                .map_err(|e| SessionError::Storage(e.to_string()))?;
            event.seq = next_seq;

            conn.execute(
                "INSERT INTO events (session_fk, seq, invocation_id, author, content_json, actions_json, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    fk,
                    event.seq,
                    event.invocation_id,
                    event.author,
                    event.content_json.to_string(),
                    event.actions_json.to_string(),
                    event.timestamp,
                ],
            )
            .map_err(|e| SessionError::Storage(e.to_string()))?;
            conn.execute(
                "UPDATE sessions SET last_update_time = ?1 WHERE app = ?2 AND user = ?3 AND id = ?4",
                params![event.timestamp, app, user, id],
            )
            .map_err(|e| SessionError::Storage(e.to_string()))?;
            Ok(event)
        })
        .await
        .map_err(|e| SessionError::Storage(e.to_string()))?
    }

    async fn list_sessions(&self, app: &str, user: &str) -> Result<Vec<Session>, SessionError> {
        let conn = self.conn.clone();
        let (app_o, user_o) = (app.to_string(), user.to_string());
        let ids: Vec<String> = tokio::task::spawn_blocking(move || -> Result<Vec<String>, SessionError> {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare("SELECT id FROM sessions WHERE app = ?1 AND user = ?2")
                .map_err(|e| SessionError::Storage(e.to_string()))?;
            let ids = stmt
                .query_map(params![app_o, user_o], |row| row.get(0))
                .map_err(|e| SessionError::Storage(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| SessionError::Storage(e.to_string()))?;
            Ok(ids)
        })
        .await
        .map_err(|e| SessionError::Storage(e.to_string()))??;

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            sessions.push(self.get_session(app, user, &id).await?);
        }
        Ok(sessions)
    }

    async fn delete_session(&self, app: &str, user: &str, id: &str) -> Result<(), SessionError> {
        let conn = self.conn.clone();
        let fk = Self::session_fk(app, user, id);
        let (app, user, id) = (app.to_string(), user.to_string(), id.to_string());
        tokio::task::spawn_blocking(move || -> Result<(), SessionError> {
            let conn = conn.blocking_lock();
            conn.execute("DELETE FROM events WHERE session_fk = ?1", params![fk])
                .map_err(|e| SessionError::Storage(e.to_string()))?;
            conn.execute(
                "DELETE FROM sessions WHERE app = ?1 AND user = ?2 AND id = ?3",
                params![app, user, id],
            )
            .map_err(|e| SessionError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| SessionError::Storage(e.to_string()))?
    }
}
