//! `SessionStore` trait shared by the in-memory and SQL backends, plus the
//! stale-session retry helper every caller of `append_event` must use.
//!
//! Grounded on `loom::memory::checkpointer::Checkpointer` (the `put`/
//! `get_tuple`/`list` async-trait shape) and `loom::memory::sqlite_saver`'s
//! `tokio::task::spawn_blocking`-wrapped rusqlite calls.

use async_trait::async_trait;
use thiserror::Error;

use super::types::{Event, Session};

/// Implementation-neutral marker substring every stale-session error must
/// contain, per spec §4.5, so callers across backends can recognize it by
/// string match as well as by type.
pub const STALE_SESSION_MARKER: &str = "earlier than the update_time in the storage_session";

#[derive(Debug, Error)]
#[error("session last_update_time {in_hand} is {STALE_SESSION_MARKER} ({storage})")]
pub struct StaleSessionError {
    pub in_hand: i64,
    pub storage: i64,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Stale(#[from] StaleSessionError),
    #[error("session not found: {app}/{user}/{id}")]
    NotFound {
        app: String,
        user: String,
        id: String,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        app: &str,
        user: &str,
        id: Option<&str>,
    ) -> Result<Session, SessionError>;

    /// Returns the session with `events` already passed through
    /// `Session::filtered_events` (spec §4.5's read-time-only filter).
    async fn get_session(&self, app: &str, user: &str, id: &str) -> Result<Session, SessionError>;

    /// Fails with `SessionError::Stale` if `session.last_update_time` is
    /// older than what's in storage. Callers MUST go through
    /// [`append_event_with_retry`] rather than calling this directly.
    async fn append_event(&self, session: &Session, event: Event) -> Result<Event, SessionError>;

    async fn list_sessions(&self, app: &str, user: &str) -> Result<Vec<Session>, SessionError>;

    async fn delete_session(&self, app: &str, user: &str, id: &str) -> Result<(), SessionError>;
}

/// Wraps `append_event` with the mandatory stale-session retry: on a stale
/// error, reload the session and retry, up to `max_retries` times, then
/// propagate the last error (spec §4.5, "Stale-session retry (critical)").
pub async fn append_event_with_retry(
    store: &dyn SessionStore,
    app: &str,
    user: &str,
    mut session: Session,
    mut event: Event,
    max_retries: u32,
) -> Result<Event, SessionError> {
    let mut attempts = 0;
    loop {
        match store.append_event(&session, event.clone()).await {
            Ok(persisted) => return Ok(persisted),
            Err(SessionError::Stale(stale)) => {
                attempts += 1;
                if attempts > max_retries {
                    return Err(SessionError::Stale(stale));
                }
                metrics::counter!(mesh_config::metrics_init::names::SESSION_STALE_RETRIES).increment(1);
                session = store.get_session(app, user, &session.id).await?;
                event.seq = session.events.len() as i64;
            }
            Err(other) => return Err(other),
        }
    }
}
