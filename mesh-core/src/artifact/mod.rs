//! Artifact Service (C6): blob store keyed by `(scope, user, session,
//! filename, version)`, with agent-default read-through fallback.
//!
//! Grounded on `loom::memory::store::{Store, Item, Namespace}`: the
//! Artifact Service is that same keyed-blob-plus-metadata shape, retargeted
//! from a vector-searchable long-term memory store to an immutable
//! versioned blob store.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Reserved user id marking "agent defaults" (spec §4.6): `load` falls back
/// to this scope when a per-user lookup misses.
pub const AGENT_DEFAULT_USER: &str = "__agent_default__";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub bytes: Arc<Vec<u8>>,
    pub mime_type: String,
    pub size: usize,
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Key {
    scope: String,
    user: String,
    session: String,
    filename: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("cannot delete an agent-default artifact as a normal user")]
    DefaultIsReadOnly,
}

/// In-memory artifact store. Versions accumulate per key; `delete` removes
/// every version for that `(scope, user, session, filename)`.
#[derive(Default)]
pub struct ArtifactService {
    // version -> blob, per key, in insertion order via BTreeMap<version, _>
    store: DashMap<Key, BTreeMap<u32, ArtifactVersion>>,
}

impl ArtifactService {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(scope: &str, user: &str, session: &str, filename: &str) -> Key {
        Key {
            scope: scope.to_string(),
            user: user.to_string(),
            session: session.to_string(),
            filename: filename.to_string(),
        }
    }

    /// Saves the next version for this key and returns the assigned version.
    pub fn save(
        &self,
        scope: &str,
        user: &str,
        session: &str,
        filename: &str,
        bytes: Vec<u8>,
        mime_type: impl Into<String>,
        created_at: i64,
    ) -> u32 {
        let key = Self::key(scope, user, session, filename);
        let mut entry = self.store.entry(key).or_default();
        let version = entry.keys().next_back().map(|v| v + 1).unwrap_or(0);
        entry.insert(
            version,
            ArtifactVersion {
                size: bytes.len(),
                bytes: Arc::new(bytes),
                mime_type: mime_type.into(),
                created_at,
            },
        );
        version
    }

    /// Loads a specific version, or the latest when `version` is `None`.
    /// Falls back to [`AGENT_DEFAULT_USER`]'s scope when the per-user lookup
    /// misses (spec §4.6, "Agent-default artifacts").
    pub fn load(
        &self,
        scope: &str,
        user: &str,
        session: &str,
        filename: &str,
        version: Option<u32>,
    ) -> Option<ArtifactVersion> {
        let load_one = |user: &str| -> Option<ArtifactVersion> {
            let key = Self::key(scope, user, session, filename);
            let versions = self.store.get(&key)?;
            match version {
                Some(v) => versions.get(&v).cloned(),
                None => versions.values().next_back().cloned(),
            }
        };
        load_one(user).or_else(|| {
            if user == AGENT_DEFAULT_USER {
                None
            } else {
                load_one(AGENT_DEFAULT_USER)
            }
        })
    }

    pub fn list_versions(&self, scope: &str, user: &str, session: &str, filename: &str) -> Vec<u32> {
        let key = Self::key(scope, user, session, filename);
        self.store
            .get(&key)
            .map(|v| v.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Merges the agent-default listing into the per-user listing; on a
    /// name collision the user's own artifact wins (spec §4.6).
    pub fn list_keys(&self, scope: &str, user: &str, session: &str) -> Vec<String> {
        let mut names: std::collections::BTreeSet<String> = self
            .store
            .iter()
            .filter(|e| e.key().scope == scope && e.key().user == user && e.key().session == session)
            .map(|e| e.key().filename.clone())
            .collect();

        if user != AGENT_DEFAULT_USER {
            let default_names = self.store.iter().filter(|e| {
                e.key().scope == scope && e.key().user == AGENT_DEFAULT_USER && e.key().session == session
            });
            for e in default_names {
                names.insert(e.key().filename.clone());
            }
        }
        names.into_iter().collect()
    }

    pub fn get_version_metadata(
        &self,
        scope: &str,
        user: &str,
        session: &str,
        filename: &str,
        version: u32,
    ) -> Option<(String, usize, i64)> {
        let key = Self::key(scope, user, session, filename);
        let entry = self.store.get(&key)?;
        let v = entry.get(&version)?;
        Some((v.mime_type.clone(), v.size, v.created_at))
    }

    /// Rejects deleting an agent-default artifact on behalf of a normal
    /// user; the user may instead shadow it with their own save.
    pub fn delete(
        &self,
        scope: &str,
        user: &str,
        session: &str,
        filename: &str,
    ) -> Result<(), ArtifactError> {
        if user != AGENT_DEFAULT_USER {
            let own_key = Self::key(scope, user, session, filename);
            if self.store.contains_key(&own_key) {
                self.store.remove(&own_key);
                return Ok(());
            }
            // Per-user lookup missed; would fall through to the default scope.
            let default_key = Self::key(scope, AGENT_DEFAULT_USER, session, filename);
            if self.store.contains_key(&default_key) {
                return Err(ArtifactError::DefaultIsReadOnly);
            }
            return Err(ArtifactError::NotFound(filename.to_string()));
        }
        let key = Self::key(scope, user, session, filename);
        self.store
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| ArtifactError::NotFound(filename.to_string()))
    }
}

/// `artifact://{scope}/{user}/{session}/{filename}?version=N`. Absent
/// `version` parses to `None` (latest).
pub fn parse_artifact_uri(uri: &str) -> Option<(String, String, String, String, Option<u32>)> {
    let rest = uri.strip_prefix("artifact://")?;
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    let mut parts = path.splitn(4, '/');
    let scope = parts.next()?.to_string();
    let user = parts.next()?.to_string();
    let session = parts.next()?.to_string();
    let filename = parts.next()?.to_string();
    let version = query.and_then(|q| {
        q.split('&')
            .find_map(|kv| kv.strip_prefix("version="))
            .and_then(|v| v.parse::<u32>().ok())
    });
    Some((scope, user, session, filename, version))
}
