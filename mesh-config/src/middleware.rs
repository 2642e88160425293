//! Process-wide pluggable bindings: config resolution, resource sharing,
//! and token issuance, each overridable by a host embedding the mesh.
//!
//! Grounded on `config::load_and_apply`'s single-resolution-path design,
//! extended with `once_cell::sync::OnceCell`-guarded global slots (the
//! teacher already depends on `once_cell` — see `loom/Cargo.toml`). Unlike a
//! plain `OnceCell`, slots here are wrapped in `RwLock<Option<Arc<dyn _>>>`
//! so `reset_bindings` can clear them between tests, the way
//! `original_source/.../common/middleware/registry.py` resets module-level
//! bindings in its own test fixtures.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value;

/// Resolves named configuration values for an app at runtime, beyond what
/// [`crate::resolve`] reads from env/file — e.g. config sourced from a
/// control-plane-managed store.
#[async_trait]
pub trait ConfigResolver: Send + Sync {
    async fn resolve(&self, app_name: &str, key: &str) -> Option<Value>;

    /// Authorizes one operation (e.g. a control-plane request) against
    /// whatever policy a host binds. `user_config` is the caller's resolved
    /// config; `operation` is the caller-supplied description of the
    /// operation being attempted (method, resource, …).
    ///
    /// Default: permissive, except a fixed `"deny_all"` value for the
    /// `access_policy` key under `app_name` rejects unconditionally —
    /// the one policy every host gets without binding a resolver.
    async fn authorize_operation(&self, app_name: &str, user_config: &Value, operation: &Value) -> bool {
        let _ = (user_config, operation);
        self.resolve(app_name, "access_policy").await.as_ref().and_then(Value::as_str) != Some("deny_all")
    }
}

/// Default resolver: always returns `None`, pushing every lookup back to the
/// env/file/default chain in [`crate::resolve`].
pub struct NullConfigResolver;

#[async_trait]
impl ConfigResolver for NullConfigResolver {
    async fn resolve(&self, _app_name: &str, _key: &str) -> Option<Value> {
        None
    }
}

/// Shares a named resource (a connection pool, a cache handle, …) across
/// apps within one process, keyed by an opaque handle the host assigns.
#[async_trait]
pub trait ResourceSharingService: Send + Sync {
    async fn get(&self, handle: &str) -> Option<Arc<dyn std::any::Any + Send + Sync>>;
    async fn put(&self, handle: &str, resource: Arc<dyn std::any::Any + Send + Sync>);
}

/// Issues and validates bearer tokens for gateway-originated requests.
#[async_trait]
pub trait TokenService: Send + Sync {
    async fn issue(&self, user_id: &str, scopes: &[String]) -> String;
    async fn validate(&self, token: &str) -> Option<TokenClaims>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenClaims {
    pub user_id: String,
    pub scopes: Vec<String>,
}

/// Default token service: rejects everything. A host that needs real auth
/// must bind a [`TokenService`] at startup.
pub struct DenyAllTokenService;

#[async_trait]
impl TokenService for DenyAllTokenService {
    async fn issue(&self, _user_id: &str, _scopes: &[String]) -> String {
        String::new()
    }

    async fn validate(&self, _token: &str) -> Option<TokenClaims> {
        None
    }
}

struct Bindings {
    config_resolver: RwLock<Option<Arc<dyn ConfigResolver>>>,
    resource_sharing: RwLock<Option<Arc<dyn ResourceSharingService>>>,
    token_service: RwLock<Option<Arc<dyn TokenService>>>,
}

static BINDINGS: Lazy<Bindings> = Lazy::new(|| Bindings {
    config_resolver: RwLock::new(None),
    resource_sharing: RwLock::new(None),
    token_service: RwLock::new(None),
});

pub fn bind_config_resolver(resolver: Arc<dyn ConfigResolver>) {
    *BINDINGS.config_resolver.write().expect("lock poisoned") = Some(resolver);
}

pub fn config_resolver() -> Arc<dyn ConfigResolver> {
    BINDINGS
        .config_resolver
        .read()
        .expect("lock poisoned")
        .clone()
        .unwrap_or_else(|| Arc::new(NullConfigResolver))
}

pub fn bind_resource_sharing(service: Arc<dyn ResourceSharingService>) {
    *BINDINGS.resource_sharing.write().expect("lock poisoned") = Some(service);
}

pub fn resource_sharing() -> Option<Arc<dyn ResourceSharingService>> {
    BINDINGS
        .resource_sharing
        .read()
        .expect("lock poisoned")
        .clone()
}

pub fn bind_token_service(service: Arc<dyn TokenService>) {
    *BINDINGS.token_service.write().expect("lock poisoned") = Some(service);
}

pub fn token_service() -> Arc<dyn TokenService> {
    BINDINGS
        .token_service
        .read()
        .expect("lock poisoned")
        .clone()
        .unwrap_or_else(|| Arc::new(DenyAllTokenService))
}

/// Clears every binding back to its default. Tests that bind a fake service
/// must call this in teardown so later tests don't observe a stale binding —
/// bindings are process-global, not per-test.
pub fn reset_bindings() {
    *BINDINGS.config_resolver.write().expect("lock poisoned") = None;
    *BINDINGS.resource_sharing.write().expect("lock poisoned") = None;
    *BINDINGS.token_service.write().expect("lock poisoned") = None;
}
