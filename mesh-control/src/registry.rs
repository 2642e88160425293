//! In-process table of the apps this control-plane instance manages, plus
//! the pluggable factory that turns a create-request body into a running
//! [`App`] — the control plane itself has no idea what components a
//! concrete app wires up, so that decision is left to the host exactly the
//! way [`mesh_config::middleware::ConfigResolver`] leaves auth policy to
//! the host.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use mesh_broker::BrokerClient;
use mesh_core::app::{App, AppInfo};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CreateAppError {
    #[error("invalid app spec: {0}")]
    InvalidSpec(String),
}

/// Builds a running [`App`] from a name and a create-request body. The
/// default factory wires up a component-less app from the body's
/// `app_type` field; a host with real app types binds its own factory.
#[async_trait]
pub trait AppFactory: Send + Sync {
    async fn create(&self, name: &str, spec: Value, broker: Arc<dyn BrokerClient>) -> Result<Arc<App>, CreateAppError>;
}

pub struct DefaultAppFactory;

#[async_trait]
impl AppFactory for DefaultAppFactory {
    async fn create(&self, name: &str, spec: Value, broker: Arc<dyn BrokerClient>) -> Result<Arc<App>, CreateAppError> {
        let app_type = match &spec {
            Value::Null => "generic".to_string(),
            Value::Object(map) => map
                .get("app_type")
                .and_then(Value::as_str)
                .unwrap_or("generic")
                .to_string(),
            _ => return Err(CreateAppError::InvalidSpec("body must be a JSON object".to_string())),
        };
        Ok(Arc::new(App::new(name, app_type, broker, vec![])))
    }
}

/// `name → App`, the collection the control plane's `apps` resource reads
/// and writes (spec §4.11).
#[derive(Default)]
pub struct AppRegistry {
    apps: DashMap<String, Arc<App>>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<App>> {
        self.apps.get(name).map(|e| e.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.apps.contains_key(name)
    }

    pub fn insert(&self, name: String, app: Arc<App>) {
        self.apps.insert(name, app);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<App>> {
        self.apps.remove(name).map(|(_, app)| app)
    }

    pub async fn list_info(&self) -> Vec<AppInfo> {
        let apps: Vec<Arc<App>> = self.apps.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(apps.len());
        for app in apps {
            out.push(app.get_info().await);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_broker::DevBroker;

    fn broker() -> Arc<dyn BrokerClient> {
        Arc::new(DevBroker::new())
    }

    #[tokio::test]
    async fn default_factory_reads_app_type_from_body() {
        let app = DefaultAppFactory
            .create("weather", serde_json::json!({"app_type": "agent"}), broker())
            .await
            .unwrap();
        assert_eq!(app.name(), "weather");
        assert_eq!(app.get_info().await.app_type, "agent");
    }

    #[tokio::test]
    async fn default_factory_rejects_non_object_body() {
        let result = DefaultAppFactory.create("weather", Value::String("nope".into()), broker()).await;
        assert!(matches!(result, Err(CreateAppError::InvalidSpec(_))));
    }

    #[tokio::test]
    async fn insert_then_get_then_remove_round_trips() {
        let registry = AppRegistry::new();
        let app = DefaultAppFactory.create("weather", Value::Null, broker()).await.unwrap();
        registry.insert("weather".to_string(), app);
        assert!(registry.contains("weather"));
        assert!(registry.remove("weather").is_some());
        assert!(!registry.contains("weather"));
    }

    #[tokio::test]
    async fn list_info_reflects_every_registered_app() {
        let registry = AppRegistry::new();
        for name in ["a", "b"] {
            let app = DefaultAppFactory.create(name, Value::Null, broker()).await.unwrap();
            registry.insert(name.to_string(), app);
        }
        let infos = registry.list_info().await;
        assert_eq!(infos.len(), 2);
    }
}
