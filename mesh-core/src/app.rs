//! App Host (C3): an App owns a set of components and a broker connection.
//! Lifecycle: `init → start (subscribe all topics, spawn loops) → running →
//! stop (unsubscribe, drain queues, join loops)`.
//!
//! Grounded on `loom::graph::runtime::Runtime`'s builder-plus-merge shape,
//! retargeted from a single graph invocation's context to a long-lived
//! component's lifecycle state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mesh_broker::BrokerClient;
use serde_json::Value;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppLifecycle {
    Init,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// One subscribe-and-serve loop an App spawns at `start`. Implementors own
/// their own subscription and run until `stop_signal` resolves.
#[async_trait]
pub trait AppComponent: Send + Sync {
    fn name(&self) -> &str;

    async fn start(self: Arc<Self>, broker: Arc<dyn BrokerClient>) -> JoinHandle<()>;
}

/// Summary returned by `get_info()`; also the shape control-plane status
/// endpoints report per app (spec §4.3, §4.11).
#[derive(Clone, Debug, serde::Serialize)]
pub struct AppInfo {
    pub name: String,
    pub app_type: String,
    pub enabled: bool,
    pub lifecycle: String,
    pub ready: bool,
}

/// An App owns a broker connection and a set of [`AppComponent`]s.
/// Reconfiguration is stop + re-init with new config; an app is never
/// mutated in place while running (spec §4.3).
pub struct App {
    name: String,
    app_type: String,
    enabled: AtomicBool,
    broker: Arc<dyn BrokerClient>,
    components: Vec<Arc<dyn AppComponent>>,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    lifecycle: tokio::sync::RwLock<AppLifecycle>,
}

impl App {
    pub fn new(
        name: impl Into<String>,
        app_type: impl Into<String>,
        broker: Arc<dyn BrokerClient>,
        components: Vec<Arc<dyn AppComponent>>,
    ) -> Self {
        Self {
            name: name.into(),
            app_type: app_type.into(),
            enabled: AtomicBool::new(true),
            broker,
            components,
            handles: tokio::sync::Mutex::new(Vec::new()),
            lifecycle: tokio::sync::RwLock::new(AppLifecycle::Init),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Subscribes every component's topics and spawns its serve loop.
    pub async fn start(&self) {
        *self.lifecycle.write().await = AppLifecycle::Starting;
        let mut handles = self.handles.lock().await;
        for component in &self.components {
            let handle = component.clone().start(self.broker.clone()).await;
            handles.push(handle);
        }
        drop(handles);
        *self.lifecycle.write().await = AppLifecycle::Running;
    }

    /// Aborts every component loop. A graceful drain would await each
    /// component's own shutdown signal; dev-mode components have none, so
    /// this aborts the join handles directly.
    pub async fn stop(&self) {
        *self.lifecycle.write().await = AppLifecycle::Stopping;
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
        *self.lifecycle.write().await = AppLifecycle::Stopped;
    }

    pub fn is_startup_complete(&self) -> bool {
        self.broker.is_connected()
    }

    pub fn is_ready(&self) -> bool {
        self.broker.is_connected()
    }

    pub async fn get_info(&self) -> AppInfo {
        AppInfo {
            name: self.name.clone(),
            app_type: self.app_type.clone(),
            enabled: self.enabled(),
            lifecycle: format!("{:?}", *self.lifecycle.read().await),
            ready: self.is_ready(),
        }
    }

    /// Topic-encoded REST emulation entry point used by the control plane
    /// (spec §4.11); apps that don't support management just 404.
    pub async fn handle_management_request(
        &self,
        method: &str,
        path: &str,
        _body: Option<Value>,
    ) -> Result<Value, ManagementError> {
        match (method, path) {
            ("get", "status") => Ok(serde_json::to_value(self.get_info().await).unwrap()),
            _ => Err(ManagementError::NotFound),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagementError {
    #[error("no such management endpoint")]
    NotFound,
}
