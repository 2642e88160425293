//! Task submission (spec §4.8.1): validates the caller, resolves user
//! config and scope via the Middleware Registry, allocates a `task_id`, and
//! publishes the agent request.

use std::sync::Arc;

use a2a_protocol::{topics::Namespace, Message, Part, Role, UserProperties};
use async_trait::async_trait;
use mesh_broker::BrokerClient;
use mesh_config::middleware::config_resolver;
use serde_json::Value;

use crate::context_manager::TaskContextManager;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("permission denied: caller identity is missing or has no id")]
    MissingIdentity,
    #[error("access to agent {0} is denied for this caller")]
    AccessDenied(String),
    #[error("broker error: {0}")]
    Broker(#[from] mesh_broker::BrokerError),
}

#[derive(Clone, Debug)]
pub struct UserIdentity {
    pub id: String,
}

/// Pluggable scope check (spec §4.8.1 step 3); default is allow.
#[async_trait]
pub trait AccessValidator: Send + Sync {
    async fn validate_agent_access(&self, target_agent: &str, user_config: &Value) -> bool;
}

pub struct AllowAllAccessValidator;

#[async_trait]
impl AccessValidator for AllowAllAccessValidator {
    async fn validate_agent_access(&self, _target_agent: &str, _user_config: &Value) -> bool {
        true
    }
}

pub struct SubmitRequest<'a> {
    pub target_agent: &'a str,
    pub parts: Vec<Part>,
    pub external_ctx: Value,
    pub user_identity: Option<&'a UserIdentity>,
    pub streaming: bool,
}

/// `submit_a2a_task` (spec §4.8.1): returns the allocated `task_id` once the
/// request has been published.
pub async fn submit_a2a_task(
    namespace: &Namespace,
    gateway_id: &str,
    broker: &Arc<dyn BrokerClient>,
    context_manager: &TaskContextManager,
    access_validator: &dyn AccessValidator,
    request: SubmitRequest<'_>,
    reception_timestamp_text: impl Into<String>,
    task_id_factory: impl FnOnce() -> String,
) -> Result<String, SubmitError> {
    let identity = request.user_identity.ok_or(SubmitError::MissingIdentity)?;
    if identity.id.is_empty() {
        return Err(SubmitError::MissingIdentity);
    }

    let user_config = config_resolver().resolve("gateway", "user_config").await.unwrap_or(Value::Null);

    if !access_validator.validate_agent_access(request.target_agent, &user_config).await {
        return Err(SubmitError::AccessDenied(request.target_agent.to_string()));
    }

    let mut parts = vec![Part::TextPart {
        text: reception_timestamp_text.into(),
    }];
    parts.extend(request.parts);

    let task_id = task_id_factory();
    context_manager.store(task_id.clone(), request.external_ctx);

    let method = if request.streaming { "message/stream" } else { "message/send" };
    let message = Message {
        role: Role::User,
        parts,
        metadata: Default::default(),
    };
    let envelope = a2a_protocol::JsonRpcRequest::new(
        task_id.clone(),
        method,
        serde_json::to_value(&message).unwrap_or(Value::Null),
    );

    let mut user_properties = UserProperties::default()
        .with_client_id(gateway_id)
        .with_user_id(&identity.id)
        .with_reply_to(a2a_protocol::topics::gateway_response(namespace, gateway_id, &task_id));
    user_properties.a2a_user_config = Some(user_config);
    if request.streaming {
        user_properties.a2a_status_topic = Some(a2a_protocol::topics::gateway_status(namespace, gateway_id, &task_id));
    }

    let topic = a2a_protocol::topics::agent_request(namespace, request.target_agent);
    let payload = serde_json::to_vec(&envelope).unwrap_or_default();

    broker.publish(&topic, payload, user_properties).await?;
    metrics::counter!(mesh_config::metrics_init::names::TASKS_SUBMITTED).increment(1);

    Ok(task_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_broker::DevBroker;

    fn namespace() -> Namespace {
        Namespace::new("sam/v1/").unwrap()
    }

    #[tokio::test]
    async fn rejects_missing_identity() {
        let broker: Arc<dyn BrokerClient> = Arc::new(DevBroker::new());
        let context_manager = TaskContextManager::new();
        let result = submit_a2a_task(
            &namespace(),
            "gw-1",
            &broker,
            &context_manager,
            &AllowAllAccessValidator,
            SubmitRequest {
                target_agent: "weather",
                parts: vec![],
                external_ctx: Value::Null,
                user_identity: None,
                streaming: false,
            },
            "received at t",
            || "gdk-task-1".to_string(),
        )
        .await;
        assert!(matches!(result, Err(SubmitError::MissingIdentity)));
    }

    #[tokio::test]
    async fn successful_submission_stores_context_and_returns_task_id() {
        let broker: Arc<dyn BrokerClient> = Arc::new(DevBroker::new());
        let context_manager = TaskContextManager::new();
        let identity = UserIdentity { id: "alice".to_string() };

        let task_id = submit_a2a_task(
            &namespace(),
            "gw-1",
            &broker,
            &context_manager,
            &AllowAllAccessValidator,
            SubmitRequest {
                target_agent: "weather",
                parts: vec![Part::TextPart { text: "hi".to_string() }],
                external_ctx: serde_json::json!({"channel": "web"}),
                user_identity: Some(&identity),
                streaming: true,
            },
            "received at t",
            || "gdk-task-1".to_string(),
        )
        .await
        .unwrap();

        assert_eq!(task_id, "gdk-task-1");
        assert_eq!(context_manager.get(&task_id), Some(serde_json::json!({"channel": "web"})));
    }
}
