//! End-to-end control-plane exchange over a real [`DevBroker`]: a caller
//! publishes a topic-encoded POST to create an app, then a GET to read it
//! back, each with a `replyTo` the test itself subscribes to — exactly the
//! round trip spec §4.11 describes.

use std::sync::Arc;
use std::time::Duration;

use a2a_protocol::topics::{self, Namespace};
use a2a_protocol::{JsonRpcRequest, JsonRpcResponse};
use mesh_broker::{BrokerClient, DevBroker};
use mesh_control::{spawn_control_plane, AppRegistry, ControlPlaneService, DefaultAppFactory};
use tokio_stream::StreamExt;

fn namespace() -> Namespace {
    Namespace::new("acme/dev").unwrap()
}

async fn call(
    broker: &Arc<dyn BrokerClient>,
    ns: &Namespace,
    method: &str,
    path: &[&str],
    params: serde_json::Value,
) -> JsonRpcResponse {
    let reply_topic = format!("acme/dev/a2a/v1/test/reply/{method}-{}", path.join("-"));
    let mut reply_stream = broker.subscribe(&reply_topic).await.unwrap();

    let topic = topics::control_plane(ns, method, path);
    let request = JsonRpcRequest::new("req-1", method, params);
    let mut user_properties = a2a_protocol::UserProperties::default();
    user_properties.reply_to = Some(reply_topic);

    broker
        .publish(&topic, serde_json::to_vec(&request).unwrap(), user_properties)
        .await
        .unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(2), reply_stream.next())
        .await
        .expect("control plane should reply within timeout")
        .expect("reply stream should yield a message");
    serde_json::from_slice(&msg.payload).unwrap()
}

#[tokio::test]
async fn post_then_get_round_trips_an_app_over_the_broker() {
    let ns = namespace();
    let broker: Arc<dyn BrokerClient> = Arc::new(DevBroker::new());

    let service = Arc::new(ControlPlaneService {
        namespace: ns.clone(),
        apps: Arc::new(AppRegistry::new()),
        factory: Arc::new(DefaultAppFactory),
        broker: broker.clone(),
        nack_backoff: Duration::from_millis(5),
    });
    spawn_control_plane(service, 32).await.unwrap();

    let created = call(
        &broker,
        &ns,
        "post",
        &[],
        serde_json::json!({"name": "weather-app", "app_type": "generic"}),
    )
    .await;
    assert!(created.error.is_none(), "create should succeed: {:?}", created.error);

    let fetched = call(&broker, &ns, "get", &["weather-app"], serde_json::Value::Null).await;
    assert!(fetched.error.is_none(), "get should succeed: {:?}", fetched.error);
    let body = fetched.result.unwrap();
    assert_eq!(body["name"], "weather-app");

    let duplicate = call(
        &broker,
        &ns,
        "post",
        &[],
        serde_json::json!({"name": "weather-app"}),
    )
    .await;
    assert!(duplicate.error.is_some(), "duplicate create should be rejected");
    assert_eq!(duplicate.error.unwrap().code, a2a_protocol::wire::ErrorCode::Conflict as i64);
}
