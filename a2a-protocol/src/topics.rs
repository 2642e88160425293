//! A2A topic taxonomy: builders for every topic pattern in spec §4.1, plus
//! the `{task_id}`-suffix extractor and the `>` / `*` subscription matcher.
//!
//! Grounded on `stream-event::envelope`: small, stateless, string-in
//! string-out helpers rather than a stateful builder object.

use std::fmt;

/// Absolute topic-prefix shared by every participant in one mesh, e.g. `acme/dev/`.
///
/// Constructed only via [`Namespace::new`], which enforces non-emptiness and a
/// trailing `/` so every topic builder can simply concatenate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Namespace(String);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NamespaceError {
    #[error("namespace must not be empty")]
    Empty,
}

impl Namespace {
    pub fn new(raw: impl Into<String>) -> Result<Self, NamespaceError> {
        let mut raw = raw.into();
        if raw.is_empty() {
            return Err(NamespaceError::Empty);
        }
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const A2A_PREFIX: &str = "a2a/v1/";
const SAM_PREFIX: &str = "solace-agent-mesh/v1/";
const CONTROL_PREFIX: &str = "sam/v1/";

/// `{ns}a2a/v1/discovery/agentcards/{agent}`
pub fn discovery_agentcard(ns: &Namespace, agent: &str) -> String {
    format!("{ns}{A2A_PREFIX}discovery/agentcards/{agent}")
}

/// `{ns}a2a/v1/discovery/agentcards/>`
pub fn discovery_subscription(ns: &Namespace) -> String {
    format!("{ns}{A2A_PREFIX}discovery/agentcards/>")
}

/// `{ns}a2a/v1/agent/request/{agent}`
pub fn agent_request(ns: &Namespace, agent: &str) -> String {
    format!("{ns}{A2A_PREFIX}agent/request/{agent}")
}

/// `{ns}a2a/v1/agent/response/{agent}/{task_id}`
pub fn agent_peer_response(ns: &Namespace, agent: &str, task_id: &str) -> String {
    format!("{ns}{A2A_PREFIX}agent/response/{agent}/{task_id}")
}

/// `{ns}a2a/v1/agent/response/{agent}/>` — subscribed once per agent app.
pub fn agent_peer_response_subscription(ns: &Namespace, agent: &str) -> String {
    format!("{ns}{A2A_PREFIX}agent/response/{agent}/>")
}

/// `{ns}a2a/v1/gateway/response/{gateway}/{task_id}`
pub fn gateway_response(ns: &Namespace, gateway: &str, task_id: &str) -> String {
    format!("{ns}{A2A_PREFIX}gateway/response/{gateway}/{task_id}")
}

/// `{ns}a2a/v1/gateway/status/{gateway}/{task_id}`
pub fn gateway_status(ns: &Namespace, gateway: &str, task_id: &str) -> String {
    format!("{ns}{A2A_PREFIX}gateway/status/{gateway}/{task_id}")
}

/// `{ns}a2a/v1/gateway/response/{gateway}/>` and `.../status/{gateway}/>` —
/// the two subscriptions a gateway app owns.
pub fn gateway_response_subscription(ns: &Namespace, gateway: &str) -> String {
    format!("{ns}{A2A_PREFIX}gateway/response/{gateway}/>")
}

pub fn gateway_status_subscription(ns: &Namespace, gateway: &str) -> String {
    format!("{ns}{A2A_PREFIX}gateway/status/{gateway}/>")
}

/// `{ns}a2a/v1/sandbox/request/{worker}`
pub fn sandbox_request(ns: &Namespace, worker: &str) -> String {
    format!("{ns}{A2A_PREFIX}sandbox/request/{worker}")
}

/// `{ns}a2a/v1/stimulus/async-service/user-response/{gateway}`
pub fn async_service_user_response(ns: &Namespace, gateway: &str) -> String {
    format!("{ns}{A2A_PREFIX}stimulus/async-service/user-response/{gateway}")
}

/// `{ns}solace-agent-mesh/v1/stimulus/orchestrator/asyncResponse`
pub fn orchestrator_async_response(ns: &Namespace) -> String {
    format!("{ns}{SAM_PREFIX}stimulus/orchestrator/asyncResponse")
}

/// `{ns}sam/v1/control/{method}/apps[/{name}[/…]]`
pub fn control_plane(ns: &Namespace, method: &str, path: &[&str]) -> String {
    let mut topic = format!("{ns}{CONTROL_PREFIX}control/{method}/apps");
    for seg in path {
        topic.push('/');
        topic.push_str(seg);
    }
    topic
}

/// `{ns}sam/v1/control/>` — the control-plane service's one subscription.
pub fn control_plane_subscription(ns: &Namespace) -> String {
    format!("{ns}{CONTROL_PREFIX}control/>")
}

/// Extracts the trailing path segment (the `{task_id}`) given the fixed
/// prefix that precedes it. Returns `None` if `topic` does not start with
/// `prefix` or has no residue after it.
///
/// Per spec §4.1: "`{task_id}` is always the *last* path segment when
/// present; an extractor matches the subscription prefix regex and treats
/// the residue as the id."
pub fn extract_trailing_id(topic: &str, prefix: &str) -> Option<String> {
    let residue = topic.strip_prefix(prefix)?;
    let residue = residue.strip_prefix('/').unwrap_or(residue);
    if residue.is_empty() || residue.contains('/') {
        None
    } else {
        Some(residue.to_string())
    }
}

/// Converts an MQTT-style subscription pattern (`>` = match-to-end, `*` =
/// single level) into an anchored regex. An involution with
/// [`topic_matches_subscription`] for P3: compiling the derived regex and
/// matching it against a topic gives the same answer as calling
/// `topic_matches_subscription` directly.
pub fn subscription_to_regex(pattern: &str) -> regex::Regex {
    let segments: Vec<&str> = pattern.split('/').collect();
    let mut parts: Vec<String> = Vec::with_capacity(segments.len());
    let mut i = 0;
    while i < segments.len() {
        let seg = segments[i];
        if seg == ">" {
            // match-to-end: consumes this and every remaining segment.
            parts.push(".*".to_string());
            i = segments.len();
            break;
        } else if seg == "*" {
            parts.push("[^/]+".to_string());
        } else {
            parts.push(regex::escape(seg));
        }
        i += 1;
    }
    let body = parts.join("/");
    regex::Regex::new(&format!("^{body}$")).expect("subscription pattern compiles to valid regex")
}

/// Byte-exact topic equality, or wildcard match per `>` / `*` semantics.
pub fn topic_matches_subscription(topic: &str, pattern: &str) -> bool {
    if !pattern.contains('>') && !pattern.contains('*') {
        return topic == pattern;
    }
    subscription_to_regex(pattern).is_match(topic)
}
