//! Embed Resolver (C13): `«type:expression»` templating with a pluggable
//! `type → handler` registry, early/late resolution phases, and bounded
//! recursive re-scanning of substituted output.
//!
//! Grounded on `loom`'s `grep-regex`/`regex` dependency for the non-greedy
//! delimiter scan, and on `loom::tool_source::ToolSource`'s
//! async-trait-per-handler registry pattern for the resolver registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Matches `«type:expression»` non-greedily — tolerates nested plain text
/// but not nested delimiters, per spec §4.13.
static EMBED_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"«([A-Za-z0-9_\-]+):([^«»]*)»").expect("static embed regex"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Early,
    Late,
}

/// A non-text side effect bubbled up from a handler — e.g. a
/// `SIGNAL_STATUS_UPDATE` the gateway turns into an intermediate status
/// update (spec §4.8.4, §4.13).
#[derive(Clone, Debug)]
pub struct Signal {
    pub index: usize,
    pub kind: String,
    pub data: String,
}

#[derive(Clone, Debug, Default)]
pub struct HandlerOutcome {
    pub text: Option<String>,
    pub signal: Option<(String, String)>,
}

#[async_trait]
pub trait EmbedHandler: Send + Sync {
    fn phase(&self) -> Phase;
    async fn resolve(&self, expression: &str, context: &Value) -> HandlerOutcome;
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("no handler registered for embed type {0}")]
    UnknownType(String),
}

#[derive(Default)]
pub struct EmbedRegistry {
    handlers: HashMap<String, Arc<dyn EmbedHandler>>,
}

impl EmbedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, embed_type: impl Into<String>, handler: Arc<dyn EmbedHandler>) {
        self.handlers.insert(embed_type.into(), handler);
    }

    pub fn get(&self, embed_type: &str) -> Option<Arc<dyn EmbedHandler>> {
        self.handlers.get(embed_type).cloned()
    }
}

/// A MIME-typed string is a "container" worth recursively scanning iff it's
/// text-like and contains an opening delimiter (spec §4.13).
pub fn is_scannable_container(mime_type: &str, text: &str) -> bool {
    let text_like = mime_type.starts_with("text/") || mime_type == "application/json";
    text_like && text.contains('«')
}

/// One pass of the regex over `input`, resolving every embed whose handler
/// matches `phase`, leaving others untouched for a later pass.
pub async fn resolve_once(registry: &EmbedRegistry, phase: Phase, input: &str, context: &Value) -> (String, Vec<Signal>, bool) {
    let mut output = String::with_capacity(input.len());
    let mut signals = Vec::new();
    let mut last_end = 0;
    let mut changed = false;

    for (index, capture) in EMBED_PATTERN.captures_iter(input).enumerate() {
        let whole = capture.get(0).expect("group 0 always matches");
        let embed_type = &capture[1];
        let expression = &capture[2];

        output.push_str(&input[last_end..whole.start()]);
        last_end = whole.end();

        match registry.get(embed_type) {
            Some(handler) if handler.phase() == phase => {
                let outcome = handler.resolve(expression, context).await;
                if let Some(text) = outcome.text {
                    output.push_str(&text);
                    changed = true;
                }
                if let Some((kind, data)) = outcome.signal {
                    signals.push(Signal { index, kind, data });
                    changed = true;
                }
            }
            _ => {
                // Not this phase's concern (or unregistered) — leave the
                // delimiter text untouched for a later pass / caller.
                output.push_str(whole.as_str());
            }
        }
    }
    output.push_str(&input[last_end..]);
    (output, signals, changed)
}

/// Runs [`resolve_once`] repeatedly while the output still contains embeds
/// and changed on the last pass, bounded by `max_depth` (spec §4.13,
/// "recursive" pass).
pub async fn resolve_recursive(
    registry: &EmbedRegistry,
    phase: Phase,
    input: &str,
    context: &Value,
    max_depth: u32,
) -> (String, Vec<Signal>) {
    let mut current = input.to_string();
    let mut all_signals = Vec::new();

    for _ in 0..max_depth {
        let (next, signals, changed) = resolve_once(registry, phase, &current, context).await;
        all_signals.extend(signals);
        current = next;
        if !changed || !current.contains('«') {
            break;
        }
    }
    (current, all_signals)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UppercaseHandler;
    #[async_trait]
    impl EmbedHandler for UppercaseHandler {
        fn phase(&self) -> Phase {
            Phase::Early
        }
        async fn resolve(&self, expression: &str, _context: &Value) -> HandlerOutcome {
            HandlerOutcome {
                text: Some(expression.to_uppercase()),
                signal: None,
            }
        }
    }

    struct StatusSignalHandler;
    #[async_trait]
    impl EmbedHandler for StatusSignalHandler {
        fn phase(&self) -> Phase {
            Phase::Late
        }
        async fn resolve(&self, expression: &str, _context: &Value) -> HandlerOutcome {
            HandlerOutcome {
                text: None,
                signal: Some(("SIGNAL_STATUS_UPDATE".to_string(), expression.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn resolves_single_embed_in_a_phase() {
        let mut registry = EmbedRegistry::new();
        registry.register("upper", Arc::new(UppercaseHandler));

        let (out, signals, changed) = resolve_once(&registry, Phase::Early, "hello «upper:world»!", &Value::Null).await;
        assert_eq!(out, "hello WORLD!");
        assert!(signals.is_empty());
        assert!(changed);
    }

    #[tokio::test]
    async fn leaves_other_phase_embeds_untouched() {
        let mut registry = EmbedRegistry::new();
        registry.register("upper", Arc::new(UppercaseHandler));

        let (out, _signals, changed) = resolve_once(&registry, Phase::Late, "«upper:world»", &Value::Null).await;
        assert_eq!(out, "«upper:world»");
        assert!(!changed);
    }

    #[tokio::test]
    async fn signal_handler_emits_signal_without_text() {
        let mut registry = EmbedRegistry::new();
        registry.register("status", Arc::new(StatusSignalHandler));

        let (out, signals, _changed) = resolve_once(&registry, Phase::Late, "before «status:working» after", &Value::Null).await;
        assert_eq!(out, "before  after");
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, "SIGNAL_STATUS_UPDATE");
        assert_eq!(signals[0].data, "working");
    }

    #[tokio::test]
    async fn unregistered_type_is_left_untouched() {
        let registry = EmbedRegistry::new();
        let (out, _signals, changed) = resolve_once(&registry, Phase::Early, "«mystery:x»", &Value::Null).await;
        assert_eq!(out, "«mystery:x»");
        assert!(!changed);
    }

    #[tokio::test]
    async fn recursive_pass_stops_once_output_is_stable() {
        let mut registry = EmbedRegistry::new();
        registry.register("upper", Arc::new(UppercaseHandler));

        let (out, _signals) = resolve_recursive(&registry, Phase::Early, "«upper:a»", &Value::Null, 5).await;
        assert_eq!(out, "A");
    }

    #[test]
    fn container_detection_requires_text_like_mime_and_delimiter() {
        assert!(is_scannable_container("text/plain", "has «embed:x»"));
        assert!(!is_scannable_container("text/plain", "no delimiter here"));
        assert!(!is_scannable_container("image/png", "«embed:x»"));
    }
}
