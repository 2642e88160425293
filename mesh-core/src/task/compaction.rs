//! Context-window compaction (spec §4.7.3) — the hard bit.
//!
//! Grounded on `loom::compress::{compact_node, config}`'s
//! `CompactionConfig` shape (`max_context_tokens`, `reserve_tokens`,
//! `prune_keep_tokens`, `compact_keep_recent`), generalized from a single
//! `auto`/`prune` toggle pair to the full cutoff-index-plus-progressive-
//! summarisation algorithm the spec requires.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::session::Event;

#[derive(Clone, Copy, Debug)]
pub struct CompactionConfig {
    /// Fraction of total tokens to retain after compaction (default 25%).
    pub compaction_threshold: f32,
    pub max_retries: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: 0.25,
            max_retries: 3,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CompactionError {
    #[error("insufficient history to summarise")]
    InsufficientHistory,
    #[error("too long: unable to complete after retries")]
    RetriesExhausted,
}

/// A synthesised compaction event: summarises `events_to_compact` into one
/// event whose `actions.compaction.end_timestamp` becomes the new read-time
/// cursor (`Session::filtered_events`).
#[derive(Clone, Debug)]
pub struct CompactionEvent {
    pub summary_text: String,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
}

/// Token estimator and summariser are pluggable — the algorithm below only
/// needs token counts and a way to turn a stretch of events plus an
/// optional prior summary into new summary text.
pub trait TokenCounter: Send + Sync {
    fn count(&self, event: &Event) -> u32;
}

#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, prior_summary: Option<&str>, events: &[Event]) -> String;
}

fn is_user_turn_boundary(event: &Event) -> bool {
    event.author == "user"
}

/// Finds the cutoff index (exclusive) at a user-turn boundary whose
/// cumulative token count minimises `|cumulative - target|`, computed in one
/// O(N) pass. Returns `None` ("insufficient history") if no boundary leaves
/// at least one complete user turn uncompacted.
fn find_cutoff_index(events: &[Event], counts: &[u32], target: f64) -> Option<usize> {
    let mut cumulative: u64 = 0;
    let mut best: Option<(usize, f64)> = None;

    for (i, event) in events.iter().enumerate() {
        cumulative += counts[i] as u64;
        if !is_user_turn_boundary(event) {
            continue;
        }
        // A cutoff at this boundary must leave at least one later user turn
        // uncompacted.
        let later_user_turn_exists = events[i + 1..].iter().any(is_user_turn_boundary);
        if !later_user_turn_exists {
            continue;
        }
        let diff = (cumulative as f64 - target).abs();
        if best.map(|(_, best_diff)| diff < best_diff).unwrap_or(true) {
            best = Some((i + 1, diff));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Per-session compaction locks — held by whoever is doing the work; other
/// tasks hitting the limit concurrently await the lock then reload and
/// retry (spec §4.7.3 step 1).
#[derive(Default)]
pub struct CompactionLocks {
    locks: dashmap::DashMap<String, Arc<Mutex<()>>>,
}

impl CompactionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Runs one compaction pass: given non-compaction events (oldest first) and
/// a token counter, produces the compaction event to persist. `prior_summary`
/// is the previous compaction's summary text, prepended as a fake "model"
/// event so the summariser re-compresses rather than accretes (step 4,
/// "Progressive summarisation").
pub async fn compact_once(
    events: &[Event],
    counter: &dyn TokenCounter,
    summarizer: &dyn Summarizer,
    prior_summary: Option<&str>,
    config: CompactionConfig,
) -> Result<CompactionEvent, CompactionError> {
    let counts: Vec<u32> = events.iter().map(|e| counter.count(e)).collect();
    let total: u64 = counts.iter().map(|c| *c as u64).sum();
    let target = total as f64 * config.compaction_threshold as f64;

    let cutoff = find_cutoff_index(events, &counts, target).ok_or(CompactionError::InsufficientHistory)?;
    let to_compact = &events[..cutoff];
    if to_compact.is_empty() {
        return Err(CompactionError::InsufficientHistory);
    }

    let summary_text = summarizer.summarize(prior_summary, to_compact).await;

    let start_timestamp = to_compact.first().map(|e| e.timestamp).unwrap_or(0);
    let mut end_timestamp = to_compact.last().map(|e| e.timestamp).unwrap_or(start_timestamp);
    // Clamp: end = max(start, end).
    end_timestamp = end_timestamp.max(start_timestamp);

    Ok(CompactionEvent {
        summary_text,
        start_timestamp,
        end_timestamp,
    })
}

/// Drives up to `config.max_retries` compaction attempts, each guarded by
/// the per-session lock, calling `persist` to commit and `reload` to fetch
/// the post-compaction event log for the next attempt.
pub async fn compact_with_retry<F, R, Fut1, Fut2>(
    locks: &CompactionLocks,
    session_id: &str,
    mut reload: F,
    counter: &dyn TokenCounter,
    summarizer: &dyn Summarizer,
    mut persist: R,
    config: CompactionConfig,
) -> Result<String, CompactionError>
where
    F: FnMut() -> Fut1,
    Fut1: std::future::Future<Output = (Vec<Event>, Option<String>)>,
    R: FnMut(CompactionEvent) -> Fut2,
    Fut2: std::future::Future<Output = ()>,
{
    let lock = locks.lock_for(session_id);
    let _guard = lock.lock().await;

    let mut attempts = 0;
    loop {
        let (events, prior_summary) = reload().await;
        match compact_once(&events, counter, summarizer, prior_summary.as_deref(), config).await {
            Ok(compaction_event) => {
                let summary = compaction_event.summary_text.clone();
                persist(compaction_event).await;
                metrics::counter!(mesh_config::metrics_init::names::COMPACTIONS).increment(1);
                return Ok(summary);
            }
            Err(CompactionError::InsufficientHistory) => return Err(CompactionError::InsufficientHistory),
            Err(e) => {
                attempts += 1;
                if attempts >= config.max_retries {
                    return Err(e);
                }
            }
        }
    }
}

/// Deferred notification (spec §4.7.3): only the root task (no
/// `parent_task_id`) consumes a pending summary and emits a user-facing
/// notification; subtasks leave it for the root.
#[derive(Default)]
pub struct PendingNotifications {
    by_task: HashMap<String, String>,
}

impl PendingNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&mut self, task_id: impl Into<String>, summary: impl Into<String>) {
        self.by_task.insert(task_id.into(), summary.into());
    }

    /// Takes the pending summary iff `task_id` is a root task (no parent).
    pub fn take_if_root(&mut self, task_id: &str, parent_task_id: Option<&str>) -> Option<String> {
        if parent_task_id.is_some() {
            return None;
        }
        self.by_task.remove(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCounter;
    impl TokenCounter for FixedCounter {
        fn count(&self, _event: &Event) -> u32 {
            10
        }
    }

    struct EchoSummarizer;
    #[async_trait::async_trait]
    impl Summarizer for EchoSummarizer {
        async fn summarize(&self, prior: Option<&str>, events: &[Event]) -> String {
            format!("{}+{} events", prior.unwrap_or(""), events.len())
        }
    }

    fn event(author: &str, ts: i64) -> Event {
        Event {
            seq: ts,
            invocation_id: "inv".into(),
            author: author.into(),
            content_json: serde_json::Value::Null,
            actions_json: serde_json::Value::Null,
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn compacts_a_prefix_leaving_a_user_turn_uncompacted() {
        let events = vec![
            event("user", 1),
            event("agent", 2),
            event("user", 3),
            event("agent", 4),
            event("user", 5),
            event("agent", 6),
        ];
        let result = compact_once(&events, &FixedCounter, &EchoSummarizer, None, CompactionConfig::default())
            .await
            .unwrap();
        assert!(result.summary_text.contains("events"));
        assert!(result.end_timestamp >= result.start_timestamp);
    }

    #[tokio::test]
    async fn single_user_turn_is_insufficient_history() {
        let events = vec![event("user", 1), event("agent", 2)];
        let result = compact_once(&events, &FixedCounter, &EchoSummarizer, None, CompactionConfig::default()).await;
        assert_eq!(result, Err(CompactionError::InsufficientHistory));
    }

    #[tokio::test]
    async fn progressive_summarisation_passes_prior_summary_through() {
        let events = vec![
            event("user", 1),
            event("agent", 2),
            event("user", 3),
            event("agent", 4),
        ];
        let result = compact_once(
            &events,
            &FixedCounter,
            &EchoSummarizer,
            Some("old summary"),
            CompactionConfig::default(),
        )
        .await
        .unwrap();
        assert!(result.summary_text.starts_with("old summary"));
    }

    #[test]
    fn deferred_notification_only_fires_for_root_tasks() {
        let mut pending = PendingNotifications::new();
        pending.defer("t-1", "summary");
        assert_eq!(pending.take_if_root("t-1", Some("parent")), None);
        pending.defer("t-1", "summary");
        assert_eq!(pending.take_if_root("t-1", None), Some("summary".to_string()));
    }

    #[tokio::test]
    async fn compact_with_retry_uses_per_session_lock_and_persists() {
        let locks = CompactionLocks::new();
        let events = vec![
            event("user", 1),
            event("agent", 2),
            event("user", 3),
            event("agent", 4),
        ];
        let persisted = std::sync::Arc::new(tokio::sync::Mutex::new(None));
        let persisted_clone = persisted.clone();

        let result = compact_with_retry(
            &locks,
            "session-1",
            || {
                let events = events.clone();
                async move { (events, None) }
            },
            &FixedCounter,
            &EchoSummarizer,
            move |ev| {
                let persisted = persisted_clone.clone();
                async move {
                    *persisted.lock().await = Some(ev.summary_text);
                }
            },
            CompactionConfig::default(),
        )
        .await;

        assert!(result.is_ok());
        assert!(persisted.lock().await.is_some());
    }
}
