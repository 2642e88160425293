//! Agent Registry & Discovery (C4): subscribes to the discovery topic,
//! upserts agent cards by name, evicts stale entries from reads (but keeps
//! them for observability), and serves `get`/`list`/`find_by_capability`.
//!
//! Grounded on `loom::channels::named_barrier`'s `dashmap`-backed registry
//! style: single writer (the dispatch loop), many readers.

use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Clone, Debug)]
struct RegistryEntry {
    card: AgentCard,
    last_seen: SystemTime,
}

/// Concurrency: single writer (the dispatch loop driving `upsert`), many
/// readers — a `DashMap` gives both without a coarse lock (spec §4.4).
pub struct AgentRegistry {
    entries: DashMap<String, RegistryEntry>,
    ttl: Duration,
}

impl AgentRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Upsert by name, stamping `last_seen` to now.
    pub fn upsert(&self, card: AgentCard) {
        self.entries.insert(
            card.name.clone(),
            RegistryEntry {
                card,
                last_seen: SystemTime::now(),
            },
        );
    }

    fn is_fresh(&self, entry: &RegistryEntry) -> bool {
        entry
            .last_seen
            .elapsed()
            .map(|age| age < self.ttl)
            .unwrap_or(true)
    }

    /// Returns the card if present and not past `ttl`. Expired cards are
    /// hidden from reads but left in the map for observability.
    pub fn get(&self, name: &str) -> Option<AgentCard> {
        self.entries.get(name).and_then(|entry| {
            if self.is_fresh(&entry) {
                Some(entry.card.clone())
            } else {
                None
            }
        })
    }

    pub fn list(&self) -> Vec<AgentCard> {
        self.entries
            .iter()
            .filter(|e| self.is_fresh(&e))
            .map(|e| e.card.clone())
            .collect()
    }

    pub fn find_by_capability(&self, tag: &str) -> Vec<AgentCard> {
        self.entries
            .iter()
            .filter(|e| self.is_fresh(&e) && e.card.capabilities.iter().any(|c| c == tag))
            .map(|e| e.card.clone())
            .collect()
    }

    /// Count including stale entries, for observability/debugging.
    pub fn total_entries(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(name: &str, caps: &[&str]) -> AgentCard {
        AgentCard {
            name: name.to_string(),
            description: String::new(),
            capabilities: caps.iter().map(|s| s.to_string()).collect(),
            metadata: Value::Null,
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let reg = AgentRegistry::new(Duration::from_secs(60));
        reg.upsert(card("weather", &["forecast"]));
        assert_eq!(reg.get("weather").unwrap().name, "weather");
    }

    #[test]
    fn get_misses_unknown_name() {
        let reg = AgentRegistry::new(Duration::from_secs(60));
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn upsert_overwrites_same_name() {
        let reg = AgentRegistry::new(Duration::from_secs(60));
        reg.upsert(card("weather", &["forecast"]));
        reg.upsert(card("weather", &["forecast", "alerts"]));
        assert_eq!(reg.get("weather").unwrap().capabilities.len(), 2);
        assert_eq!(reg.total_entries(), 1);
    }

    #[test]
    fn find_by_capability_filters() {
        let reg = AgentRegistry::new(Duration::from_secs(60));
        reg.upsert(card("weather", &["forecast"]));
        reg.upsert(card("calendar", &["scheduling"]));
        let found = reg.find_by_capability("forecast");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "weather");
    }

    #[test]
    fn expired_entries_are_hidden_from_reads_but_counted() {
        let reg = AgentRegistry::new(Duration::from_millis(0));
        reg.upsert(card("weather", &["forecast"]));
        std::thread::sleep(Duration::from_millis(5));
        assert!(reg.get("weather").is_none());
        assert!(reg.list().is_empty());
        assert_eq!(reg.total_entries(), 1);
    }
}
