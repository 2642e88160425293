use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub seq: i64,
    pub invocation_id: String,
    pub author: String,
    pub content_json: Value,
    pub actions_json: Value,
    pub timestamp: i64,
}

impl Event {
    /// True for an event carrying `actions.compaction` (spec §4.5's
    /// "compaction cursor").
    pub fn is_compaction(&self) -> bool {
        self.actions_json.get("compaction").is_some()
    }

    /// `actions.compaction.end_timestamp`, when this is a compaction event.
    pub fn compaction_end_timestamp(&self) -> Option<i64> {
        self.actions_json
            .get("compaction")?
            .get("end_timestamp")?
            .as_i64()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub app: String,
    pub user: String,
    pub id: String,
    pub last_update_time: i64,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl Session {
    /// The filtering read view (spec §4.5): events strictly before the
    /// latest compaction event's `end_timestamp` are suppressed, except
    /// compaction events themselves, which always survive the filter so a
    /// later compaction can find and re-summarise the prior summary.
    pub fn filtered_events(&self) -> Vec<Event> {
        let cursor = self
            .events
            .iter()
            .filter(|e| e.is_compaction())
            .filter_map(Event::compaction_end_timestamp)
            .max();

        match cursor {
            None => self.events.clone(),
            Some(end_ts) => self
                .events
                .iter()
                .filter(|e| e.is_compaction() || e.timestamp >= end_ts)
                .cloned()
                .collect(),
        }
    }
}
