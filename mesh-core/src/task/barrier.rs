//! Fan-in primitive for peer delegation (spec §4.7.4, P7): tracks which
//! sub-tasks sharing one invocation id have reported back, and tells the
//! caller when all of them have.
//!
//! Grounded directly on `loom::channels::named_barrier::NamedBarrierValue`:
//! the same `names`/`seen` pair with `mark_seen`/`is_available`/`consume`,
//! retargeted from a generic graph-channel value to a peer sub-task-id set.

use std::collections::HashSet;
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct NamedBarrier<T: Clone + Eq + Hash> {
    names: HashSet<T>,
    seen: HashSet<T>,
}

impl<T: Clone + Eq + Hash> NamedBarrier<T> {
    pub fn from_names(names: impl IntoIterator<Item = T>) -> Self {
        Self {
            names: names.into_iter().collect(),
            seen: HashSet::new(),
        }
    }

    /// Adds one more expected name. Used when the expected set is only
    /// known incrementally, as peer calls get issued one at a time.
    pub fn grow(&mut self, name: T) {
        self.names.insert(name);
    }

    /// Marks one name seen. Returns `Err` if `name` wasn't in the expected
    /// set — a peer responding under a sub-task id nobody dispatched.
    pub fn mark_seen(&mut self, name: &T) -> Result<bool, UnknownName> {
        if !self.names.contains(name) {
            return Err(UnknownName);
        }
        self.seen.insert(name.clone());
        Ok(self.is_available())
    }

    /// True once every expected name has been seen (including the
    /// zero-names case, which is immediately available).
    pub fn is_available(&self) -> bool {
        self.seen == self.names
    }

    pub fn pending_names(&self) -> Vec<T> {
        self.names.difference(&self.seen).cloned().collect()
    }

    /// Clears `seen` if available, returning whether it was. Mirrors
    /// `NamedBarrierValue::consume` — a barrier is single-use per round.
    pub fn consume(&mut self) -> bool {
        if self.is_available() {
            self.seen.clear();
            true
        } else {
            false
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("peer response for a sub-task id not in this invocation's expected set")]
pub struct UnknownName;
