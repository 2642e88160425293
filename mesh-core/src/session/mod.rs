//! Session / Event Store (C5): two implementations behind one interface.

mod memory;
mod sql;
mod store;
mod types;

pub use memory::InMemorySessionStore;
pub use sql::SqlSessionStore;
pub use store::{append_event_with_retry, SessionError, SessionStore, StaleSessionError, STALE_SESSION_MARKER};
pub use types::{Event, Session};
