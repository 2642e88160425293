//! Broker adapter contract and an in-process dev-mode implementation.

mod client;
mod dev;
mod message;

pub use client::{BrokerClient, BrokerError, MessageStream};
pub use dev::DevBroker;
pub use message::{AckCallback, BrokerMessage};
