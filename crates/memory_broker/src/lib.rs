//! # Memory Broker
//!
//! In-process implementation of the broker capability, used by the demo
//! binary and by tests. Not durable: everything lives in memory.
//!
//! - Queue and topic destinations
//! - Ack/nack ledger with optional redelivery and a dead-letter list
//! - Outage (`set_online(false)`) and permanent closure (`close()`)

mod broker;

pub use broker::{DeadLetter, InMemoryBroker, SettlementRecord};
