//! queue-probe: inspect a Redis-backed task queue.
//!
//! Reads pending messages at the head of a queue without consuming them,
//! decodes their payloads, cross-references the tasks workers report as
//! active, and prints a summary for on-call debugging.

pub mod broker;
pub mod cli;
pub mod config;
pub mod error;
pub mod message;
pub mod probe;
pub mod report;
pub mod state;
pub mod storage;

// Re-export commonly used error types
pub use error::{BrokerError, DecodeError, StateError, StoreError};
