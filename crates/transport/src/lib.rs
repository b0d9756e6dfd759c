//! Transaction context and transport abstraction for the message bus.
//!
//! This crate provides:
//! - The per-message [`TransactionContext`] with commit and dispose hooks
//! - The [`Transport`] trait every queueing medium implements
//! - An in-memory transport for tests and single-process setups
//! - A fault-injecting decorator for exercising redelivery

pub mod error;
pub mod instability;
pub mod memory;
pub mod message;
pub mod transaction;
pub mod transport;

pub use error::{Result, TransportError};
pub use instability::{FaultInjectingTransport, FaultInjectionOptions};
pub use memory::{InMemNetwork, InMemoryTransport};
pub use message::{Headers, TransportMessage};
pub use transaction::{CallbackFuture, TransactionContext, TransactionError, TransactionOutcome};
pub use transport::Transport;
