//! Shared identifiers and header keys used across the message bus crates.

pub mod headers;
pub mod types;

pub use types::{MessageId, Revision, SagaId};
