//! Saga correlation, idempotency and persistence for the message bus.
//!
//! This crate provides:
//! - The [`Saga`] and [`SagaHandler`] traits that workflows implement
//! - [`CorrelationConfig`] for mapping message values to saga data properties
//! - [`SagaDefinition`] which validates a saga and produces invoker factories
//! - The [`IdempotencyData`] ledger for sagas that must tolerate redelivery
//! - [`LoadSagaDataStep`], the receive-pipeline step that finds, creates and
//!   persists saga instances around handler dispatch
//!
//! A message resolves against a saga as follows: every correlation declared
//! for its type is looked up in storage. A single match is loaded; no match
//! creates a new instance if the message initiates the saga and is otherwise
//! handled by the [`UnmatchedSagaPolicy`]; matches that disagree fail the
//! dispatch.

pub mod correlation;
pub mod definition;
pub mod error;
pub mod idempotency;
mod invoker;
pub mod saga;
pub mod state;
pub mod step;

pub use correlation::{Correlation, CorrelationConfig};
pub use definition::SagaDefinition;
pub use error::{Result, SagaError};
pub use idempotency::{IdempotencyData, OutgoingMessage};
pub use saga::{IdempotentSagaData, Saga, SagaData, SagaHandler, SagaInstance};
pub use state::CorrelationState;
pub use step::{LoadSagaDataStep, UnmatchedSagaPolicy};
