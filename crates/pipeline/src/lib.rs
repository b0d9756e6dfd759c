//! Step pipeline, step injection and handler model for the message bus.
//!
//! This crate provides:
//! - [`Step`] and the [`Next`] continuation that chains steps
//! - [`Pipeline`] with [`DefaultPipeline`] and the [`PipelineStepInjector`] decorator
//! - The incoming and outgoing step contexts
//! - The handler model the activation and dispatch steps work with
//! - [`MessageContext`] for sending from inside handlers
//! - Resource scopes tied to the transaction lifetime

pub mod context;
pub mod error;
pub mod handler;
pub mod injector;
pub mod message;
pub mod pipeline;
pub mod scope;
pub mod sender;
pub mod step;

pub use context::{IncomingStepContext, Items, OutgoingStepContext};
pub use error::{PipelineError, Result};
pub use handler::{
    CorrelationLookup, HandleMessages, HandlerInvocation, HandlerInvoker, HandlerInvokers,
    InvokerFactory, SagaBinding, SagaState,
};
pub use injector::{PipelineStepInjector, RelativePosition};
pub use message::{BusMessage, LogicalMessage};
pub use pipeline::{DefaultPipeline, IncomingStep, OutgoingStep, Pipeline};
pub use scope::{CreateScopeStep, SCOPE_ITEM, ScopeProvider, scope_for};
pub use sender::{Destination, MessageContext, MessageSender};
pub use step::{Next, Step, invoke, step_names};
