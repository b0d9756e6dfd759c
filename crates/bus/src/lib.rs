//! Message bus runtime: dispatcher, built-in steps and worker pool.
//!
//! This crate provides:
//! - [`BusBuilder`] to register handlers and sagas, decorate the pipeline
//!   and start a [`Bus`]
//! - The [`Dispatcher`] that runs one message through the receive pipeline
//!   inside its own transaction context
//! - The built-in receive and send steps, each with a `NAME` anchor
//! - [`HandlerActivator`] for plain, closure and saga handlers
//! - The JSON [`Serializer`]
//!
//! # Example
//!
//! ```rust,ignore
//! let bus = BusBuilder::new()
//!     .with_transport(InMemoryTransport::new(network, "orders"))
//!     .handle_fn(|order: PlaceOrder, context: MessageContext| async move {
//!         context.reply(&OrderPlaced { id: order.id }).await
//!     })
//!     .saga(SagaDefinition::new(FulfillmentSaga).initiated_by::<OrderPlaced>())?
//!     .start()
//!     .await?;
//!
//! bus.send_local(&PlaceOrder { id: 7 }).await?;
//! bus.shutdown().await;
//! ```

pub mod activator;
pub mod builder;
pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod serializer;
pub mod steps;
#[cfg(test)]
mod testing;
mod worker;

pub use activator::HandlerActivator;
pub use builder::BusBuilder;
pub use bus::Bus;
pub use config::BusOptions;
pub use dispatcher::{Dispatched, Dispatcher};
pub use error::{BusError, Result};
pub use serializer::{JSON_CONTENT_TYPE, JsonSerializer, Serializer};
pub use steps::{
    ActivateHandlersStep, AssignDefaultHeadersStep, DeserializeIncomingMessageStep,
    DispatchIncomingMessageStep, SendOutgoingMessageStep, SerializeOutgoingMessageStep,
};
