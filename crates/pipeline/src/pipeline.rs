use std::sync::Arc;

use crate::Result;
use crate::context::{IncomingStepContext, OutgoingStepContext};
use crate::step::Step;

/// A step of the receive pipeline.
pub type IncomingStep = Arc<dyn Step<IncomingStepContext>>;

/// A step of the send pipeline.
pub type OutgoingStep = Arc<dyn Step<OutgoingStepContext>>;

/// Source of the ordered step sequences the bus runs.
///
/// Resolved once when the bus starts; decorators such as the step injector
/// wrap another pipeline and fail resolution when misconfigured.
pub trait Pipeline: Send + Sync {
    /// Steps run for every received message.
    fn receive_pipeline(&self) -> Result<Vec<IncomingStep>>;

    /// Steps run for every sent message.
    fn send_pipeline(&self) -> Result<Vec<OutgoingStep>>;
}

impl<P: Pipeline + ?Sized> Pipeline for Box<P> {
    fn receive_pipeline(&self) -> Result<Vec<IncomingStep>> {
        (**self).receive_pipeline()
    }

    fn send_pipeline(&self) -> Result<Vec<OutgoingStep>> {
        (**self).send_pipeline()
    }
}

/// A pipeline with fixed step lists.
#[derive(Clone, Default)]
pub struct DefaultPipeline {
    receive: Vec<IncomingStep>,
    send: Vec<OutgoingStep>,
}

impl DefaultPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step to the receive pipeline.
    pub fn on_receive(mut self, step: IncomingStep) -> Self {
        self.receive.push(step);
        self
    }

    /// Appends a step to the send pipeline.
    pub fn on_send(mut self, step: OutgoingStep) -> Self {
        self.send.push(step);
        self
    }
}

impl Pipeline for DefaultPipeline {
    fn receive_pipeline(&self) -> Result<Vec<IncomingStep>> {
        Ok(self.receive.clone())
    }

    fn send_pipeline(&self) -> Result<Vec<OutgoingStep>> {
        Ok(self.send.clone())
    }
}
