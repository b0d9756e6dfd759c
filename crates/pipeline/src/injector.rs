//! Structural step injection relative to named anchor steps.

use std::sync::Arc;

use crate::pipeline::{IncomingStep, OutgoingStep, Pipeline};
use crate::step::Step;
use crate::{PipelineError, Result};

/// Where an injected step goes relative to its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativePosition {
    Before,
    After,
}

impl RelativePosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelativePosition::Before => "before",
            RelativePosition::After => "after",
        }
    }
}

impl std::fmt::Display for RelativePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Injection<C> {
    step: Arc<dyn Step<C>>,
    position: RelativePosition,
    anchor: &'static str,
}

/// Pipeline decorator that splices extra steps into another pipeline.
///
/// Anchors are matched by step name against the wrapped pipeline's steps.
/// Several injections against one anchor keep their registration order.
/// An anchor missing from the wrapped pipeline fails resolution with
/// [`PipelineError::AnchorNotFound`].
///
/// ```text
/// base:          [A, B]
/// X after A:     [A, X, B]
/// Y before A:    [Y, A, X, B]
/// ```
pub struct PipelineStepInjector<P> {
    pipeline: P,
    receive: Vec<Injection<crate::IncomingStepContext>>,
    send: Vec<Injection<crate::OutgoingStepContext>>,
}

impl<P: Pipeline> PipelineStepInjector<P> {
    /// Wraps `pipeline` without any injections.
    pub fn new(pipeline: P) -> Self {
        Self {
            pipeline,
            receive: Vec::new(),
            send: Vec::new(),
        }
    }

    /// Injects `step` into the receive pipeline next to `anchor`.
    pub fn on_receive(
        mut self,
        step: IncomingStep,
        position: RelativePosition,
        anchor: &'static str,
    ) -> Self {
        self.receive.push(Injection {
            step,
            position,
            anchor,
        });
        self
    }

    /// Injects `step` into the send pipeline next to `anchor`.
    pub fn on_send(
        mut self,
        step: OutgoingStep,
        position: RelativePosition,
        anchor: &'static str,
    ) -> Self {
        self.send.push(Injection {
            step,
            position,
            anchor,
        });
        self
    }
}

impl<P: Pipeline> Pipeline for PipelineStepInjector<P> {
    fn receive_pipeline(&self) -> Result<Vec<IncomingStep>> {
        splice(self.pipeline.receive_pipeline()?, &self.receive)
    }

    fn send_pipeline(&self) -> Result<Vec<OutgoingStep>> {
        splice(self.pipeline.send_pipeline()?, &self.send)
    }
}

fn splice<C>(base: Vec<Arc<dyn Step<C>>>, injections: &[Injection<C>]) -> Result<Vec<Arc<dyn Step<C>>>> {
    if let Some(orphan) = injections
        .iter()
        .find(|i| !base.iter().any(|s| s.name() == i.anchor))
    {
        return Err(PipelineError::AnchorNotFound {
            step: orphan.step.name(),
            position: orphan.position.as_str(),
            anchor: orphan.anchor,
        });
    }

    let injected_at = |name: &str, position: RelativePosition| {
        injections
            .iter()
            .filter(move |i| i.position == position && i.anchor == name)
            .map(|i| i.step.clone())
            .collect::<Vec<_>>()
    };

    for injection in injections {
        tracing::debug!(
            step = injection.step.name(),
            position = injection.position.as_str(),
            anchor = injection.anchor,
            "Injecting pipeline step"
        );
    }

    let mut steps = Vec::with_capacity(base.len() + injections.len());
    for step in base {
        let name = step.name();
        steps.extend(injected_at(name, RelativePosition::Before));
        steps.push(step);
        steps.extend(injected_at(name, RelativePosition::After));
    }
    Ok(steps)
}
