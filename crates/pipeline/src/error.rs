use thiserror::Error;

/// Errors raised while building a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A step was injected relative to a step that is not in the pipeline.
    #[error("Cannot inject {step} {position} {anchor}: no step named {anchor} in the pipeline")]
    AnchorNotFound {
        step: &'static str,
        position: &'static str,
        anchor: &'static str,
    },
}

/// Result type for pipeline construction.
pub type Result<T> = std::result::Result<T, PipelineError>;
