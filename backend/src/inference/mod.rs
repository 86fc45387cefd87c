pub mod adapter;
pub mod extract;
pub mod prompt;
pub mod runtime;

use std::time::Duration;

/// Every way a model-backed classification can fail. All of them are recovered
/// by falling back to the mock classifier.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Inference unavailable: {0}")]
    Unavailable(String),
    #[error("Inference failed after {elapsed:?}: {reason}")]
    Invocation { reason: String, elapsed: Duration },
    #[error("Malformed model output: {0}")]
    MalformedOutput(String),
}

impl InferenceError {
    pub fn kind(&self) -> &'static str {
        match self {
            InferenceError::Unavailable(_) => "unavailable",
            InferenceError::Invocation { .. } => "invocation",
            InferenceError::MalformedOutput(_) => "malformed_output",
        }
    }
}
