use serde::Serialize;
use thiserror::Error;

/// Errors produced by a [`Classifier`](crate::services::classifier::Classifier)
/// backend. The kind survives the analysis engine untouched; the session
/// reuses the display text as its user-visible failure message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
pub enum ClassifierError {
    /// The supplied image is degenerate (zero width or height).
    #[error("the selected image is not valid")]
    InvalidImage,

    /// The inference backend failed: model unavailable, bad model output,
    /// or an internal inference error.
    #[error("analysis failed: {0}")]
    PredictionFailed(String),
}

/// Precondition errors raised by the session state machine itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
pub enum SessionError {
    #[error("select an image before starting analysis")]
    NoImageSelected,
}
