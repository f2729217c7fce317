//! Skin-lesion malignancy analysis pipeline: a pluggable classifier port,
//! the rule that turns a raw probability into a clinical classification, and
//! the async session state machine that drives a caller from idle through
//! analyzing to a result (with a delayed high-risk warning) and back.
//!
//! Image acquisition, rendering, and persistence live outside this crate;
//! callers hand in an [`ImageHandle`] and observe [`SessionManager`] state.

pub mod error;
pub mod models;
pub mod services;

pub use error::{ClassifierError, SessionError};
pub use models::analysis_types::{
    AnalysisResult, ClassificationKind, ImageHandle, SessionSnapshot, SessionState,
    MALIGNANT_THRESHOLD, SECONDARY_CHECKUP_THRESHOLD,
};
pub use services::analysis::AnalysisEngine;
pub use services::classifier::{Classifier, SimulatedClassifier, SimulationMode};
pub use services::session::{SessionManager, DEFAULT_WARNING_DELAY};

#[cfg(feature = "onnx")]
pub use services::classifier::{ModelSpec, OnnxClassifier, OnnxModelManager};
