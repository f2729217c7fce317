use async_trait::async_trait;

use crate::error::ClassifierError;
use crate::models::analysis_types::ImageHandle;

#[cfg(feature = "onnx")]
pub mod inference;
#[cfg(feature = "onnx")]
pub mod model_manager;
pub mod simulated;

pub use simulated::{SimulatedClassifier, SimulationMode};

#[cfg(feature = "onnx")]
pub use inference::OnnxClassifier;
#[cfg(feature = "onnx")]
pub use model_manager::{ModelSpec, OnnxModelManager};

/// The inference port: maps an image to a malignancy probability.
///
/// This is the sole seam between the analysis pipeline and whatever backs
/// it — the simulated backend today, a trained model behind the `onnx`
/// feature, or anything else a caller injects. Implementations must reject
/// zero-dimension images with [`ClassifierError::InvalidImage`] and surface
/// every backend failure as [`ClassifierError::PredictionFailed`]. Outputs
/// are expected in [0.0, 1.0]; out-of-range values are clamped downstream.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn predict(&self, image: &ImageHandle) -> Result<f64, ClassifierError>;
}
