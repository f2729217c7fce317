use std::sync::Arc;

use log::debug;

use crate::error::ClassifierError;
use crate::models::analysis_types::{AnalysisResult, ImageHandle};
use crate::services::classifier::Classifier;

/// Runs one analysis: a single classifier call, then the business rule that
/// turns the raw probability into a classified, timestamped result.
///
/// Classifier errors pass through unchanged — retry policy, if any, lives
/// inside the classifier implementation, never here.
pub struct AnalysisEngine {
    classifier: Arc<dyn Classifier>,
}

impl AnalysisEngine {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    pub async fn execute(&self, image: ImageHandle) -> Result<AnalysisResult, ClassifierError> {
        let probability = self.classifier.predict(&image).await?;
        let result = AnalysisResult::new(image, probability);
        debug!(
            "analysis complete: {:?} at {}",
            result.classification(),
            result.confidence_text()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use image::DynamicImage;

    use super::*;
    use crate::models::analysis_types::ClassificationKind;

    struct Fixed(f64);

    #[async_trait]
    impl Classifier for Fixed {
        async fn predict(&self, _image: &ImageHandle) -> Result<f64, ClassifierError> {
            Ok(self.0)
        }
    }

    struct Failing;

    #[async_trait]
    impl Classifier for Failing {
        async fn predict(&self, _image: &ImageHandle) -> Result<f64, ClassifierError> {
            Err(ClassifierError::PredictionFailed("backend down".into()))
        }
    }

    fn test_image() -> ImageHandle {
        Arc::new(DynamicImage::new_rgb8(4, 4))
    }

    #[tokio::test]
    async fn derives_classification_from_probability() {
        let engine = AnalysisEngine::new(Arc::new(Fixed(0.92)));
        let result = engine.execute(test_image()).await.unwrap();
        assert_eq!(result.classification(), ClassificationKind::Malignant);
        assert_eq!(result.malignant_probability(), 0.92);

        let engine = AnalysisEngine::new(Arc::new(Fixed(0.3)));
        let result = engine.execute(test_image()).await.unwrap();
        assert_eq!(result.classification(), ClassificationKind::Benign);
        assert!(!result.needs_secondary_checkup());
    }

    #[tokio::test]
    async fn clamps_out_of_range_backend_output() {
        let engine = AnalysisEngine::new(Arc::new(Fixed(1.4)));
        let result = engine.execute(test_image()).await.unwrap();
        assert_eq!(result.malignant_probability(), 1.0);
    }

    #[tokio::test]
    async fn classifier_errors_pass_through_unchanged() {
        let engine = AnalysisEngine::new(Arc::new(Failing));
        let err = engine.execute(test_image()).await.unwrap_err();
        assert_eq!(
            err,
            ClassifierError::PredictionFailed("backend down".into())
        );
    }
}
