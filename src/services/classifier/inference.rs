use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use ndarray::Array4;
use ort::value::Value;

use crate::error::ClassifierError;
use crate::models::analysis_types::ImageHandle;
use crate::services::classifier::model_manager::OnnxModelManager;
use crate::services::classifier::Classifier;

// ImageNet normalization constants
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resize, normalize, and lay the image out as an NCHW tensor.
pub fn preprocess_image(
    image: &DynamicImage,
    input_size: u32,
) -> Result<Array4<f32>, ClassifierError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ClassifierError::InvalidImage);
    }

    let rgb = image
        .resize_exact(input_size, input_size, image::imageops::FilterType::Triangle)
        .to_rgb8();

    let hw = (input_size * input_size) as usize;
    let mut data = vec![0f32; 3 * hw];
    for (i, pixel) in rgb.into_raw().chunks_exact(3).enumerate() {
        data[i] = (pixel[0] as f32 / 255.0 - MEAN[0]) / STD[0];
        data[hw + i] = (pixel[1] as f32 / 255.0 - MEAN[1]) / STD[1];
        data[2 * hw + i] = (pixel[2] as f32 / 255.0 - MEAN[2]) / STD[2];
    }

    Array4::from_shape_vec((1, 3, input_size as usize, input_size as usize), data).map_err(|e| {
        ClassifierError::PredictionFailed(format!("failed to build input tensor: {e}"))
    })
}

/// Map raw model output to a malignancy probability.
///
/// A single-logit head goes through sigmoid; a multi-logit head goes through
/// softmax and the malignant class (index 1 when the config names none) is
/// read out.
pub fn malignant_probability(
    logits: &[f32],
    malignant_index: Option<usize>,
) -> Result<f64, ClassifierError> {
    match logits {
        [] => Err(ClassifierError::PredictionFailed(
            "model produced no output".into(),
        )),
        [logit] => Ok(1.0 / (1.0 + (-f64::from(*logit)).exp())),
        _ => {
            let max_logit = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            let exp_sum: f32 = logits.iter().map(|&x| (x - max_logit).exp()).sum();
            let index = malignant_index.unwrap_or(1);
            let logit = logits.get(index).ok_or_else(|| {
                ClassifierError::PredictionFailed(format!(
                    "malignant class index {index} out of range for {} outputs",
                    logits.len()
                ))
            })?;
            Ok(f64::from((logit - max_logit).exp() / exp_sum))
        }
    }
}

/// Classifier backed by a loaded ONNX model.
pub struct OnnxClassifier {
    manager: Arc<OnnxModelManager>,
}

impl OnnxClassifier {
    pub fn new(manager: Arc<OnnxModelManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Classifier for OnnxClassifier {
    async fn predict(&self, image: &ImageHandle) -> Result<f64, ClassifierError> {
        let input = preprocess_image(image, self.manager.input_size())?;
        let malignant_index = self.manager.malignant_index();
        let slot = self.manager.session_slot();

        // Inference holds the session lock; run it off the async threads.
        let logits = tokio::task::spawn_blocking(move || -> Result<Vec<f32>, ClassifierError> {
            let mut guard = slot.lock().unwrap();
            let session = guard.as_mut().ok_or_else(|| {
                ClassifierError::PredictionFailed("model is not loaded".into())
            })?;

            let input_name = session
                .inputs()
                .first()
                .map(|i| i.name().to_string())
                .ok_or_else(|| {
                    ClassifierError::PredictionFailed("model declares no inputs".into())
                })?;

            let input_tensor = Value::from_array(input).map_err(|e| {
                ClassifierError::PredictionFailed(format!("failed to create tensor value: {e}"))
            })?;

            let outputs = session
                .run(ort::inputs![input_name.as_str() => input_tensor])
                .map_err(|e| ClassifierError::PredictionFailed(format!("inference failed: {e}")))?;

            let output_value = outputs.values().next().ok_or_else(|| {
                ClassifierError::PredictionFailed("model produced no outputs".into())
            })?;

            let (_, data) = output_value.try_extract_tensor::<f32>().map_err(|e| {
                ClassifierError::PredictionFailed(format!("failed to extract output tensor: {e}"))
            })?;

            Ok(data.to_vec())
        })
        .await
        .map_err(|e| ClassifierError::PredictionFailed(format!("inference task failed: {e}")))??;

        malignant_probability(&logits, malignant_index)
    }
}
