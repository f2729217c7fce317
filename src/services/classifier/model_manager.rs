use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use log::{debug, info};
use ort::session::Session;

use crate::error::ClassifierError;

/// Where to fetch a skin-lesion model from and how to feed it.
///
/// The crate ships no model of its own; callers point this at an exported
/// ONNX classifier (binary malignant/benign head, or a multi-class head
/// whose config labels one class as malignant).
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub model_url: String,
    pub config_url: String,
    pub model_file: String,
    pub config_file: String,
    /// Square input edge in pixels, e.g. 224.
    pub input_size: u32,
}

/// Downloads, loads, and holds the ONNX session used by
/// [`OnnxClassifier`](crate::services::classifier::OnnxClassifier).
pub struct OnnxModelManager {
    model_dir: PathBuf,
    spec: ModelSpec,
    session: Arc<Mutex<Option<Session>>>,
    malignant_index: Mutex<Option<usize>>,
    cancel_flag: Arc<AtomicBool>,
}

impl OnnxModelManager {
    pub fn new(model_dir: PathBuf, spec: ModelSpec) -> Self {
        Self {
            model_dir,
            spec,
            session: Arc::new(Mutex::new(None)),
            malignant_index: Mutex::new(None),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.spec.model_file)
    }

    pub fn config_path(&self) -> PathBuf {
        self.model_dir.join(&self.spec.config_file)
    }

    pub fn input_size(&self) -> u32 {
        self.spec.input_size
    }

    pub fn is_downloaded(&self) -> bool {
        self.model_path().exists() && self.config_path().exists()
    }

    pub fn is_ready(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    pub fn cancel_download(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    /// Malignant class index resolved from the model config, if the config
    /// carries labels. `None` means a single-logit head.
    pub fn malignant_index(&self) -> Option<usize> {
        *self.malignant_index.lock().unwrap()
    }

    pub(crate) fn session_slot(&self) -> Arc<Mutex<Option<Session>>> {
        self.session.clone()
    }

    /// Fetch the model and its config if they are not already on disk.
    /// `progress` receives the overall percentage of the file currently
    /// downloading.
    pub async fn download<F>(&self, progress: F) -> Result<(), ClassifierError>
    where
        F: Fn(u64) + Send,
    {
        if self.is_downloaded() {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.model_dir)
            .await
            .map_err(|e| {
                ClassifierError::PredictionFailed(format!(
                    "failed to create model directory {}: {e}",
                    self.model_dir.display()
                ))
            })?;

        self.cancel_flag.store(false, Ordering::Relaxed);

        let config_path = self.config_path();
        if !config_path.exists() {
            download_file(&self.spec.config_url, &config_path, &self.cancel_flag, &progress)
                .await?;
        }

        let model_path = self.model_path();
        if !model_path.exists() {
            download_file(&self.spec.model_url, &model_path, &self.cancel_flag, &progress)
                .await?;
        }

        info!("model downloaded to {}", self.model_dir.display());
        Ok(())
    }

    /// Parse the model config and build the ONNX session. Heavy work runs on
    /// a blocking thread.
    pub async fn load(&self) -> Result<(), ClassifierError> {
        if self.is_ready() {
            return Ok(());
        }

        let config_path = self.config_path();
        let config_text = tokio::fs::read_to_string(&config_path).await.map_err(|e| {
            ClassifierError::PredictionFailed(format!(
                "failed to read model config {}: {e}",
                config_path.display()
            ))
        })?;
        let config: serde_json::Value = serde_json::from_str(&config_text).map_err(|e| {
            ClassifierError::PredictionFailed(format!("failed to parse model config: {e}"))
        })?;
        *self.malignant_index.lock().unwrap() = malignant_index_from_config(&config);

        let model_path = self.model_path();
        let session = tokio::task::spawn_blocking(move || -> Result<Session, ClassifierError> {
            let _ = ort::init().with_name("skin-lense").commit();

            let session = Session::builder()
                .map_err(|e| {
                    ClassifierError::PredictionFailed(format!(
                        "failed to create session builder: {e}"
                    ))
                })?
                .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
                .map_err(|e| {
                    ClassifierError::PredictionFailed(format!(
                        "failed to set optimization level: {e}"
                    ))
                })?
                .with_intra_threads(4)
                .map_err(|e| {
                    ClassifierError::PredictionFailed(format!("failed to set intra threads: {e}"))
                })?
                .commit_from_file(&model_path)
                .map_err(|e| {
                    ClassifierError::PredictionFailed(format!(
                        "failed to load ONNX model {}: {e}",
                        model_path.display()
                    ))
                })?;
            Ok(session)
        })
        .await
        .map_err(|e| {
            ClassifierError::PredictionFailed(format!("model loading task failed: {e}"))
        })??;

        *self.session.lock().unwrap() = Some(session);
        info!("model session ready");
        Ok(())
    }
}

/// Resolve which output class means "malignant" from a HuggingFace-style
/// config's `id2label` table. Absent or unlabeled configs yield `None`,
/// which the inference side treats as a single-logit head.
fn malignant_index_from_config(config: &serde_json::Value) -> Option<usize> {
    let id2label = config.get("id2label")?.as_object()?;
    for (key, value) in id2label {
        let label = value.as_str().unwrap_or_default().to_ascii_lowercase();
        if label.contains("malignant") || label.contains("melanoma") {
            return key.parse().ok();
        }
    }
    None
}

async fn download_file<F>(
    url: &str,
    dest: &PathBuf,
    cancel_flag: &AtomicBool,
    progress: &F,
) -> Result<(), ClassifierError>
where
    F: Fn(u64) + Send,
{
    debug!("downloading {url}");
    let client = reqwest::Client::new();
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ClassifierError::PredictionFailed(format!("failed to fetch {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(ClassifierError::PredictionFailed(format!(
            "failed to download {url}: HTTP {}",
            response.status()
        )));
    }

    let total_size = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;
    let mut last_reported = 0;

    let mut file = tokio::fs::File::create(dest).await.map_err(|e| {
        ClassifierError::PredictionFailed(format!(
            "failed to create file {}: {e}",
            dest.display()
        ))
    })?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        if cancel_flag.load(Ordering::Relaxed) {
            drop(file);
            let _ = tokio::fs::remove_file(dest).await;
            return Err(ClassifierError::PredictionFailed(
                "model download cancelled".into(),
            ));
        }

        let chunk = chunk.map_err(|e| {
            ClassifierError::PredictionFailed(format!("download stream error: {e}"))
        })?;
        downloaded += chunk.len() as u64;
        tokio::io::AsyncWriteExt::write_all(&mut file, &chunk)
            .await
            .map_err(|e| {
                ClassifierError::PredictionFailed(format!("failed to write model file: {e}"))
            })?;

        if total_size > 0 {
            let percent = (downloaded * 100) / total_size;
            if percent > last_reported {
                progress(percent);
                last_reported = percent;
            }
        }
    }
    progress(100);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malignant_index_is_read_from_id2label() {
        let config = serde_json::json!({
            "id2label": { "0": "benign", "1": "Malignant" }
        });
        assert_eq!(malignant_index_from_config(&config), Some(1));

        let config = serde_json::json!({
            "id2label": { "0": "melanoma", "1": "nevus" }
        });
        assert_eq!(malignant_index_from_config(&config), Some(0));
    }

    #[test]
    fn configs_without_labels_yield_none() {
        assert_eq!(
            malignant_index_from_config(&serde_json::json!({ "input_size": 224 })),
            None
        );
        assert_eq!(
            malignant_index_from_config(&serde_json::json!({
                "id2label": { "0": "cat", "1": "dog" }
            })),
            None
        );
    }
}
