//! Scripted classifier backends and image fixtures for the session tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use tokio::sync::Semaphore;

use skin_lense::{Classifier, ClassifierError, ImageHandle};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_image(width: u32, height: u32) -> ImageHandle {
    Arc::new(DynamicImage::new_rgb8(width, height))
}

/// Completes immediately with a fixed probability and counts invocations.
pub struct FixedClassifier {
    probability: f64,
    calls: AtomicUsize,
}

impl FixedClassifier {
    pub fn new(probability: f64) -> Self {
        Self {
            probability,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Classifier for FixedClassifier {
    async fn predict(&self, _image: &ImageHandle) -> Result<f64, ClassifierError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.probability)
    }
}

/// Always fails with the given error.
pub struct FailingClassifier(pub ClassifierError);

#[async_trait]
impl Classifier for FailingClassifier {
    async fn predict(&self, _image: &ImageHandle) -> Result<f64, ClassifierError> {
        Err(self.0.clone())
    }
}

/// Holds every `predict` call until the test releases it, then answers from
/// a script indexed by call order. Lets a test park an analysis in flight,
/// supersede it, and only then let the stale outcome arrive.
pub struct GatedClassifier {
    gate: Semaphore,
    calls: AtomicUsize,
    script: Vec<f64>,
}

impl GatedClassifier {
    pub fn new(script: Vec<f64>) -> Self {
        Self {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
            script,
        }
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Classifier for GatedClassifier {
    async fn predict(&self, _image: &ImageHandle) -> Result<f64, ClassifierError> {
        let index = self.calls.fetch_add(1, Ordering::Relaxed);
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        Ok(self.script[index % self.script.len()])
    }
}

/// Let spawned tasks (the in-flight analysis, the warning timer) run.
pub async fn drain() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
