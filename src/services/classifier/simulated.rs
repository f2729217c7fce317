use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::error::ClassifierError;
use crate::models::analysis_types::ImageHandle;
use crate::services::classifier::Classifier;

/// Probability policy for the simulated backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimulationMode {
    /// Uniform over [0.0, 1.0].
    #[default]
    Random,
    /// Uniform over [0.80, 0.95] — exercises the secondary-checkup path.
    HighRisk,
    /// Uniform over [0.05, 0.30].
    LowRisk,
}

/// Stand-in classifier used until a trained model is wired in.
///
/// Honors the full [`Classifier`] contract (dimension validation, error
/// taxonomy) and models inference cost with an artificial latency, so the
/// session layer behaves exactly as it will against a real backend.
pub struct SimulatedClassifier {
    mode: SimulationMode,
    latency_min: Duration,
    latency_max: Duration,
    state: AtomicU64,
}

const SPLITMIX_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

impl SimulatedClassifier {
    pub fn new(mode: SimulationMode) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(SPLITMIX_GAMMA);
        Self {
            mode,
            latency_min: Duration::from_secs(1),
            latency_max: Duration::from_secs(2),
            state: AtomicU64::new(seed),
        }
    }

    /// Fixed seed for reproducible probability sequences in tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.state = AtomicU64::new(seed);
        self
    }

    /// Override the simulated inference latency. `Duration::ZERO` for both
    /// bounds disables the sleep entirely.
    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.latency_min = min;
        self.latency_max = max.max(min);
        self
    }

    // splitmix64 step over an advancing counter; uniform in [0, 1).
    fn next_unit(&self) -> f64 {
        let mut z = self
            .state
            .fetch_add(SPLITMIX_GAMMA, Ordering::Relaxed)
            .wrapping_add(SPLITMIX_GAMMA);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        (z >> 11) as f64 / (1u64 << 53) as f64
    }

    fn sample_latency(&self) -> Duration {
        let span = self.latency_max.saturating_sub(self.latency_min);
        if span.is_zero() {
            return self.latency_min;
        }
        self.latency_min + span.mul_f64(self.next_unit())
    }
}

impl Default for SimulatedClassifier {
    fn default() -> Self {
        Self::new(SimulationMode::Random)
    }
}

#[async_trait]
impl Classifier for SimulatedClassifier {
    async fn predict(&self, image: &ImageHandle) -> Result<f64, ClassifierError> {
        let latency = self.sample_latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if image.width() == 0 || image.height() == 0 {
            return Err(ClassifierError::InvalidImage);
        }

        Ok(match self.mode {
            SimulationMode::Random => self.next_unit(),
            SimulationMode::HighRisk => 0.80 + self.next_unit() * 0.15,
            SimulationMode::LowRisk => 0.05 + self.next_unit() * 0.25,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use image::DynamicImage;

    use super::*;

    fn instant(mode: SimulationMode) -> SimulatedClassifier {
        SimulatedClassifier::new(mode)
            .with_seed(7)
            .with_latency(Duration::ZERO, Duration::ZERO)
    }

    fn image(w: u32, h: u32) -> ImageHandle {
        Arc::new(DynamicImage::new_rgb8(w, h))
    }

    #[tokio::test]
    async fn policies_stay_inside_their_ranges() {
        let random = instant(SimulationMode::Random);
        let high = instant(SimulationMode::HighRisk);
        let low = instant(SimulationMode::LowRisk);
        let img = image(8, 8);

        for _ in 0..200 {
            let p = random.predict(&img).await.unwrap();
            assert!((0.0..1.0).contains(&p), "random policy out of range: {p}");

            let p = high.predict(&img).await.unwrap();
            assert!((0.80..=0.95).contains(&p), "high-risk policy out of range: {p}");

            let p = low.predict(&img).await.unwrap();
            assert!((0.05..=0.30).contains(&p), "low-risk policy out of range: {p}");
        }
    }

    #[tokio::test]
    async fn zero_dimension_image_is_rejected() {
        let classifier = instant(SimulationMode::Random);
        let err = classifier.predict(&image(0, 0)).await.unwrap_err();
        assert_eq!(err, ClassifierError::InvalidImage);
    }

    #[tokio::test]
    async fn same_seed_replays_the_same_sequence() {
        let img = image(4, 4);
        let a = instant(SimulationMode::Random);
        let b = instant(SimulationMode::Random);
        for _ in 0..16 {
            assert_eq!(
                a.predict(&img).await.unwrap(),
                b.predict(&img).await.unwrap()
            );
        }
    }
}
