use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::Serialize;

/// Opaque in-memory image handle passed into the analysis pipeline.
///
/// Callers acquire images however they like (photo library, camera, test
/// fixture) and hand them over as a shared, immutable bitmap.
pub type ImageHandle = Arc<DynamicImage>;

/// Probability at or above which a lesion is classified malignant.
pub const MALIGNANT_THRESHOLD: f64 = 0.5;

/// Probability at or above which a secondary clinical checkup is advised.
pub const SECONDARY_CHECKUP_THRESHOLD: f64 = 0.8;

/// Clamp a raw classifier output into the [0.0, 1.0] probability range.
/// NaN is treated as no signal and maps to 0.0.
pub(crate) fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClassificationKind {
    Benign,
    Malignant,
}

impl ClassificationKind {
    /// Derive the classification from a malignancy probability.
    /// Never stored independently of the probability that produced it.
    pub fn from_probability(probability: f64) -> Self {
        if probability >= MALIGNANT_THRESHOLD {
            ClassificationKind::Malignant
        } else {
            ClassificationKind::Benign
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ClassificationKind::Benign => "Benign",
            ClassificationKind::Malignant => "Malignant suspected",
        }
    }

    /// One-line recommendation shown next to the result.
    pub fn advice(&self) -> &'static str {
        match self {
            ClassificationKind::Benign => "No cause for concern",
            ClassificationKind::Malignant => "Consultation with a specialist is recommended",
        }
    }
}

/// Outcome of one completed analysis.
///
/// Constructed once per successful analysis and never mutated; the
/// probability is clamped into range and the classification derived from it
/// at construction, so the two cannot disagree.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    #[serde(skip_serializing)]
    image: ImageHandle,
    classification: ClassificationKind,
    malignant_probability: f64,
    analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn new(image: ImageHandle, probability: f64) -> Self {
        let malignant_probability = clamp_probability(probability);
        Self {
            image,
            classification: ClassificationKind::from_probability(malignant_probability),
            malignant_probability,
            analyzed_at: Utc::now(),
        }
    }

    /// The image this result was computed from.
    pub fn image(&self) -> &ImageHandle {
        &self.image
    }

    pub fn classification(&self) -> ClassificationKind {
        self.classification
    }

    /// Malignancy probability in [0.0, 1.0].
    pub fn malignant_probability(&self) -> f64 {
        self.malignant_probability
    }

    pub fn analyzed_at(&self) -> DateTime<Utc> {
        self.analyzed_at
    }

    /// Probability as a whole percentage, 0..=100.
    pub fn probability_percentage(&self) -> u8 {
        (self.malignant_probability * 100.0) as u8
    }

    pub fn confidence_text(&self) -> String {
        format!("{}%", self.probability_percentage())
    }

    /// Whether the risk is high enough to advise a secondary checkup.
    pub fn needs_secondary_checkup(&self) -> bool {
        self.malignant_probability >= SECONDARY_CHECKUP_THRESHOLD
    }
}

/// User-facing lifecycle of one analysis session.
///
/// `Failed` compares by message so reactive consumers see two differently
/// worded failures as distinct states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub enum SessionState {
    #[default]
    Idle,
    Analyzing,
    Succeeded,
    Failed(String),
}

impl SessionState {
    pub fn is_analyzing(&self) -> bool {
        matches!(self, SessionState::Analyzing)
    }
}

/// Read-only view of the session, published on every change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub result: Option<AnalysisResult>,
    pub warning: bool,
    pub can_analyze: bool,
}

impl SessionSnapshot {
    pub fn is_analyzing(&self) -> bool {
        self.state.is_analyzing()
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }
}
