//! Explicitly constructed inference state: every loaded model lives here.

use crate::attributes::{AttributeError, AttributeEstimator};
use crate::detector::{DetectorError, FaceDetector};
use crate::extractor::{DetectionProfile, ExtractionError, FaceExtractor};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::DetectedFace;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "dlib_face_recognition_resnet_model_v1.onnx";
pub const EXPRESSION_MODEL_FILE: &str = "emotion-ferplus-8.onnx";
pub const AGE_GENDER_MODEL_FILE: &str = "genderage.onnx";

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("attribute models: {0}")]
    Attributes(#[from] AttributeError),
}

/// Locations of the ONNX models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
    pub expression: PathBuf,
    pub age_gender: PathBuf,
}

impl ModelPaths {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            recognizer: dir.join(RECOGNIZER_MODEL_FILE),
            expression: dir.join(EXPRESSION_MODEL_FILE),
            age_gender: dir.join(AGE_GENDER_MODEL_FILE),
        }
    }
}

/// Default model directory: `$XDG_DATA_HOME/facefind/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facefind/models")
}

/// Detector, recognizer and (enriched profile only) attribute models.
///
/// Built once with [`InferenceContext::load`], passed by `&mut` to whoever
/// extracts faces, and torn down with [`FaceExtractor::close`].
pub struct InferenceContext {
    profile: DetectionProfile,
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    attributes: Option<AttributeEstimator>,
}

impl InferenceContext {
    /// Load every model the profile needs. Fails fast on the first missing one.
    pub fn load(
        paths: &ModelPaths,
        profile: DetectionProfile,
        intra_threads: usize,
    ) -> Result<Self, ContextError> {
        let detector = FaceDetector::load(&paths.detector, intra_threads)?;
        let recognizer = FaceRecognizer::load(&paths.recognizer, intra_threads)?;
        let attributes = match profile {
            DetectionProfile::Minimal => None,
            DetectionProfile::Enriched => Some(AttributeEstimator::load(
                &paths.expression,
                &paths.age_gender,
                intra_threads,
            )?),
        };

        tracing::info!(?profile, intra_threads, "inference context ready");
        Ok(Self {
            profile,
            detector,
            recognizer,
            attributes,
        })
    }
}

impl FaceExtractor for InferenceContext {
    fn extract_faces(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, ExtractionError> {
        let detections = self.detector.detect(image)?;

        let mut faces = Vec::with_capacity(detections.len());
        for detection in detections {
            let embedding = self.recognizer.extract(image, &detection.bbox)?;
            let attributes = match self.attributes.as_mut() {
                Some(estimator) => Some(estimator.estimate(image, &detection.bbox)?),
                None => None,
            };
            faces.push(DetectedFace {
                embedding,
                bbox: detection.bbox,
                confidence: detection.confidence,
                attributes,
            });
        }
        Ok(faces)
    }

    fn profile(&self) -> DetectionProfile {
        self.profile
    }

    /// Drop every model session.
    fn close(self) {
        tracing::info!(profile = ?self.profile, "inference context closed");
    }
}
