//! Boundary between the matching engine and whatever model finds faces.

use crate::attributes::AttributeError;
use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;
use crate::types::{DetectedFace, PhotoId};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("attribute estimation error: {0}")]
    Attributes(#[from] AttributeError),
}

/// Which detection contract an extractor fulfils.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionProfile {
    /// Embedding and box only.
    #[default]
    Minimal,
    /// Embedding and box plus expressions, age and gender.
    Enriched,
}

impl std::str::FromStr for DetectionProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "enriched" => Ok(Self::Enriched),
            other => Err(format!("unknown detection profile {other:?} (expected minimal or enriched)")),
        }
    }
}

/// Finds faces in a decoded image and describes each one.
pub trait FaceExtractor {
    fn extract_faces(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, ExtractionError>;

    fn profile(&self) -> DetectionProfile;

    /// Release whatever the extractor holds. Called once, after its last use.
    fn close(self)
    where
        Self: Sized,
    {
    }
}

/// Extract faces from one batch photo, degrading a failure to "no faces".
///
/// A broken photo must not abort the rest of the batch.
pub fn extract_or_empty<E: FaceExtractor + ?Sized>(
    extractor: &mut E,
    photo: &PhotoId,
    image: &DynamicImage,
) -> Vec<DetectedFace> {
    match extractor.extract_faces(image) {
        Ok(faces) => {
            tracing::debug!(photo = %photo, faces = faces.len(), "faces extracted");
            faces
        }
        Err(err) => {
            tracing::warn!(photo = %photo, error = %err, "extraction failed; treating photo as faceless");
            Vec::new()
        }
    }
}
