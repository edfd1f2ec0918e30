//! Choosing the one embedding that stands for the person being searched for.

use crate::extractor::{ExtractionError, FaceExtractor};
use crate::types::{DetectedFace, Embedding};
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no face found in the reference image; try another reference photo")]
pub struct NoFaceFound;

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error(transparent)]
    NoFaceFound(#[from] NoFaceFound),
    #[error("reference extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
}

/// Pick the canonical embedding among the faces of a reference image.
///
/// A reference photo is expected to be a portrait, so the largest face wins.
/// Equal areas keep the first face in detection order.
pub fn select_reference(faces: &[DetectedFace]) -> Result<&Embedding, NoFaceFound> {
    faces
        .iter()
        .reduce(|best, face| {
            if face.bbox.area() > best.bbox.area() {
                face
            } else {
                best
            }
        })
        .map(|face| &face.embedding)
        .ok_or(NoFaceFound)
}

/// Run the extractor on a reference image and select its canonical embedding.
///
/// Unlike batch photos, a failing reference image is reported to the caller.
pub fn reference_from_image<E: FaceExtractor + ?Sized>(
    extractor: &mut E,
    image: &DynamicImage,
) -> Result<Embedding, ReferenceError> {
    let faces = extractor.extract_faces(image)?;
    tracing::debug!(faces = faces.len(), "reference: faces detected");
    let embedding = select_reference(&faces)?.clone();
    Ok(embedding)
}
