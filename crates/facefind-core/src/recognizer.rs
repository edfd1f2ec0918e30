//! 128-d face descriptor extraction via ONNX Runtime.
//!
//! Runs a ResNet descriptor model (dlib `face_recognition_resnet_model_v1`
//! export) on a 150×150 RGB crop of the detected box. Descriptors of the same
//! person land within ~0.6 Euclidean distance of each other, so the raw output
//! is kept as-is (no L2 normalisation).

use crate::crop::crop_region;
use crate::types::{BoundingBox, Embedding, EMBEDDING_DIM};
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const RECOGNIZER_INPUT_SIZE: u32 = 150;
const RECOGNIZER_MEAN: [f32; 3] = [122.782, 117.001, 104.298];
const RECOGNIZER_SCALE: f32 = 1.0 / 256.0;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the image")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded descriptor model"
        );

        Ok(Self { session })
    }

    /// Compute the descriptor for the face inside `bbox`.
    pub fn extract(&mut self, image: &DynamicImage, bbox: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let region =
            crop_region(image.width(), image.height(), bbox, 0.0).ok_or(RecognizerError::EmptyCrop)?;
        let face = image.crop_imm(region.x, region.y, region.width, region.height);
        let input = preprocess(&face);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        into_embedding(raw.to_vec())
    }
}

/// Resize a face crop to the model input and normalise each RGB channel.
fn preprocess(face: &DynamicImage) -> Array4<f32> {
    let size = RECOGNIZER_INPUT_SIZE;
    let rgb = face.resize_exact(size, size, FilterType::Triangle).to_rgb8();

    let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] =
                (pixel.0[c] as f32 - RECOGNIZER_MEAN[c]) * RECOGNIZER_SCALE;
        }
    }
    tensor
}

fn into_embedding(raw: Vec<f32>) -> Result<Embedding, RecognizerError> {
    if raw.len() != EMBEDDING_DIM {
        return Err(RecognizerError::InferenceFailed(format!(
            "expected {EMBEDDING_DIM}-dim descriptor, got {}",
            raw.len()
        )));
    }
    Embedding::new(raw).map_err(|e| RecognizerError::InferenceFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_preprocess_output_shape() {
        let face = DynamicImage::new_rgb8(37, 52);
        let tensor = preprocess(&face);
        assert_eq!(tensor.shape(), &[1, 3, 150, 150]);
    }

    #[test]
    fn test_preprocess_channel_means() {
        let face = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([200, 100, 50])));
        let tensor = preprocess(&face);
        for c in 0..3 {
            let expected = ([200.0, 100.0, 50.0][c] - RECOGNIZER_MEAN[c]) / 256.0;
            let got = tensor[[0, c, 75, 75]];
            assert!((got - expected).abs() < 1e-5, "channel {c}: got {got}, expected {expected}");
        }
    }

    #[test]
    fn test_into_embedding_checks_dimension() {
        assert!(into_embedding(vec![0.1; EMBEDDING_DIM]).is_ok());
        assert!(matches!(
            into_embedding(vec![0.1; 512]),
            Err(RecognizerError::InferenceFailed(_))
        ));
    }

    #[test]
    fn test_into_embedding_rejects_nan() {
        let mut raw = vec![0.0; EMBEDDING_DIM];
        raw[3] = f32::NAN;
        assert!(into_embedding(raw).is_err());
    }

    #[test]
    fn test_load_missing_model() {
        let result = FaceRecognizer::load(Path::new("/nonexistent/recognizer.onnx"), 1);
        assert!(matches!(result, Err(RecognizerError::ModelNotFound(_))));
    }
}
