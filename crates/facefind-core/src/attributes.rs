//! Soft face attributes for the enriched detection profile.
//!
//! Expressions come from the FER+ `emotion-ferplus-8` model (64×64 grayscale),
//! age and gender from the InsightFace `genderage` model (96×96 RGB).

use crate::crop::crop_region;
use crate::types::{BoundingBox, Expression, Expressions, FaceAttributes, Gender, GenderEstimate};
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EXPRESSION_INPUT_SIZE: u32 = 64;
const AGE_GENDER_INPUT_SIZE: u32 = 96;

/// FER+ output classes, in model order, mapped onto our expressions.
/// `None` marks contempt, which has no counterpart and is dropped.
const FERPLUS_CLASSES: [Option<Expression>; 8] = [
    Some(Expression::Neutral),
    Some(Expression::Happy),
    Some(Expression::Surprised),
    Some(Expression::Sad),
    Some(Expression::Angry),
    Some(Expression::Disgusted),
    Some(Expression::Fearful),
    None,
];

#[derive(Error, Debug)]
pub enum AttributeError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the image")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct AttributeEstimator {
    expression: Session,
    age_gender: Session,
}

impl AttributeEstimator {
    pub fn load(
        expression_model: &Path,
        age_gender_model: &Path,
        intra_threads: usize,
    ) -> Result<Self, AttributeError> {
        Ok(Self {
            expression: load_session(expression_model, intra_threads)?,
            age_gender: load_session(age_gender_model, intra_threads)?,
        })
    }

    pub fn estimate(&mut self, image: &DynamicImage, bbox: &BoundingBox) -> Result<FaceAttributes, AttributeError> {
        let region =
            crop_region(image.width(), image.height(), bbox, 0.0).ok_or(AttributeError::EmptyCrop)?;
        let face = image.crop_imm(region.x, region.y, region.width, region.height);

        let input = expression_input(&face);
        let outputs = self.expression.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AttributeError::InferenceFailed(format!("expression: {e}")))?;
        let expressions = expressions_from_logits(logits)?;
        drop(outputs);

        let input = age_gender_input(&face);
        let outputs = self.age_gender.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AttributeError::InferenceFailed(format!("age/gender: {e}")))?;
        let (age, gender) = age_gender_from_output(raw)?;

        Ok(FaceAttributes {
            expressions,
            age,
            gender,
        })
    }
}

fn load_session(path: &Path, intra_threads: usize) -> Result<Session, AttributeError> {
    if !path.exists() {
        return Err(AttributeError::ModelNotFound(path.display().to_string()));
    }
    let session = Session::builder()?
        .with_intra_threads(intra_threads)?
        .commit_from_file(path)?;
    tracing::info!(path = %path.display(), "loaded attribute model");
    Ok(session)
}

/// 1×1×64×64 grayscale tensor with raw 0–255 intensities.
fn expression_input(face: &DynamicImage) -> Array4<f32> {
    let size = EXPRESSION_INPUT_SIZE;
    let gray = face.resize_exact(size, size, FilterType::Triangle).to_luma8();

    let mut tensor = Array4::<f32>::zeros((1, 1, size as usize, size as usize));
    for (x, y, pixel) in gray.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = pixel.0[0] as f32;
    }
    tensor
}

/// 1×3×96×96 RGB tensor with raw 0–255 intensities.
fn age_gender_input(face: &DynamicImage) -> Array4<f32> {
    let size = AGE_GENDER_INPUT_SIZE;
    let rgb = face.resize_exact(size, size, FilterType::Triangle).to_rgb8();

    let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32;
        }
    }
    tensor
}

fn expressions_from_logits(logits: &[f32]) -> Result<Expressions, AttributeError> {
    if logits.len() != FERPLUS_CLASSES.len() {
        return Err(AttributeError::InferenceFailed(format!(
            "expected {} expression logits, got {}",
            FERPLUS_CLASSES.len(),
            logits.len()
        )));
    }

    let mut kept = [0.0f32; 7];
    for (class, &logit) in FERPLUS_CLASSES.iter().zip(logits) {
        if let Some(expression) = class {
            kept[*expression as usize] = logit;
        }
    }
    Expressions::new(softmax(kept)).map_err(|e| AttributeError::InferenceFailed(e.to_string()))
}

/// Model output `[female, male, age / 100]`.
fn age_gender_from_output(raw: &[f32]) -> Result<(f32, GenderEstimate), AttributeError> {
    let [female, male, age] = raw else {
        return Err(AttributeError::InferenceFailed(format!(
            "expected 3 age/gender outputs, got {}",
            raw.len()
        )));
    };

    let [p_female, p_male] = softmax([*female, *male]);
    let gender = if p_male > p_female {
        GenderEstimate {
            gender: Gender::Male,
            probability: p_male,
        }
    } else {
        GenderEstimate {
            gender: Gender::Female,
            probability: p_female,
        }
    };

    Ok(((age * 100.0).max(0.0), gender))
}

fn softmax<const N: usize>(logits: [f32; N]) -> [f32; N] {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps = logits.map(|l| (l - max).exp());
    let sum: f32 = exps.iter().sum();
    exps.map(|e| e / sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax([1.0, 2.0, 3.0, 0.5, -1.0, 0.0, 4.0]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(p[6] > p[2]);
    }

    #[test]
    fn test_expressions_drop_contempt_and_reorder() {
        // FER+ order: neutral, happiness, surprise, sadness, anger, disgust, fear, contempt
        let logits = [0.0, 0.0, 9.0, 0.0, 0.0, 0.0, 0.0, 50.0];
        let e = expressions_from_logits(&logits).unwrap();
        assert_eq!(e.dominant().0, Expression::Surprised);
        let total: f32 = e.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_expressions_wrong_length() {
        assert!(expressions_from_logits(&[0.0; 7]).is_err());
    }

    #[test]
    fn test_age_gender_decoding() {
        let (age, gender) = age_gender_from_output(&[-1.0, 2.0, 0.34]).unwrap();
        assert!((age - 34.0).abs() < 1e-4);
        assert_eq!(gender.gender, Gender::Male);
        assert!(gender.probability > 0.9);

        let (age, gender) = age_gender_from_output(&[3.0, 0.0, -0.1]).unwrap();
        assert_eq!(age, 0.0);
        assert_eq!(gender.gender, Gender::Female);
    }

    #[test]
    fn test_age_gender_wrong_length() {
        assert!(age_gender_from_output(&[0.1, 0.2]).is_err());
    }

    #[test]
    fn test_input_shapes() {
        let face = DynamicImage::new_rgb8(30, 40);
        assert_eq!(expression_input(&face).shape(), &[1, 1, 64, 64]);
        assert_eq!(age_gender_input(&face).shape(), &[1, 3, 96, 96]);
    }
}
