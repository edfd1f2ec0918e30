//! Euclidean comparison of face embeddings.
//!
//! Lower distance means more similar. Descriptors of the same person from the
//! recognition model usually sit well below 1.0 from each other; that is where
//! the default match threshold comes from, not a hard bound.

use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("embedding dimension mismatch: expected {expected}, found {found}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub found: usize,
}

/// Euclidean distance between two embeddings.
///
/// # Panics
///
/// Panics when the embeddings have different dimensionality. Mixing
/// descriptors from different models is a caller bug; use [`try_distance`]
/// when the input has not been validated.
pub fn distance(a: &Embedding, b: &Embedding) -> f32 {
    match try_distance(a, b) {
        Ok(d) => d,
        Err(e) => panic!("{e}"),
    }
}

/// Euclidean distance, reporting mismatched dimensionality as an error.
pub fn try_distance(a: &Embedding, b: &Embedding) -> Result<f32, DimensionMismatch> {
    let (a, b) = (a.values(), b.values());
    if a.len() != b.len() {
        return Err(DimensionMismatch {
            expected: a.len(),
            found: b.len(),
        });
    }

    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt())
}

/// Similarity score in [0, 1] derived from a distance.
pub fn score_from_distance(distance: f32) -> f32 {
    (1.0 - distance).max(0.0)
}
