use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Dimensionality of the identity descriptors produced by the recognizer.
pub const EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidEmbedding {
    #[error("embedding is empty")]
    Empty,
    #[error("embedding value at index {index} is not finite")]
    NonFinite { index: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid bounding box (x={x}, y={y}, width={width}, height={height}): {reason}")]
pub struct InvalidBoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub reason: &'static str,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidExpressions {
    #[error("expression probability {value} at index {index} is outside [0, 1]")]
    OutOfRange { index: usize, value: f32 },
    #[error("expression probabilities sum to {sum}, expected 1")]
    NotNormalized { sum: f32 },
}

/// Face identity descriptor.
///
/// Immutable once built: the values are only reachable through a shared slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Result<Self, InvalidEmbedding> {
        if values.is_empty() {
            return Err(InvalidEmbedding::Empty);
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(InvalidEmbedding::NonFinite { index });
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = InvalidEmbedding;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.values
    }
}

/// Face location in pixel coordinates of the image it was detected on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBoundingBox")]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Deserialize)]
struct RawBoundingBox {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

impl TryFrom<RawBoundingBox> for BoundingBox {
    type Error = InvalidBoundingBox;

    fn try_from(raw: RawBoundingBox) -> Result<Self, Self::Error> {
        Self::new(raw.x, raw.y, raw.width, raw.height)
    }
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Result<Self, InvalidBoundingBox> {
        let reason = if ![x, y, width, height].iter().all(|v| v.is_finite()) {
            Some("coordinates must be finite")
        } else if x < 0.0 || y < 0.0 {
            Some("coordinates must be non-negative")
        } else if width <= 0.0 || height <= 0.0 {
            Some("width and height must be positive")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(InvalidBoundingBox {
                x,
                y,
                width,
                height,
                reason,
            }),
            None => Ok(Self {
                x,
                y,
                width,
                height,
            }),
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// The seven expressions reported by the enriched detection profile, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl Expression {
    pub const ALL: [Expression; 7] = [
        Expression::Neutral,
        Expression::Happy,
        Expression::Sad,
        Expression::Angry,
        Expression::Fearful,
        Expression::Disgusted,
        Expression::Surprised,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Happy => "happy",
            Expression::Sad => "sad",
            Expression::Angry => "angry",
            Expression::Fearful => "fearful",
            Expression::Disgusted => "disgusted",
            Expression::Surprised => "surprised",
        }
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Probability per expression, indexed in [`Expression::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawExpressions")]
pub struct Expressions {
    probabilities: [f32; 7],
}

#[derive(Deserialize)]
struct RawExpressions {
    probabilities: [f32; 7],
}

impl TryFrom<RawExpressions> for Expressions {
    type Error = InvalidExpressions;

    fn try_from(raw: RawExpressions) -> Result<Self, Self::Error> {
        Self::new(raw.probabilities)
    }
}

/// Allowed drift of the probability sum from 1.
const EXPRESSION_SUM_TOLERANCE: f32 = 1e-3;

impl Expressions {
    /// Each probability must lie in [0, 1] and together they must sum to 1.
    pub fn new(probabilities: [f32; 7]) -> Result<Self, InvalidExpressions> {
        if let Some((index, &value)) = probabilities
            .iter()
            .enumerate()
            .find(|(_, v)| !(0.0..=1.0).contains(*v))
        {
            return Err(InvalidExpressions::OutOfRange { index, value });
        }
        let sum: f32 = probabilities.iter().sum();
        if (sum - 1.0).abs() > EXPRESSION_SUM_TOLERANCE {
            return Err(InvalidExpressions::NotNormalized { sum });
        }
        Ok(Self { probabilities })
    }

    pub fn get(&self, expression: Expression) -> f32 {
        self.probabilities[expression as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Expression, f32)> + '_ {
        Expression::ALL.into_iter().zip(self.probabilities.iter().copied())
    }

    /// Most probable expression; on equal probabilities the earlier one in canonical order wins.
    pub fn dominant(&self) -> (Expression, f32) {
        self.iter()
            .reduce(|best, entry| if entry.1 > best.1 { entry } else { best })
            .unwrap_or((Expression::Neutral, 0.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gender::Male => f.write_str("male"),
            Gender::Female => f.write_str("female"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenderEstimate {
    pub gender: Gender,
    pub probability: f32,
}

/// Soft attributes computed only by the enriched detection profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceAttributes {
    pub expressions: Expressions,
    /// Estimated age in years.
    pub age: f32,
    pub gender: GenderEstimate,
}

/// One face found by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub embedding: Embedding,
    pub bbox: BoundingBox,
    /// Detector score in [0, 1].
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<FaceAttributes>,
}

/// Opaque photo identifier, unique within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoId(String);

impl PhotoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PhotoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A photo of the batch together with the faces found in it.
///
/// Faces are fixed at construction and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    id: PhotoId,
    source: PathBuf,
    faces: Vec<DetectedFace>,
}

impl Photo {
    pub fn analyzed(id: PhotoId, source: impl Into<PathBuf>, faces: Vec<DetectedFace>) -> Self {
        Self {
            id,
            source: source.into(),
            faces,
        }
    }

    pub fn id(&self) -> &PhotoId {
        &self.id
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn faces(&self) -> &[DetectedFace] {
        &self.faces
    }
}

/// A photo admitted by the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchResult<'a> {
    pub photo: &'a Photo,
    /// Index into `photo.faces()` of the face closest to the reference.
    pub face_index: usize,
    pub distance: f32,
    /// `max(0, 1 - distance)`.
    pub score: f32,
}

impl<'a> MatchResult<'a> {
    pub fn face(&self) -> &'a DetectedFace {
        &self.photo.faces()[self.face_index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_rejects_empty() {
        assert_eq!(Embedding::new(vec![]), Err(InvalidEmbedding::Empty));
    }

    #[test]
    fn test_embedding_rejects_nan() {
        assert_eq!(
            Embedding::new(vec![0.1, f32::NAN, 0.3]),
            Err(InvalidEmbedding::NonFinite { index: 1 })
        );
    }

    #[test]
    fn test_embedding_serde_is_plain_array() {
        let e = Embedding::new(vec![0.5, -0.25]).unwrap();
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(json, "[0.5,-0.25]");
        let back: Embedding = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
        assert!(serde_json::from_str::<Embedding>("[]").is_err());
    }

    #[test]
    fn test_bbox_validation() {
        assert!(BoundingBox::new(0.0, 0.0, 10.0, 10.0).is_ok());
        assert!(BoundingBox::new(-1.0, 0.0, 10.0, 10.0).is_err());
        assert!(BoundingBox::new(0.0, 0.0, 0.0, 10.0).is_err());
        assert!(BoundingBox::new(0.0, 0.0, 10.0, -3.0).is_err());
        assert!(BoundingBox::new(f32::INFINITY, 0.0, 10.0, 10.0).is_err());
    }

    #[test]
    fn test_bbox_deserialize_validates() {
        let ok: BoundingBox =
            serde_json::from_str(r#"{"x":1,"y":2,"width":3,"height":4}"#).unwrap();
        assert_eq!(ok.area(), 12.0);
        assert!(serde_json::from_str::<BoundingBox>(r#"{"x":1,"y":2,"width":0,"height":4}"#).is_err());
    }

    #[test]
    fn test_dominant_expression() {
        let e = Expressions::new([0.05, 0.7, 0.05, 0.05, 0.05, 0.05, 0.05]).unwrap();
        assert_eq!(e.dominant(), (Expression::Happy, 0.7));
    }

    #[test]
    fn test_dominant_expression_tie_takes_first() {
        let e = Expressions::new([0.1, 0.1, 0.4, 0.0, 0.4, 0.0, 0.0]).unwrap();
        assert_eq!(e.dominant().0, Expression::Sad);
    }

    #[test]
    fn test_expression_get_matches_order() {
        let e = Expressions::new([0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(e.get(Expression::Surprised), 1.0);
        assert_eq!(e.get(Expression::Neutral), 0.0);
    }

    #[test]
    fn test_expressions_validation() {
        assert!(matches!(
            Expressions::new([-0.1, 1.1, 0.0, 0.0, 0.0, 0.0, 0.0]),
            Err(InvalidExpressions::OutOfRange { index: 0, .. })
        ));
        assert!(matches!(
            Expressions::new([f32::NAN, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            Err(InvalidExpressions::OutOfRange { index: 0, .. })
        ));
        assert!(matches!(
            Expressions::new([0.5, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0]),
            Err(InvalidExpressions::NotNormalized { .. })
        ));
    }

    #[test]
    fn test_expressions_deserialize_validates() {
        let ok: Expressions =
            serde_json::from_str(r#"{"probabilities":[0,1,0,0,0,0,0]}"#).unwrap();
        assert_eq!(ok.dominant().0, Expression::Happy);
        assert!(serde_json::from_str::<Expressions>(r#"{"probabilities":[3,1,0,0,0,0,0]}"#).is_err());
    }
}
