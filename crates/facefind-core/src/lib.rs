//! facefind-core — find the photos of a batch that contain one person.
//!
//! Matching and ranking are pure functions over precomputed face embeddings.
//! Face extraction sits behind the [`FaceExtractor`] trait; the ONNX-backed
//! [`InferenceContext`] (SCRFD detection, 128-d ResNet descriptors, optional
//! expression/age/gender models) is the bundled implementation.

pub mod analysis;
pub mod attributes;
pub mod comparator;
pub mod context;
pub mod crop;
pub mod detector;
pub mod extractor;
pub mod matcher;
pub mod recognizer;
pub mod reference;
pub mod types;

pub use analysis::{extract_batch, AnalysisError, AnalysisRun, Cancelled, PhotoInput, RunOutcome};
pub use comparator::{distance, score_from_distance, try_distance, DimensionMismatch};
pub use context::{default_model_dir, InferenceContext, ModelPaths};
pub use crop::{crop_face, crop_face_from_bytes, crop_region, CropError, CropRegion, DEFAULT_CROP_PADDING};
pub use extractor::{extract_or_empty, DetectionProfile, ExtractionError, FaceExtractor};
pub use matcher::{find_matches, EuclideanMatcher, PhotoMatcher, DEFAULT_MATCH_THRESHOLD};
pub use reference::{reference_from_image, select_reference, NoFaceFound, ReferenceError};
pub use types::{
    BoundingBox, DetectedFace, Embedding, Expression, Expressions, FaceAttributes, Gender,
    GenderEstimate, InvalidExpressions, MatchResult, Photo, PhotoId, EMBEDDING_DIM,
};
