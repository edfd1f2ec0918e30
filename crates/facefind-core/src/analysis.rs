//! One search over a batch of photos: extraction, validation, ranking.
//!
//! A run owns nothing beyond its inputs. Results are produced only once every
//! photo has been analysed; a cancelled batch yields no photos at all.

use crate::comparator::try_distance;
use crate::extractor::{extract_or_empty, FaceExtractor};
use crate::matcher::{EuclideanMatcher, PhotoMatcher};
use crate::types::{Embedding, MatchResult, Photo, PhotoId};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("photo {photo}: embedding dimension {found} does not match reference dimension {expected}")]
    DimensionMismatch {
        photo: PhotoId,
        expected: usize,
        found: usize,
    },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("analysis cancelled")]
pub struct Cancelled;

/// A photo to analyse, before its pixels are loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoInput {
    pub id: PhotoId,
    pub source: PathBuf,
}

impl PhotoInput {
    /// Use the path itself as the photo id.
    pub fn from_path(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        Self {
            id: PhotoId::new(source.to_string_lossy()),
            source,
        }
    }
}

/// Load and extract every photo in order.
///
/// Photos that fail to load or extract are kept with zero faces. The cancel
/// flag is checked before each photo and once more after the last one; once
/// set, everything gathered so far is dropped.
pub fn extract_batch<E, L>(
    extractor: &mut E,
    inputs: &[PhotoInput],
    mut load: L,
    cancel: &AtomicBool,
) -> Result<Vec<Photo>, Cancelled>
where
    E: FaceExtractor + ?Sized,
    L: FnMut(&Path) -> Result<DynamicImage, image::ImageError>,
{
    let mut photos = Vec::with_capacity(inputs.len());

    for (i, input) in inputs.iter().enumerate() {
        check_cancelled(cancel, i, inputs.len())?;

        let faces = match load(&input.source) {
            Ok(image) => extract_or_empty(extractor, &input.id, &image),
            Err(err) => {
                tracing::warn!(photo = %input.id, error = %err, "decode failed; treating photo as faceless");
                Vec::new()
            }
        };
        photos.push(Photo::analyzed(input.id.clone(), input.source.clone(), faces));
    }

    check_cancelled(cancel, inputs.len(), inputs.len())?;
    Ok(photos)
}

fn check_cancelled(cancel: &AtomicBool, done: usize, total: usize) -> Result<(), Cancelled> {
    if cancel.load(Ordering::Relaxed) {
        tracing::info!(done, total, "batch cancelled; discarding partial results");
        return Err(Cancelled);
    }
    Ok(())
}

/// How a completed run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome<'a> {
    /// Not a single face was found across the whole batch.
    NoFacesInCorpus,
    /// Faces exist but none is close enough to the reference.
    NoMatch { faces_considered: usize },
    /// Matching photos, best first.
    Matched(Vec<MatchResult<'a>>),
}

/// A reference, a threshold and an analysed batch.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    id: Uuid,
    reference: Embedding,
    threshold: f32,
    photos: Vec<Photo>,
}

impl AnalysisRun {
    pub fn new(reference: Embedding, threshold: f32, photos: Vec<Photo>) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference,
            threshold,
            photos,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn photos(&self) -> &[Photo] {
        &self.photos
    }

    pub fn face_count(&self) -> usize {
        self.photos.iter().map(|p| p.faces().len()).sum()
    }

    /// Rank the batch with the Euclidean matcher.
    pub fn execute(&self) -> Result<RunOutcome<'_>, AnalysisError> {
        self.execute_with(&EuclideanMatcher)
    }

    pub fn execute_with<M: PhotoMatcher + ?Sized>(
        &self,
        matcher: &M,
    ) -> Result<RunOutcome<'_>, AnalysisError> {
        let span = tracing::info_span!("analysis", run = %self.id);
        let _enter = span.enter();

        self.validate_dimensions()?;

        let faces = self.face_count();
        if faces == 0 {
            tracing::info!(photos = self.photos.len(), "no faces in corpus");
            return Ok(RunOutcome::NoFacesInCorpus);
        }

        let matches = matcher.find_matches(&self.reference, &self.photos, self.threshold);
        tracing::info!(
            photos = self.photos.len(),
            faces,
            matches = matches.len(),
            threshold = self.threshold,
            "analysis complete"
        );

        if matches.is_empty() {
            Ok(RunOutcome::NoMatch {
                faces_considered: faces,
            })
        } else {
            Ok(RunOutcome::Matched(matches))
        }
    }

    fn validate_dimensions(&self) -> Result<(), AnalysisError> {
        for photo in &self.photos {
            for face in photo.faces() {
                if let Err(mismatch) = try_distance(&self.reference, &face.embedding) {
                    tracing::error!(photo = %photo.id(), %mismatch, "embedding contract violated");
                    return Err(AnalysisError::DimensionMismatch {
                        photo: photo.id().clone(),
                        expected: mismatch.expected,
                        found: mismatch.found,
                    });
                }
            }
        }
        Ok(())
    }
}
