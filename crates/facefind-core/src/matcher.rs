//! Ranking photos against a reference embedding.

use crate::comparator::{distance, score_from_distance};
use crate::types::{Embedding, MatchResult, Photo};

/// Maximum distance at which two faces are still treated as the same person.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Strategy for ranking a batch of analysed photos against a reference face.
pub trait PhotoMatcher {
    fn find_matches<'a>(
        &self,
        reference: &Embedding,
        photos: &'a [Photo],
        threshold: f32,
    ) -> Vec<MatchResult<'a>>;
}

/// Euclidean matcher: a photo matches when any of its faces is within the
/// threshold of the reference.
///
/// Each photo is represented by its closest face, so a crowd shot with one
/// faint true match ranks the same as a clean portrait at that distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl PhotoMatcher for EuclideanMatcher {
    fn find_matches<'a>(
        &self,
        reference: &Embedding,
        photos: &'a [Photo],
        threshold: f32,
    ) -> Vec<MatchResult<'a>> {
        let mut matches: Vec<MatchResult<'a>> = photos
            .iter()
            .filter_map(|photo| {
                let (face_index, best) = closest_face(reference, photo)?;
                // NaN threshold compares false: nothing is admitted.
                if best <= threshold {
                    Some(MatchResult {
                        photo,
                        face_index,
                        distance: best,
                        score: score_from_distance(best),
                    })
                } else {
                    tracing::trace!(photo = %photo.id(), distance = best, "above threshold");
                    None
                }
            })
            .collect();

        // Stable sort: equal scores keep input order.
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches
    }
}

/// Index and distance of the face closest to `reference`; first face wins ties.
/// `None` for a photo without faces.
fn closest_face(reference: &Embedding, photo: &Photo) -> Option<(usize, f32)> {
    photo
        .faces()
        .iter()
        .map(|face| distance(reference, &face.embedding))
        .enumerate()
        .reduce(|best, cur| if cur.1 < best.1 { cur } else { best })
}

/// Rank `photos` against `reference` with [`EuclideanMatcher`].
pub fn find_matches<'a>(
    reference: &Embedding,
    photos: &'a [Photo],
    threshold: f32,
) -> Vec<MatchResult<'a>> {
    EuclideanMatcher.find_matches(reference, photos, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, DetectedFace, PhotoId, EMBEDDING_DIM};

    /// Embedding whose distance from the zero vector is exactly `d`.
    fn at(d: f32) -> Embedding {
        let mut values = vec![0.0; EMBEDDING_DIM];
        values[0] = d;
        Embedding::new(values).unwrap()
    }

    fn origin() -> Embedding {
        at(0.0)
    }

    fn photo(id: &str, distances: &[f32]) -> Photo {
        let faces = distances
            .iter()
            .map(|&d| DetectedFace {
                embedding: at(d),
                bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0).unwrap(),
                confidence: 0.9,
                attributes: None,
            })
            .collect();
        Photo::analyzed(PhotoId::new(id), format!("{id}.jpg"), faces)
    }

    fn ids<'a>(matches: &[MatchResult<'a>]) -> Vec<&'a str> {
        matches.iter().map(|m| m.photo.id().as_str()).collect()
    }

    #[test]
    fn test_reference_scenario() {
        let photos = vec![photo("A", &[0.3]), photo("B", &[0.8, 0.5]), photo("C", &[])];
        let matches = find_matches(&origin(), &photos, DEFAULT_MATCH_THRESHOLD);

        assert_eq!(ids(&matches), vec!["A", "B"]);
        assert!((matches[0].score - 0.7).abs() < 1e-6);
        assert!((matches[1].score - 0.5).abs() < 1e-6);
        assert_eq!(matches[1].face_index, 1);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let photos = vec![photo("D", &[0.6])];
        let matches = find_matches(&origin(), &photos, 0.6);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].distance, 0.6);
        assert!((matches[0].score - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_above_threshold_excluded() {
        let photos = vec![photo("E", &[0.61])];
        assert!(find_matches(&origin(), &photos, 0.6).is_empty());
    }

    #[test]
    fn test_zero_face_photo_skipped_at_any_threshold() {
        let photos = vec![photo("empty", &[])];
        assert!(find_matches(&origin(), &photos, f32::MAX).is_empty());
    }

    #[test]
    fn test_equal_scores_keep_input_order() {
        let photos = vec![
            photo("p1", &[0.4]),
            photo("p2", &[0.2]),
            photo("p3", &[0.4]),
            photo("p4", &[0.2]),
        ];
        let matches = find_matches(&origin(), &photos, 0.6);
        assert_eq!(ids(&matches), vec!["p2", "p4", "p1", "p3"]);
    }

    #[test]
    fn test_zero_scores_beyond_one_keep_input_order() {
        let photos = vec![photo("far", &[1.5]), photo("farther", &[1.2]), photo("near", &[0.1])];
        let matches = find_matches(&origin(), &photos, 2.0);
        assert_eq!(ids(&matches), vec!["near", "far", "farther"]);
        assert_eq!(matches[1].score, 0.0);
    }

    #[test]
    fn test_nan_threshold_admits_nothing() {
        let photos = vec![photo("A", &[0.0])];
        assert!(find_matches(&origin(), &photos, f32::NAN).is_empty());
    }

    #[test]
    fn test_closest_face_tie_takes_first() {
        let p = photo("tie", &[0.9, 0.3, 0.3]);
        assert_eq!(closest_face(&origin(), &p), Some((1, 0.3)));
    }

    #[test]
    fn test_repeated_runs_identical() {
        let photos = vec![photo("A", &[0.5]), photo("B", &[0.1, 0.9]), photo("C", &[0.5])];
        let first = find_matches(&origin(), &photos, 0.6);
        let second = find_matches(&origin(), &photos, 0.6);
        assert_eq!(first, second);
    }
}
