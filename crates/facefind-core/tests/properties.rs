//! Property-based checks of the comparator and the matcher.

use facefind_core::{
    distance, find_matches, BoundingBox, DetectedFace, Embedding, Photo, PhotoId, EMBEDDING_DIM,
};
use proptest::prelude::*;

prop_compose! {
    fn arb_embedding()(values in prop::collection::vec(-1.0f32..1.0, EMBEDDING_DIM)) -> Embedding {
        Embedding::new(values).unwrap()
    }
}

prop_compose! {
    fn arb_photo(index: usize)(faces in prop::collection::vec(arb_embedding(), 0..4)) -> Photo {
        let faces = faces
            .into_iter()
            .map(|embedding| DetectedFace {
                embedding,
                bbox: BoundingBox::new(0.0, 0.0, 16.0, 16.0).unwrap(),
                confidence: 0.9,
                attributes: None,
            })
            .collect();
        Photo::analyzed(PhotoId::new(format!("photo-{index}")), format!("{index}.jpg"), faces)
    }
}

fn arb_photos() -> impl Strategy<Value = Vec<Photo>> {
    (0usize..12).prop_flat_map(|n| (0..n).map(arb_photo).collect::<Vec<_>>())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn distance_to_self_is_zero(a in arb_embedding()) {
        prop_assert_eq!(distance(&a, &a), 0.0);
    }

    #[test]
    fn distance_is_symmetric(a in arb_embedding(), b in arb_embedding()) {
        prop_assert_eq!(distance(&a, &b), distance(&b, &a));
    }

    #[test]
    fn distance_is_non_negative(a in arb_embedding(), b in arb_embedding()) {
        prop_assert!(distance(&a, &b) >= 0.0);
    }

    #[test]
    fn stricter_threshold_gives_subset(
        reference in arb_embedding(),
        photos in arb_photos(),
        t1 in 0.0f32..4.0,
        t2 in 0.0f32..4.0,
    ) {
        let (low, high) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
        let strict: Vec<&PhotoId> = find_matches(&reference, &photos, low).iter().map(|m| m.photo.id()).collect();
        let loose: Vec<&PhotoId> = find_matches(&reference, &photos, high).iter().map(|m| m.photo.id()).collect();
        for id in &strict {
            prop_assert!(loose.contains(id), "{} matched at {} but not at {}", id, low, high);
        }
    }

    #[test]
    fn output_sorted_and_stable(reference in arb_embedding(), photos in arb_photos(), t in 0.0f32..4.0) {
        let matches = find_matches(&reference, &photos, t);
        let position = |id: &PhotoId| photos.iter().position(|p| p.id() == id).unwrap();

        for pair in matches.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
            if pair[0].score == pair[1].score {
                prop_assert!(position(pair[0].photo.id()) < position(pair[1].photo.id()));
            }
        }
        for m in &matches {
            prop_assert!(!m.photo.faces().is_empty());
            prop_assert!(m.distance <= t);
            prop_assert_eq!(m.score, (1.0 - m.distance).max(0.0));
        }
    }
}
