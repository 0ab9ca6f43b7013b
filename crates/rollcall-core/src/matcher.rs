//! Nearest-neighbour matching of a probe embedding against a gallery.

use crate::types::{Embedding, Identity};
use thiserror::Error;

/// Default Euclidean distance threshold for dlib-style 128-d encodings.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.45;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding dimension mismatch: query has {query}, identity {identity_id} has {gallery}")]
    DimensionMismatch {
        identity_id: String,
        query: usize,
        gallery: usize,
    },
    #[error("invalid match input: {0}")]
    InvalidInput(String),
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Matched { identity_id: String, distance: f32 },
    /// No member was strictly closer than the threshold. `closest` is the
    /// minimum distance seen, `None` for an empty gallery.
    NoMatch { closest: Option<f32> },
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[Identity],
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Minimum Euclidean distance matcher.
///
/// Every gallery entry is compared. A match requires the minimum distance to
/// be strictly below the threshold. Equidistant members resolve to the
/// lexicographically lowest id, so the outcome does not depend on gallery
/// order.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[Identity],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(MatchError::InvalidInput(format!(
                "threshold must be a positive finite number, got {threshold}"
            )));
        }
        if !probe.is_finite() {
            return Err(MatchError::InvalidInput(
                "query embedding contains non-finite values".into(),
            ));
        }

        let mut best: Option<(&Identity, f32)> = None;

        for identity in gallery {
            if identity.embedding.dimension() != probe.dimension() {
                return Err(MatchError::DimensionMismatch {
                    identity_id: identity.id.clone(),
                    query: probe.dimension(),
                    gallery: identity.embedding.dimension(),
                });
            }

            let distance = probe.euclidean_distance(&identity.embedding);
            let is_better = match best {
                None => true,
                Some((current, best_distance)) => {
                    distance < best_distance
                        || (distance == best_distance && identity.id < current.id)
                }
            };
            if is_better {
                best = Some((identity, distance));
            }
        }

        let result = match best {
            Some((identity, distance)) if distance < threshold => MatchResult::Matched {
                identity_id: identity.id.clone(),
                distance,
            },
            Some((_, distance)) => MatchResult::NoMatch {
                closest: Some(distance),
            },
            None => MatchResult::NoMatch { closest: None },
        };

        tracing::debug!(gallery = gallery.len(), threshold, ?result, "gallery compared");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn identity(id: &str, values: Vec<f32>) -> Identity {
        let now = Utc::now();
        Identity {
            id: id.into(),
            display_name: id.into(),
            embedding: Embedding::new(values),
            enrolled_at: now,
            updated_at: now,
        }
    }

    fn matched_id(result: &MatchResult) -> Option<&str> {
        match result {
            MatchResult::Matched { identity_id, .. } => Some(identity_id),
            MatchResult::NoMatch { .. } => None,
        }
    }

    #[test]
    fn test_concrete_scenario_matches_nearest() {
        let query = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![identity("A", vec![0.30, 0.0]), identity("B", vec![0.0, 0.60])];

        let result = EuclideanMatcher.compare(&query, &gallery, 0.45).unwrap();
        match result {
            MatchResult::Matched { identity_id, distance } => {
                assert_eq!(identity_id, "A");
                assert!((distance - 0.30).abs() < 1e-6);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_concrete_scenario_tight_threshold() {
        let query = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![identity("A", vec![0.30, 0.0]), identity("B", vec![0.0, 0.60])];

        let result = EuclideanMatcher.compare(&query, &gallery, 0.20).unwrap();
        assert!(!result.is_match());
        match result {
            MatchResult::NoMatch { closest } => {
                assert!((closest.unwrap() - 0.30).abs() < 1e-6);
            }
            other => panic!("expected no match, got {other:?}"),
        }
    }

    #[test]
    fn test_threshold_is_strict() {
        let query = Embedding::new(vec![0.0]);
        let gallery = vec![identity("A", vec![0.5])];
        assert!(!EuclideanMatcher.compare(&query, &gallery, 0.5).unwrap().is_match());
        assert!(EuclideanMatcher.compare(&query, &gallery, 0.5001).unwrap().is_match());
    }

    #[test]
    fn test_empty_gallery_is_no_match() {
        let query = Embedding::new(vec![1.0, 2.0]);
        for threshold in [0.01, 0.45, 100.0] {
            let result = EuclideanMatcher.compare(&query, &[], threshold).unwrap();
            assert_eq!(result, MatchResult::NoMatch { closest: None });
        }
    }

    #[test]
    fn test_tie_breaks_to_lowest_id() {
        let query = Embedding::new(vec![0.0, 0.0]);
        let forward = vec![identity("b", vec![0.1, 0.0]), identity("a", vec![0.0, 0.1])];
        let reversed: Vec<Identity> = forward.iter().rev().cloned().collect();

        let first = EuclideanMatcher.compare(&query, &forward, 0.45).unwrap();
        let second = EuclideanMatcher.compare(&query, &reversed, 0.45).unwrap();
        assert_eq!(matched_id(&first), Some("a"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_result_invariant_to_gallery_order() {
        let query = Embedding::new(vec![0.2, 0.1, 0.0]);
        let gallery = vec![
            identity("s1", vec![0.9, 0.1, 0.0]),
            identity("s2", vec![0.25, 0.1, 0.05]),
            identity("s3", vec![0.2, 0.4, 0.0]),
            identity("s4", vec![-0.3, 0.1, 0.2]),
        ];
        let expected = EuclideanMatcher.compare(&query, &gallery, 0.45).unwrap();
        assert_eq!(matched_id(&expected), Some("s2"));

        // Every rotation and its reverse.
        for shift in 0..gallery.len() {
            let mut rotated = gallery.clone();
            rotated.rotate_left(shift);
            assert_eq!(EuclideanMatcher.compare(&query, &rotated, 0.45).unwrap(), expected);
            rotated.reverse();
            assert_eq!(EuclideanMatcher.compare(&query, &rotated, 0.45).unwrap(), expected);
        }
    }

    #[test]
    fn test_threshold_monotonic() {
        let query = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![
            identity("A", vec![0.3, 0.0]),
            identity("B", vec![0.0, 0.35]),
            identity("C", vec![1.0, 1.0]),
        ];
        let thresholds = [0.1, 0.2, 0.31, 0.36, 0.45, 0.6, 1.0, 2.0];

        for (i, &low) in thresholds.iter().enumerate() {
            let low_result = EuclideanMatcher.compare(&query, &gallery, low).unwrap();
            let Some(low_id) = matched_id(&low_result) else {
                continue;
            };
            for &high in &thresholds[i + 1..] {
                let high_result = EuclideanMatcher.compare(&query, &gallery, high).unwrap();
                assert_eq!(matched_id(&high_result), Some(low_id), "t1={low} t2={high}");
            }
        }
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let query = Embedding::new(vec![0.0, 0.0, 0.0]);
        let gallery = vec![identity("A", vec![0.0, 0.0])];
        let err = EuclideanMatcher.compare(&query, &gallery, 0.45).unwrap_err();
        assert_eq!(
            err,
            MatchError::DimensionMismatch {
                identity_id: "A".into(),
                query: 3,
                gallery: 2,
            }
        );
    }

    #[test]
    fn test_rejects_bad_threshold_and_query() {
        let gallery = vec![identity("A", vec![0.0])];
        let query = Embedding::new(vec![0.0]);
        for threshold in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                EuclideanMatcher.compare(&query, &gallery, threshold),
                Err(MatchError::InvalidInput(_))
            ));
        }

        let nan_query = Embedding::new(vec![f32::NAN]);
        assert!(matches!(
            EuclideanMatcher.compare(&nan_query, &gallery, 0.45),
            Err(MatchError::InvalidInput(_))
        ));
    }
}
