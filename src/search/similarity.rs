//! Similarity and scoring primitives
//!
//! Pure functions shared by the search pipeline, the vector store adapter and
//! the integrity scanners.

use chrono::{DateTime, Utc};

use crate::core::config::ScoringWeights;
use crate::core::error::{KgError, Result};
use crate::core::model::EmbeddingInfo;
use crate::core::schema::tokenize;

/// Cosine similarity between two equal-length vectors, in [-1, 1].
///
/// A zero-norm operand yields 0 rather than NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(KgError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a > 0.0 && norm_b > 0.0 {
        let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
        if sim.is_finite() {
            Ok(sim.clamp(-1.0, 1.0) as f32)
        } else {
            Ok(0.0)
        }
    } else {
        Ok(0.0)
    }
}

/// Map a raw similarity onto [0, 1] for ranking. NaN becomes 0.
pub fn normalize_similarity(sim: f32) -> f32 {
    if sim.is_nan() {
        0.0
    } else {
        sim.clamp(0.0, 1.0)
    }
}

/// Fraction of query tokens that appear in `text`.
pub fn keyword_match(query: &str, text: &str) -> f32 {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let haystack = text.to_lowercase();
    let text_tokens = tokenize(&haystack);
    let matched = query_tokens
        .iter()
        .filter(|q| text_tokens.iter().any(|t| t == *q) || haystack.contains(q.as_str()))
        .count();
    matched as f32 / query_tokens.len() as f32
}

/// Recency factor in [0, 1] by age bands: <30d, <90d, <180d, then linear decay over a year.
pub fn recency_boost(updated_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f32 {
    let Some(updated_at) = updated_at else {
        return 0.0;
    };
    let days = (now - updated_at).num_seconds().max(0) as f32 / 86_400.0;
    if days < 30.0 {
        1.0
    } else if days < 90.0 {
        0.8
    } else if days < 180.0 {
        0.6
    } else {
        (0.4 - (days - 180.0) / 365.0).max(0.0)
    }
}

/// Weighted combination of the three scoring signals.
pub fn hybrid_score(weights: &ScoringWeights, similarity: f32, keyword: f32, recency: f32) -> f32 {
    let score = weights.vector * normalize_similarity(similarity)
        + weights.keyword * keyword.clamp(0.0, 1.0)
        + weights.recency * recency.clamp(0.0, 1.0);
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Current,
    Outdated { stored: EmbeddingInfo },
    Missing,
}

impl Freshness {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Outdated { .. } => "outdated",
            Self::Missing => "missing",
        }
    }
}

/// Compare a record's embedding stamp with the configured model.
pub fn classify_embedding(stored: Option<&EmbeddingInfo>, current: &EmbeddingInfo) -> Freshness {
    match stored {
        None => Freshness::Missing,
        Some(s) if s.model_id == current.model_id && s.version == current.version => Freshness::Current,
        Some(s) => Freshness::Outdated { stored: s.clone() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    #[test]
    fn test_cosine_basic() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).unwrap().abs() < 1e-6);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]).unwrap() + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_cosine_dimension_mismatch() {
        let err = cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, KgError::DimensionMismatch { left: 2, right: 3 }));
    }

    #[test]
    fn test_keyword_match_fraction() {
        assert_eq!(keyword_match("acme robotics", "Acme builds robotics kits"), 1.0);
        assert_eq!(keyword_match("acme robotics", "Acme Corp"), 0.5);
        assert_eq!(keyword_match("", "anything"), 0.0);
    }

    #[test]
    fn test_recency_bands() {
        let now = Utc::now();
        assert_eq!(recency_boost(None, now), 0.0);
        assert_eq!(recency_boost(Some(now - Duration::days(3)), now), 1.0);
        assert_eq!(recency_boost(Some(now - Duration::days(60)), now), 0.8);
        assert_eq!(recency_boost(Some(now - Duration::days(120)), now), 0.6);
        assert_eq!(recency_boost(Some(now - Duration::days(2000)), now), 0.0);
    }

    #[test]
    fn test_hybrid_default_weights() {
        let w = ScoringWeights::default();
        let score = hybrid_score(&w, 1.0, 1.0, 1.0);
        assert!((score - 1.0).abs() < 1e-6);
        assert_eq!(hybrid_score(&w, f32::NAN, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_classify_embedding() {
        let current = EmbeddingInfo {
            model_id: "htp-384".to_string(),
            version: "1.0".to_string(),
        };
        assert_eq!(classify_embedding(None, &current), Freshness::Missing);
        assert_eq!(classify_embedding(Some(&current), &current), Freshness::Current);
        let old = EmbeddingInfo {
            model_id: "htp-384".to_string(),
            version: "0.9".to_string(),
        };
        assert_eq!(classify_embedding(Some(&old), &current).label(), "outdated");
    }

    fn vector(len: usize) -> impl Strategy<Value = Vec<f32>> {
        prop::collection::vec(-1000.0f32..1000.0, len)
    }

    proptest! {
        #[test]
        fn prop_similarity_bounded(pair in (1usize..64).prop_flat_map(|n| (vector(n), vector(n)))) {
            let (a, b) = pair;
            let sim = cosine_similarity(&a, &b).unwrap();
            prop_assert!((-1.0..=1.0).contains(&sim));
        }

        #[test]
        fn prop_self_similarity_is_one(a in vector(16)) {
            prop_assume!(a.iter().any(|x| x.abs() > 1e-3));
            let sim = cosine_similarity(&a, &a).unwrap();
            prop_assert!((sim - 1.0).abs() < 1e-5);
        }
    }
}
