//! Embedding generation
//!
//! [`EmbeddingGenerator`] is the contract the search pipeline depends on.
//! [`HtpEmbedder`] is the bundled offline implementation: Harmonic Token
//! Projection, a deterministic, training-free embedding (arXiv 2511.20665).
//! It needs no model file, works on any Unicode script, and is the default
//! for the CLI and MCP server.

use std::f64::consts::PI;

use async_trait::async_trait;

use crate::core::error::{KgError, Result};
use crate::core::schema::tokenize;

/// Embedding dimension (2 * number of coprime moduli)
pub const EMBEDDING_DIM: usize = 384;

pub const HTP_MODEL_ID: &str = "htp-384";

const NUM_MODULI: usize = EMBEDDING_DIM / 2;

/// Maximum token length (Unicode code points)
const MAX_TOKEN_LENGTH: usize = 64;

/// First NUM_MODULI primes, pairwise coprime by construction.
static COPRIME_MODULI: &[u64] = &[
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71,
    73, 79, 83, 89, 97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151,
    157, 163, 167, 173, 179, 181, 191, 193, 197, 199, 211, 223, 227, 229, 233,
    239, 241, 251, 257, 263, 269, 271, 277, 281, 283, 293, 307, 311, 313, 317,
    331, 337, 347, 349, 353, 359, 367, 373, 379, 383, 389, 397, 401, 409, 419,
    421, 431, 433, 439, 443, 449, 457, 461, 463, 467, 479, 487, 491, 499, 503,
    509, 521, 523, 541, 547, 557, 563, 569, 571, 577, 587, 593, 599, 601, 607,
    613, 617, 619, 631, 641, 643, 647, 653, 659, 661, 673, 677, 683, 691, 701,
    709, 719, 727, 733, 739, 743, 751, 757, 761, 769, 773, 787, 797, 809, 811,
    821, 823, 827, 829, 839, 853, 857, 859, 863, 877, 881, 883, 887, 907, 911,
    919, 929, 937, 941, 947, 953, 967, 971, 977, 983, 991, 997, 1009, 1013,
    1019, 1021, 1031, 1033, 1039, 1049, 1051, 1061, 1063, 1069, 1087, 1091,
    1093, 1097, 1103, 1109, 1117, 1123, 1129, 1151, 1153, 1163, 1171, 1181,
];

/// A vector plus the id of the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub model_id: String,
}

#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;

    fn model_id(&self) -> &str;
}

/// Harmonic Token Projection embedder.
pub struct HtpEmbedder {
    moduli: Vec<u64>,
}

impl HtpEmbedder {
    pub fn new() -> Self {
        Self {
            moduli: COPRIME_MODULI[..NUM_MODULI].to_vec(),
        }
    }

    /// Mean-pooled, L2-normalized token projections.
    ///
    /// Text without any tokens is rejected: a zero vector would match nothing
    /// and poison the similarity floor.
    pub fn embed_sync(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Err(KgError::invalid("cannot embed text without tokens"));
        }

        let mut sum = vec![0.0f64; EMBEDDING_DIM];
        for token in &tokens {
            for (slot, val) in sum.iter_mut().zip(self.project_token(token)) {
                *slot += val;
            }
        }

        let count = tokens.len() as f64;
        sum.iter_mut().for_each(|v| *v /= count);

        let norm: f64 = sum.iter().map(|x| x * x).sum::<f64>().sqrt();
        Ok(if norm > 0.0 {
            sum.iter().map(|x| (*x / norm) as f32).collect()
        } else {
            sum.iter().map(|x| *x as f32).collect()
        })
    }

    /// E_i = [sin(2πr_i/m_i), cos(2πr_i/m_i)] where r_i = N mod m_i.
    fn project_token(&self, token: &str) -> Vec<f64> {
        let n = token_to_integer(token);
        let mut out = Vec::with_capacity(EMBEDDING_DIM);
        for &m in &self.moduli {
            let theta = 2.0 * PI * ((n % m) as f64) / (m as f64);
            out.push(theta.sin());
            out.push(theta.cos());
        }
        out
    }
}

impl Default for HtpEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

/// N = Σ u_j * B^(L-j), B = 2^16, wrapping on overflow.
fn token_to_integer(token: &str) -> u64 {
    token
        .chars()
        .take(MAX_TOKEN_LENGTH)
        .fold(0u64, |n, c| n.wrapping_mul(65536).wrapping_add(c as u64))
}

#[async_trait]
impl EmbeddingGenerator for HtpEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(Embedding {
            vector: self.embed_sync(text)?,
            model_id: HTP_MODEL_ID.to_string(),
        })
    }

    fn model_id(&self) -> &str {
        HTP_MODEL_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::similarity::cosine_similarity;

    #[test]
    fn test_htp_deterministic() -> Result<()> {
        let a = HtpEmbedder::new();
        let b = HtpEmbedder::new();
        let text = "Acme acquires Globex robotics division";
        assert_eq!(a.embed_sync(text)?, b.embed_sync(text)?);
        assert_ne!(a.embed_sync(text)?, a.embed_sync("quarterly budget review")?);
        Ok(())
    }

    #[test]
    fn test_htp_normalized_multilingual() -> Result<()> {
        let model = HtpEmbedder::new();
        for text in ["会議の議事録", "Korean 한국어 test", "plain english"] {
            let v = model.embed_sync(text)?;
            assert_eq!(v.len(), EMBEDDING_DIM);
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 0.01);
        }
        Ok(())
    }

    #[test]
    fn test_shared_tokens_raise_similarity() -> Result<()> {
        let model = HtpEmbedder::new();
        let base = model.embed_sync("acme robotics partnership")?;
        let near = model.embed_sync("acme robotics")?;
        let far = model.embed_sync("weekly cooking recipes")?;
        assert!(cosine_similarity(&base, &near)? > cosine_similarity(&base, &far)?);
        Ok(())
    }

    #[test]
    fn test_empty_text_rejected() {
        let model = HtpEmbedder::new();
        assert!(matches!(model.embed_sync(" ... "), Err(KgError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_async_embed_reports_model() -> Result<()> {
        let e = HtpEmbedder::new().embed("hello world").await?;
        assert_eq!(e.model_id, HTP_MODEL_ID);
        Ok(())
    }
}
