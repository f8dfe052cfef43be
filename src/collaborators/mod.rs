//! The external-collaborator seam: LLM prompting and embedding generation
//! are treated as external collaborators whose interfaces are fixed.
//! These traits are that fixed interface; the crate ships only
//! deterministic test doubles behind them, leaving a real-backed
//! implementation declared but unused until one is wired in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single claim as extracted by an LLM collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedClaim {
    pub text: String,
    pub confidence: f64,
    pub source_span: Option<String>,
    pub mentioned_concept_names: Vec<String>,
}

/// A concept/relationship pair an LLM collaborator proposes during
/// lecture extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedRelation {
    pub source_name: String,
    pub target_name: String,
    pub predicate: String,
    pub confidence: f64,
    pub rationale: Option<String>,
}

/// Narrow interface to an external language model. No implementation in
/// this crate calls out to a live model; `NullLlmCollaborator` and
/// `EchoLlmCollaborator` below exist for tests and offline operation.
#[async_trait]
pub trait LlmCollaborator: Send + Sync {
    async fn extract_claims(&self, chunk_text: &str) -> Vec<ExtractedClaim>;
    async fn extract_relations(&self, chunk_text: &str) -> Vec<ExtractedRelation>;
    async fn classify_intent(&self, message: &str) -> Option<String>;
}

/// Narrow interface to an external embedding model.
#[async_trait]
pub trait EmbeddingCollaborator: Send + Sync {
    async fn embed(&self, text: &str) -> Vec<f32>;
}

/// A collaborator that proposes nothing. Used where ingestion or
/// retrieval should proceed on deterministic structural signals alone.
pub struct NullLlmCollaborator;

#[async_trait]
impl LlmCollaborator for NullLlmCollaborator {
    async fn extract_claims(&self, _chunk_text: &str) -> Vec<ExtractedClaim> {
        Vec::new()
    }

    async fn extract_relations(&self, _chunk_text: &str) -> Vec<ExtractedRelation> {
        Vec::new()
    }

    async fn classify_intent(&self, _message: &str) -> Option<String> {
        None
    }
}

/// A deterministic embedding stand-in: hashes each whitespace token into a
/// fixed-width vector slot. Stable across runs, good enough for exercising
/// cosine-similarity code paths in tests without a real model.
pub struct HashingEmbeddingCollaborator {
    pub dims: usize,
}

impl Default for HashingEmbeddingCollaborator {
    fn default() -> Self {
        Self { dims: 32 }
    }
}

#[async_trait]
impl EmbeddingCollaborator for HashingEmbeddingCollaborator {
    async fn embed(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0f32; self.dims];
        for token in text.split_whitespace() {
            let mut hash: u64 = 1469598103934665603;
            for b in token.as_bytes() {
                hash ^= *b as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let slot = (hash as usize) % self.dims;
            vec[slot] += 1.0;
        }
        let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vec.iter_mut() {
                *v /= norm;
            }
        }
        vec
    }
}

/// Cosine similarity of two equal-length embeddings, clamped to `[0, 1]`
/// (negative cosine similarity is treated as zero relatedness for merge
/// scoring purposes).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    ((dot / (norm_a * norm_b)) as f64).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_collaborator_is_deterministic() {
        let collaborator = HashingEmbeddingCollaborator::default();
        let a = collaborator.embed("Acme Corporation").await;
        let b = collaborator.embed("Acme Corporation").await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn similar_text_embeds_closer_than_dissimilar_text() {
        let collaborator = HashingEmbeddingCollaborator::default();
        let a = collaborator.embed("Acme Corporation raised funding").await;
        let b = collaborator.embed("Acme Corporation raised capital").await;
        let c = collaborator.embed("Totally unrelated whale migration patterns").await;
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }
}
