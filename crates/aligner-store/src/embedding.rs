//! Local, deterministic code embedder based on feature hashing.
//!
//! Source text is split into identifier/number tokens and single punctuation
//! characters. Every unigram and adjacent bigram is hashed with SHA-256 into a
//! signed bucket of a fixed-length vector, which is then L2-normalised. Same
//! text, same vector, on every platform.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::storage_traits::{Embedder, StoreResult};

/// Matches the width of the sentence-transformer vectors the corpus was
/// originally built with, so either embedder can fill the same table.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Feature-hashing embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Embed synchronously; the async trait method delegates here.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut vector = vec![0f32; self.dimensions];

        for token in &tokens {
            self.accumulate(&mut vector, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut vector, bigram.as_bytes(), 0.5);
        }

        normalize(&mut vector);
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let digest = Sha256::digest(feature);
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = u64::from_le_bytes(bucket_bytes);
        let index = (bucket % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> StoreResult<Vec<f32>> {
        Ok(self.embed_text(text))
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            current.extend(ch.to_lowercase());
        } else {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            if !ch.is_whitespace() {
                tokens.push(ch.to_string());
            }
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine distance (`1 - cosine similarity`) clamped to `[0, 1]`.
///
/// Zero vectors are maximally distant from everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut norm_a, mut norm_b) = (0f64, 0f64, 0f64);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_is_deterministic() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed_text("def two_sum(nums, target): pass");
        let b = embedder.embed_text("def two_sum(nums, target): pass");
        assert_eq!(a, b);
        assert_eq!(a.len(), DEFAULT_DIMENSIONS);
    }

    #[test]
    fn test_embedding_is_unit_length() {
        let v = HashingEmbedder::new(64).embed_text("for i in range(n): total += i");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let v = HashingEmbedder::new(16).embed_text("   ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_similar_code_is_closer_than_unrelated_code() {
        let embedder = HashingEmbedder::default();
        let base = embedder.embed_text("def find_max(arr):\n    return max(arr)");
        let near = embedder.embed_text("def find_max(values):\n    return max(values)");
        let far = embedder.embed_text("class Trie:\n    def insert(self, word): self.root[word] = 1");
        assert!(cosine_distance(&base, &near) < cosine_distance(&base, &far));
    }

    #[test]
    fn test_cosine_distance_bounds() {
        assert_eq!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
        let d = cosine_distance(&[1.0, 0.0], &[0.8, 0.6]);
        assert!((d - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_tokenize_splits_punctuation() {
        assert_eq!(
            tokenize("x+=arr[0]"),
            vec!["x", "+", "=", "arr", "[", "0", "]"]
        );
    }
}
