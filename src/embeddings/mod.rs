//! Embedding generation for knowledge capture and retrieval
//!
//! Provides a remote provider (Gemini) and an offline hashing provider,
//! both behind the [`EmbeddingProvider`] trait. Providers also perform the
//! short summarization used when knowledge is captured.

pub mod local;
pub mod remote;

use crate::error::Result;
use async_trait::async_trait;

pub use local::LiteProvider;
pub use remote::GeminiProvider;

/// Default embedding dimensionality (Gemini text-embedding-004)
pub const DEFAULT_EMBEDDING_DIM: usize = 768;

/// Text-to-vector and summarization capability
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Produce a short text following `instruction`
    async fn summarize(&self, text: &str, instruction: &str) -> Result<String>;

    /// Embedding dimensionality
    fn dimensions(&self) -> usize;

    /// Embedding model name
    fn model_name(&self) -> &str;
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let vec1 = vec![1.0, 0.0, 0.0];
        let vec2 = vec![1.0, 0.0, 0.0];
        let vec3 = vec![0.0, 1.0, 0.0];

        assert!((cosine_similarity(&vec1, &vec2) - 1.0).abs() < 0.01);
        assert!((cosine_similarity(&vec1, &vec3) - 0.0).abs() < 0.01);
    }

    #[test]
    fn test_cosine_similarity_different_lengths() {
        let vec1 = vec![1.0, 2.0, 3.0];
        let vec2 = vec![1.0, 2.0];

        assert_eq!(cosine_similarity(&vec1, &vec2), 0.0);
    }

    #[test]
    fn test_cosine_similarity_zero_vectors() {
        let vec1 = vec![0.0, 0.0, 0.0];
        let vec2 = vec![1.0, 2.0, 3.0];

        assert_eq!(cosine_similarity(&vec1, &vec2), 0.0);
    }
}
