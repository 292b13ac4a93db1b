//! Offline embedding provider
//!
//! Character trigram and word hashing into a fixed number of buckets, with an
//! extractive summarizer. No model download and no network; quality is far
//! below a learned embedding but similar texts still land close together.

use crate::embeddings::{EmbeddingProvider, DEFAULT_EMBEDDING_DIM};
use crate::error::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Sentences kept by the extractive summarizer
const SUMMARY_SENTENCES: usize = 3;

/// Hashing embedder and extractive summarizer
pub struct LiteProvider {
    dimensions: usize,
}

impl Default for LiteProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LiteProvider {
    pub fn new() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIM,
        }
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(head) % self.dimensions as u64) as usize
    }

    fn hash_embed(&self, text: &str) -> Vec<f32> {
        let text = text.to_lowercase();
        let text = text.trim();
        let mut vector = vec![0.0f32; self.dimensions];

        let chars: Vec<char> = text.chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            vector[self.bucket(&trigram)] += 1.0;
        }

        // Whole words weigh more than trigrams
        for word in text.split_whitespace() {
            vector[self.bucket(word)] += 2.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }
}

/// First few sentences of `text`, whitespace collapsed
fn leading_sentences(text: &str, count: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut end = collapsed.len();
    let mut seen = 0;
    for (idx, ch) in collapsed.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            seen += 1;
            if seen == count {
                end = idx + ch.len_utf8();
                break;
            }
        }
    }
    collapsed[..end].to_string()
}

#[async_trait]
impl EmbeddingProvider for LiteProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.hash_embed(text))
    }

    async fn summarize(&self, text: &str, _instruction: &str) -> Result<String> {
        Ok(leading_sentences(text, SUMMARY_SENTENCES))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "lite"
    }
}
