//! Deterministic feature-hashing embedder.
//!
//! Tokens are lowercased alphanumeric runs; each one lands in a bucket chosen
//! by its SHA-256 digest with a digest-derived sign. Vectors are L2
//! normalised, so texts sharing vocabulary score higher under cosine.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::{Result, embed::Embedder};

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
   dims: usize,
}

impl HashingEmbedder {
   pub fn new(dims: usize) -> Self {
      Self { dims: dims.max(1) }
   }

   /// The hashing scheme is the same for every model name.
   pub fn for_model(model: &str, dims: usize) -> Self {
      tracing::debug!("embedding model {model} served by hashing embedder ({dims} dims)");
      Self::new(dims)
   }

   pub fn embed(&self, text: &str) -> Vec<f32> {
      let mut vector = vec![0.0f32; self.dims];
      for token in tokens(text) {
         let digest = Sha256::digest(token.as_bytes());
         let mut bucket_bytes = [0u8; 8];
         bucket_bytes.copy_from_slice(&digest[..8]);
         let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
         let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
         vector[bucket] += sign;
      }
      let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
      if norm > 0.0 {
         for v in &mut vector {
            *v /= norm;
         }
      }
      vector
   }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
   text
      .split(|c: char| !c.is_alphanumeric())
      .filter(|t| !t.is_empty())
      .map(|t| t.to_lowercase())
}

#[async_trait]
impl Embedder for HashingEmbedder {
   async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
      Ok(texts.iter().map(|t| self.embed(t)).collect())
   }

   async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
      Ok(self.embed(text))
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::embed::cosine;

   #[test]
   fn deterministic_and_normalised() {
      let embedder = HashingEmbedder::new(64);
      let a = embedder.embed("Socket daemon restart");
      let b = embedder.embed("socket DAEMON restart");
      assert_eq!(a, b);
      let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
      assert!((norm - 1.0).abs() < 1e-5);
   }

   #[test]
   fn empty_text_is_zero_vector() {
      let embedder = HashingEmbedder::new(16);
      assert!(embedder.embed("  ...  ").iter().all(|v| *v == 0.0));
   }

   #[test]
   fn shared_vocabulary_ranks_higher() {
      let embedder = HashingEmbedder::new(384);
      let query = embedder.embed("unix socket listener");
      let close = embedder.embed("the unix socket listener accepts connections");
      let far = embedder.embed("pancake recipe with blueberries");
      assert!(cosine(&query, &close) > cosine(&query, &far));
   }
}
