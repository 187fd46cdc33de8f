//! Text embedding used to rank documents by similarity.

mod hashing;

use async_trait::async_trait;

pub use hashing::HashingEmbedder;

use crate::Result;

#[async_trait]
pub trait Embedder: Send + Sync {
   async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

   async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

/// Cosine similarity of two vectors; zero when either is all zeros.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
   let mut dot = 0.0f32;
   let mut na = 0.0f32;
   let mut nb = 0.0f32;
   for (x, y) in a.iter().zip(b) {
      dot += x * y;
      na += x * x;
      nb += y * y;
   }
   if na <= f32::EPSILON || nb <= f32::EPSILON {
      return 0.0;
   }
   dot / (na.sqrt() * nb.sqrt())
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn cosine_basics() {
      assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
      assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
      assert!(cosine(&[0.0, 0.0], &[1.0, 1.0]).abs() < f32::EPSILON);
   }
}
