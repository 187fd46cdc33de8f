//! Document index abstraction with a JSON-file implementation.
//!
//! The daemon owns exactly one [`Collection`] at a time and never shares it
//! outside its own lock, so implementations only need `Send + Sync`.

mod local;

use std::{io, path::PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};

pub use local::{LocalCollection, LocalProvider};

use crate::{Result, types::SimilarDocument};

/// Errors that can occur in the index backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
   #[error("collection not found: {0}")]
   CollectionNotFound(String),

   #[error("document not found: {0}")]
   NotFound(String),

   #[error("invalid collection name: {0:?}")]
   InvalidCollectionName(String),

   #[error("failed to read collection {}: {source}", .path.display())]
   Read {
      path:   PathBuf,
      #[source]
      source: io::Error,
   },

   #[error("failed to parse collection {}: {source}", .path.display())]
   Parse {
      path:   PathBuf,
      #[source]
      source: serde_json::Error,
   },

   #[error("failed to persist collection: {0}")]
   Persist(String),

   #[error("embedding failed: {0}")]
   Embed(String),
}

/// Everything needed to open or create one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSettings {
   pub db_path:         PathBuf,
   pub collection_name: String,
   pub embedding_model: String,
   pub device:          String,
   pub embedding_dims:  usize,
}

#[async_trait]
pub trait IndexProvider: Send + Sync {
   /// Opens an existing collection; fails with
   /// [`StoreError::CollectionNotFound`] when there is none.
   async fn open_collection(&self, settings: &IndexSettings) -> Result<Box<dyn Collection>>;

   async fn create_collection(&self, settings: &IndexSettings) -> Result<Box<dyn Collection>>;
}

#[async_trait]
pub trait Collection: Send + Sync {
   async fn upsert(&mut self, id: &str, content: &str, metadata: Map<String, Value>) -> Result<()>;

   /// Fails with [`StoreError::NotFound`] when `id` is not stored.
   async fn delete(&mut self, id: &str) -> Result<()>;

   /// Metadata of every stored document, in id order.
   async fn query_by_metadata(&self) -> Result<Vec<Map<String, Value>>>;

   async fn query_similar(&self, text: &str, k: usize) -> Result<Vec<SimilarDocument>>;

   /// Persists pending writes.
   async fn flush(&mut self) -> Result<()> {
      Ok(())
   }
}

/// Collection names become file names, so only a conservative alphabet is
/// accepted.
pub fn validate_collection_name(name: &str) -> Result<(), StoreError> {
   let valid = !name.is_empty()
      && name.len() <= 128
      && !name.starts_with('.')
      && name
         .chars()
         .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
   if valid { Ok(()) } else { Err(StoreError::InvalidCollectionName(name.to_string())) }
}

pub fn is_not_found(err: &crate::Error) -> bool {
   matches!(err, crate::Error::Store(StoreError::NotFound(_) | StoreError::CollectionNotFound(_)))
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn collection_names() {
      assert!(validate_collection_name("repository_content").is_ok());
      assert!(validate_collection_name("docs-v2.1").is_ok());
      assert!(validate_collection_name("").is_err());
      assert!(validate_collection_name("../etc").is_err());
      assert!(validate_collection_name(".hidden").is_err());
      assert!(validate_collection_name("a/b").is_err());
   }

   #[test]
   fn not_found_detection() {
      let err: crate::Error = StoreError::NotFound("x".into()).into();
      assert!(is_not_found(&err));
      let err: crate::Error = StoreError::Persist("disk full".into()).into();
      assert!(!is_not_found(&err));
   }
}
