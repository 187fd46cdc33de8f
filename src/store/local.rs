//! Persistent collection stored as one JSON file per collection.
//!
//! Only documents are persisted; embeddings are recomputed when a collection
//! is loaded.

use std::{
   cmp::Ordering,
   collections::{BTreeMap, HashMap},
   io,
   path::PathBuf,
   sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::{fs, task};

use super::{Collection, IndexProvider, IndexSettings, StoreError, validate_collection_name};
use crate::{
   Result,
   embed::{Embedder, HashingEmbedder, cosine},
   types::SimilarDocument,
   util::write_atomic,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDocument {
   content:  String,
   #[serde(default)]
   metadata: Map<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionFile {
   name:            String,
   embedding_model: String,
   documents:       BTreeMap<String, StoredDocument>,
}

/// Opens and creates [`LocalCollection`]s under `IndexSettings::db_path`.
#[derive(Debug, Clone, Default)]
pub struct LocalProvider;

impl LocalProvider {
   pub const fn new() -> Self {
      Self
   }

   pub fn collection_path(settings: &IndexSettings) -> Result<PathBuf> {
      validate_collection_name(&settings.collection_name)?;
      Ok(settings.db_path.join(format!("{}.json", settings.collection_name)))
   }
}

#[async_trait]
impl IndexProvider for LocalProvider {
   async fn open_collection(&self, settings: &IndexSettings) -> Result<Box<dyn Collection>> {
      let path = Self::collection_path(settings)?;
      let raw = match fs::read(&path).await {
         Ok(raw) => raw,
         Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StoreError::CollectionNotFound(settings.collection_name.clone()).into());
         },
         Err(source) => return Err(StoreError::Read { path, source }.into()),
      };
      let file: CollectionFile =
         serde_json::from_slice(&raw).map_err(|source| StoreError::Parse { path: path.clone(), source })?;
      let collection = LocalCollection::load(path, file, embedder_for(settings)).await?;
      tracing::info!(
         "opened collection {} with {} documents",
         settings.collection_name,
         collection.len()
      );
      Ok(Box::new(collection))
   }

   async fn create_collection(&self, settings: &IndexSettings) -> Result<Box<dyn Collection>> {
      let path = Self::collection_path(settings)?;
      let file = CollectionFile {
         name:            settings.collection_name.clone(),
         embedding_model: settings.embedding_model.clone(),
         documents:       BTreeMap::new(),
      };
      let mut collection = LocalCollection::load(path, file, embedder_for(settings)).await?;
      collection.dirty = true;
      collection.flush().await?;
      tracing::info!("created collection {}", settings.collection_name);
      Ok(Box::new(collection))
   }
}

fn embedder_for(settings: &IndexSettings) -> Arc<dyn Embedder> {
   tracing::debug!("collection {} on device {}", settings.collection_name, settings.device);
   Arc::new(HashingEmbedder::for_model(&settings.embedding_model, settings.embedding_dims))
}

pub struct LocalCollection {
   path:       PathBuf,
   file:       CollectionFile,
   embeddings: HashMap<String, Vec<f32>>,
   embedder:   Arc<dyn Embedder>,
   dirty:      bool,
}

impl LocalCollection {
   async fn load(path: PathBuf, file: CollectionFile, embedder: Arc<dyn Embedder>) -> Result<Self> {
      let ids: Vec<String> = file.documents.keys().cloned().collect();
      let texts: Vec<String> = file.documents.values().map(|d| d.content.clone()).collect();
      let vectors = embedder.embed_documents(&texts).await?;
      if vectors.len() != ids.len() {
         return Err(
            StoreError::Embed(format!("expected {} vectors, got {}", ids.len(), vectors.len())).into(),
         );
      }
      let embeddings = ids.into_iter().zip(vectors).collect();
      Ok(Self { path, file, embeddings, embedder, dirty: false })
   }

   fn len(&self) -> usize {
      self.file.documents.len()
   }
}

#[async_trait]
impl Collection for LocalCollection {
   async fn upsert(&mut self, id: &str, content: &str, metadata: Map<String, Value>) -> Result<()> {
      let vector = self.embedder.embed_query(content).await?;
      self.embeddings.insert(id.to_string(), vector);
      self
         .file
         .documents
         .insert(id.to_string(), StoredDocument { content: content.to_string(), metadata });
      self.dirty = true;
      Ok(())
   }

   async fn delete(&mut self, id: &str) -> Result<()> {
      if self.file.documents.remove(id).is_none() {
         return Err(StoreError::NotFound(id.to_string()).into());
      }
      self.embeddings.remove(id);
      self.dirty = true;
      Ok(())
   }

   async fn query_by_metadata(&self) -> Result<Vec<Map<String, Value>>> {
      Ok(self.file.documents.values().map(|d| d.metadata.clone()).collect())
   }

   async fn query_similar(&self, text: &str, k: usize) -> Result<Vec<SimilarDocument>> {
      if k == 0 || self.file.documents.is_empty() {
         return Ok(Vec::new());
      }
      let query = self.embedder.embed_query(text).await?;
      let mut scored: Vec<(f32, &String)> = self
         .embeddings
         .iter()
         .map(|(id, vector)| (cosine(&query, vector), id))
         .collect();
      scored.sort_by(|a, b| {
         b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
      });
      Ok(scored
         .into_iter()
         .take(k)
         .filter_map(|(_, id)| self.file.documents.get(id))
         .map(|doc| SimilarDocument { content: doc.content.clone(), metadata: doc.metadata.clone() })
         .collect())
   }

   async fn flush(&mut self) -> Result<()> {
      if !self.dirty {
         return Ok(());
      }
      let data = serde_json::to_vec(&self.file)?;
      let path = self.path.clone();
      task::spawn_blocking(move || write_atomic(&path, &data))
         .await
         .map_err(|e| StoreError::Persist(e.to_string()))?
         .map_err(|e| StoreError::Persist(e.to_string()))?;
      self.dirty = false;
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use std::path::Path;

   use super::*;
   use crate::types::file_metadata;

   fn settings(dir: &Path, name: &str) -> IndexSettings {
      IndexSettings {
         db_path:         dir.join("vector_store"),
         collection_name: name.to_string(),
         embedding_model: "all-MiniLM-L6-v2".to_string(),
         device:          "cpu".to_string(),
         embedding_dims:  128,
      }
   }

   #[tokio::test]
   async fn open_missing_collection_is_not_found() {
      let dir = tempfile::tempdir().unwrap();
      let err = LocalProvider::new()
         .open_collection(&settings(dir.path(), "docs"))
         .await
         .err()
         .unwrap();
      assert!(crate::store::is_not_found(&err));
   }

   #[tokio::test]
   async fn documents_survive_reopen() {
      let dir = tempfile::tempdir().unwrap();
      let settings = settings(dir.path(), "docs");
      let provider = LocalProvider::new();
      let mut collection = provider.create_collection(&settings).await.unwrap();
      collection
         .upsert("/r/a.txt", "alpha beta", file_metadata(Path::new("/r/a.txt")))
         .await
         .unwrap();
      collection.flush().await.unwrap();
      drop(collection);

      let reopened = provider.open_collection(&settings).await.unwrap();
      let metas = reopened.query_by_metadata().await.unwrap();
      assert_eq!(metas.len(), 1);
      assert_eq!(metas[0]["file_path"], "/r/a.txt");
   }

   #[tokio::test(flavor = "current_thread")]
   async fn flush_persists_off_the_runtime_thread() {
      let dir = tempfile::tempdir().unwrap();
      let settings = settings(dir.path(), "docs");
      let path = LocalProvider::collection_path(&settings).unwrap();
      let mut collection = LocalProvider::new().create_collection(&settings).await.unwrap();
      for id in ["/r/a.txt", "/r/b.txt"] {
         collection.upsert(id, "text", file_metadata(Path::new(id))).await.unwrap();
         collection.flush().await.unwrap();
      }
      collection.delete("/r/a.txt").await.unwrap();
      collection.flush().await.unwrap();

      let file: CollectionFile = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
      assert_eq!(file.documents.keys().collect::<Vec<_>>(), ["/r/b.txt"]);
      assert!(!path.with_file_name(".docs.json.tmp").exists());
   }

   #[tokio::test]
   async fn delete_missing_is_not_found() {
      let dir = tempfile::tempdir().unwrap();
      let mut collection = LocalProvider::new()
         .create_collection(&settings(dir.path(), "docs"))
         .await
         .unwrap();
      let err = collection.delete("/nope").await.unwrap_err();
      assert!(crate::store::is_not_found(&err));
   }

   #[tokio::test]
   async fn similar_documents_are_ranked() {
      let dir = tempfile::tempdir().unwrap();
      let mut collection = LocalProvider::new()
         .create_collection(&settings(dir.path(), "docs"))
         .await
         .unwrap();
      collection
         .upsert("a", "unix socket daemon lifecycle", file_metadata(Path::new("a")))
         .await
         .unwrap();
      collection
         .upsert("b", "chocolate cake frosting", file_metadata(Path::new("b")))
         .await
         .unwrap();
      let hits = collection.query_similar("socket daemon", 1).await.unwrap();
      assert_eq!(hits.len(), 1);
      assert_eq!(hits[0].file_path(), Some("a"));
      assert!(collection.query_similar("socket", 0).await.unwrap().is_empty());
   }

   #[tokio::test]
   async fn invalid_name_is_rejected() {
      let dir = tempfile::tempdir().unwrap();
      let err = LocalProvider::new()
         .create_collection(&settings(dir.path(), "../escape"))
         .await
         .err()
         .unwrap();
      assert!(matches!(err, crate::Error::Store(StoreError::InvalidCollectionName(_))));
   }
}
