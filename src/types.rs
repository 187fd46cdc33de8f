//! Payload types shared by the daemon and its clients.

use std::{
   collections::BTreeSet,
   path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata key under which every stored document records its source path.
pub const FILE_PATH_KEY: &str = "file_path";

/// Snapshot of which files are stored and which directories contain them.
///
/// Rebuilt on every request from the collection metadata and never
/// persisted. Every entry of `files` has its whole ancestor chain, excluding
/// the filesystem root, present in `directories`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFileIndex {
   pub files:       BTreeSet<PathBuf>,
   pub directories: BTreeSet<PathBuf>,
}

impl StoredFileIndex {
   /// Builds the index from the `file_path` values of a metadata scan.
   /// Entries without a string `file_path` are ignored.
   pub fn from_metadata<'a, I>(entries: I) -> Self
   where
      I: IntoIterator<Item = &'a Map<String, Value>>,
   {
      let mut index = Self::default();
      for meta in entries {
         if let Some(path) = meta.get(FILE_PATH_KEY).and_then(Value::as_str) {
            index.insert(Path::new(path));
         }
      }
      index
   }

   pub fn insert(&mut self, file: &Path) {
      self.files.insert(file.to_path_buf());
      let mut current = file.parent();
      while let Some(dir) = current {
         if is_chain_end(dir) {
            break;
         }
         self.directories.insert(dir.to_path_buf());
         current = dir.parent();
      }
   }

   pub fn contains_file(&self, file: &Path) -> bool {
      self.files.contains(file)
   }

   pub fn contains_dir(&self, dir: &Path) -> bool {
      self.directories.contains(dir)
   }

   pub fn is_empty(&self) -> bool {
      self.files.is_empty()
   }
}

// The root has no parent; relative chains end at "" or ".".
fn is_chain_end(dir: &Path) -> bool {
   dir.parent().is_none() || dir.as_os_str().is_empty() || dir == Path::new(".")
}

/// One ranked hit returned by `query_similar`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarDocument {
   pub content:  String,
   #[serde(default)]
   pub metadata: Map<String, Value>,
}

impl SimilarDocument {
   pub fn file_path(&self) -> Option<&str> {
      self.metadata.get(FILE_PATH_KEY).and_then(Value::as_str)
   }
}

pub fn file_metadata(path: &Path) -> Map<String, Value> {
   let mut meta = Map::new();
   meta.insert(FILE_PATH_KEY.to_string(), Value::String(path.to_string_lossy().into_owned()));
   meta
}
