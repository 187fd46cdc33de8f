//! CLI command implementations for vectord.
//!
//! Each module corresponds to one subcommand. Client commands share a
//! [`Target`] describing which repository and collection to talk about.

pub mod add;
pub mod clean;
pub mod config;
pub mod daemon;
pub mod kill;
pub mod list;
pub mod ping;
pub mod query;
pub mod remove;
pub mod restart;
pub mod serve;

use std::path::{Path, PathBuf};

use crate::{
   Result, client::VectorStoreClient, config::Config, ipc::InitializeParams,
};

use self::daemon::ServiceManager;

/// Repository, collection and configuration a client command acts on.
#[derive(Debug, Clone)]
pub struct Target {
   pub repo:       PathBuf,
   pub collection: Option<String>,
   pub config:     Config,
}

impl Target {
   pub fn manager(&self) -> Result<ServiceManager> {
      ServiceManager::new(self.config.clone())
   }

   pub fn init_params(&self) -> InitializeParams {
      InitializeParams {
         repo_path:       self.repo.clone(),
         collection_name: Some(
            self
               .collection
               .clone()
               .unwrap_or_else(|| self.config.collection_name.clone()),
         ),
         embedding_model: Some(self.config.embedding_model.clone()),
         device:          Some(self.config.device.clone()),
      }
   }

   /// Starts the daemon if needed and returns an initialized client.
   pub async fn connect(&self) -> Result<VectorStoreClient> {
      let manager = self.manager()?;
      VectorStoreClient::connect(&manager, self.init_params()).await
   }
}

/// Makes `path` absolute without requiring it to exist.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
   if let Ok(canonical) = path.canonicalize() {
      return Ok(canonical);
   }
   if path.is_absolute() {
      return Ok(path.to_path_buf());
   }
   Ok(std::env::current_dir()?.join(path))
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn init_params_fall_back_to_config() {
      let target = Target {
         repo:       PathBuf::from("/srv/repo"),
         collection: None,
         config:     Config::default(),
      };
      let params = target.init_params();
      assert_eq!(params.collection_name.as_deref(), Some("repository_content"));
      assert_eq!(params.embedding_model.as_deref(), Some("all-MiniLM-L6-v2"));

      let target = Target { collection: Some("docs".into()), ..target };
      assert_eq!(target.init_params().collection_name.as_deref(), Some("docs"));
   }

   #[test]
   fn absolutize_keeps_missing_absolute_paths() {
      let path = Path::new("/definitely/not/here.txt");
      assert_eq!(absolutize(path).unwrap(), path);
      assert!(absolutize(Path::new("missing.txt")).unwrap().is_absolute());
   }
}
