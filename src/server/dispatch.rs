//! Command routing and handlers.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::{fs, time};

use super::Server;
use crate::{
   Result,
   ipc::{Command, InitializeParams, PathsParams, QueryParams, Request, Response, RestartParams},
   store::{IndexSettings, is_not_found},
   types::{StoredFileIndex, file_metadata},
};

pub const NOT_INITIALIZED: &str = "Service not initialized";

/// A response plus whether the daemon should stop once it is delivered.
#[derive(Debug)]
pub struct Reply {
   pub response: Response,
   pub shutdown: bool,
}

impl From<Response> for Reply {
   fn from(response: Response) -> Self {
      Self { response, shutdown: false }
   }
}

fn decode<P: DeserializeOwned>(request: &Request, command: Command) -> Result<P, Response> {
   request
      .params()
      .map_err(|e| Response::error(format!("Invalid params for {command}: {e}")))
}

impl Server {
   /// Runs one request through the version check, the initialization gate
   /// and the matching handler. Never fails; errors become `{error}`.
   pub async fn dispatch(&self, request: Request) -> Reply {
      if let Err(e) = request.check_version() {
         return Response::error(e.to_string()).into();
      }

      let command = Command::parse(&request.command);
      let open = command.is_some_and(Command::allowed_before_init);
      if !open && !self.state.is_initialized() {
         tracing::debug!("rejecting {} before initialize", request.command);
         return Response::error(NOT_INITIALIZED).into();
      }

      let Some(command) = command else {
         tracing::warn!("unknown command {:?}", request.command);
         return Response::error(format!("Unknown command: {}", request.command)).into();
      };

      tracing::debug!("handling {command}");
      let result = match command {
         Command::Ping => Ok(Response::ok_with(&"pong")),
         Command::Initialize => match decode(&request, command) {
            Ok(params) => self.initialize(params).await,
            Err(response) => return response.into(),
         },
         Command::AddFiles => match decode(&request, command) {
            Ok(params) => self.add_files(params).await,
            Err(response) => return response.into(),
         },
         Command::RemoveFiles => match decode(&request, command) {
            Ok(params) => self.remove_files(params).await,
            Err(response) => return response.into(),
         },
         Command::GetStoredFiles => self.get_stored_files().await,
         Command::QuerySimilar => match decode(&request, command) {
            Ok(params) => self.query_similar(params).await,
            Err(response) => return response.into(),
         },
         Command::Restart => match decode::<RestartParams>(&request, command) {
            Ok(params) => {
               tracing::info!(
                  "restart requested (repo {:?}, collection {:?}, model {:?})",
                  params.repo_path,
                  params.collection_name,
                  params.model_name
               );
               Ok(Response::ok_with(&"restarting"))
            },
            Err(response) => return response.into(),
         },
         Command::Kill => {
            tracing::info!("kill requested");
            return Reply { response: Response::ok_with(&"shutting down"), shutdown: true };
         },
      };

      match result {
         Ok(response) => response.into(),
         Err(e) => {
            tracing::error!("{command} failed: {e}");
            Response::error(e.to_string()).into()
         },
      }
   }

   async fn initialize(&self, params: InitializeParams) -> Result<Response> {
      let db_path = self.config.store_path(&params.repo_path);
      if self.state.is_initialized() {
         if let Some(index) = self.state.read().await
            && index.settings.db_path != db_path
         {
            tracing::warn!(
               "already serving {} ({}), ignoring initialize for {}",
               index.settings.collection_name,
               index.settings.db_path.display(),
               db_path.display()
            );
         }
         return Ok(Response::ok());
      }
      let settings = IndexSettings {
         db_path,
         collection_name: params
            .collection_name
            .unwrap_or_else(|| self.config.collection_name.clone()),
         embedding_model: params
            .embedding_model
            .unwrap_or_else(|| self.config.embedding_model.clone()),
         device:          params.device.unwrap_or_else(|| self.config.device.clone()),
         embedding_dims:  self.config.embedding_dims,
      };
      self.state.initialize(settings).await?;
      Ok(Response::ok())
   }

   async fn add_files(&self, params: PathsParams) -> Result<Response> {
      let Some(mut index) = self.state.write().await else {
         return Ok(Response::error(NOT_INITIALIZED));
      };

      let mut added: Vec<PathBuf> = Vec::with_capacity(params.paths.len());
      for path in params.paths {
         let Some(content) = read_regular_file(&path).await else {
            continue;
         };
         let id = path.to_string_lossy().into_owned();
         match index.collection.delete(&id).await {
            Ok(()) => {},
            Err(e) if is_not_found(&e) => {},
            Err(e) => tracing::warn!("failed to replace {}: {e}", path.display()),
         }
         match index.collection.upsert(&id, &content, file_metadata(&path)).await {
            Ok(()) => added.push(path),
            Err(e) => tracing::warn!("failed to add {}: {e}", path.display()),
         }
      }
      index.collection.flush().await?;
      tracing::info!("added {} files", added.len());
      Ok(Response::ok_with(&added))
   }

   async fn remove_files(&self, params: PathsParams) -> Result<Response> {
      let Some(mut index) = self.state.write().await else {
         return Ok(Response::error(NOT_INITIALIZED));
      };

      let mut removed: Vec<PathBuf> = Vec::with_capacity(params.paths.len());
      for path in params.paths {
         let id = path.to_string_lossy().into_owned();
         match index.collection.delete(&id).await {
            Ok(()) => removed.push(path),
            Err(e) if is_not_found(&e) => {},
            Err(e) => tracing::warn!("failed to remove {}: {e}", path.display()),
         }
      }
      index.collection.flush().await?;
      tracing::info!("removed {} files", removed.len());
      Ok(Response::ok_with(&removed))
   }

   async fn get_stored_files(&self) -> Result<Response> {
      if !self.state.is_initialized() {
         return Ok(Response::error(NOT_INITIALIZED));
      }

      // Waiting behind a writer counts against the same budget as the scan.
      let scan = async {
         let index = self.state.read().await?;
         Some(index.collection.query_by_metadata().await)
      };
      let stored = match time::timeout(self.config.metadata_timeout(), scan).await {
         Ok(None) => return Ok(Response::error(NOT_INITIALIZED)),
         Ok(Some(Ok(entries))) => StoredFileIndex::from_metadata(&entries),
         Ok(Some(Err(e))) => {
            tracing::warn!("metadata scan failed, reporting no files: {e}");
            StoredFileIndex::default()
         },
         Err(_) => {
            tracing::warn!(
               "metadata scan exceeded {}ms, reporting no files",
               self.config.metadata_timeout_ms
            );
            StoredFileIndex::default()
         },
      };
      Ok(Response::ok_with(&stored))
   }

   async fn query_similar(&self, params: QueryParams) -> Result<Response> {
      let Some(index) = self.state.read().await else {
         return Ok(Response::error(NOT_INITIALIZED));
      };
      let hits = index
         .collection
         .query_similar(&params.text, params.n_results)
         .await?;
      Ok(Response::ok_with(&hits))
   }
}

/// Full text of a regular file; `None` for anything else or on read failure.
async fn read_regular_file(path: &Path) -> Option<String> {
   match fs::metadata(path).await {
      Ok(meta) if meta.is_file() => {},
      Ok(_) => {
         tracing::debug!("skipping non-regular path {}", path.display());
         return None;
      },
      Err(e) => {
         tracing::debug!("skipping {}: {e}", path.display());
         return None;
      },
   }
   match fs::read_to_string(path).await {
      Ok(content) => Some(content),
      Err(e) => {
         tracing::warn!("failed to read {}: {e}", path.display());
         None
      },
   }
}
