//! Client side of the daemon protocol.
//!
//! [`CommandClient`] sends one command per connection and retries transport
//! failures; [`VectorStoreClient`] wraps it with typed operations.

use std::{
   collections::BTreeSet,
   path::{Path, PathBuf},
   time::Duration,
};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{io::AsyncWriteExt, time};

use crate::{
   Error, Result,
   cmd::daemon::ServiceManager,
   config::Config,
   ipc::{
      Command, InitializeParams, PathsParams, QueryParams, Request, Response, RestartParams,
      SocketBuffer,
   },
   types::{SimilarDocument, StoredFileIndex},
   usock,
};

const VERIFY_ATTEMPTS: usize = 3;

/// How failed attempts are repeated.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
   pub max_attempts:       usize,
   pub delay:              Duration,
   /// Retry protocol and application failures as well.
   pub retry_all_errors:   bool,
   pub max_response_bytes: usize,
}

impl RetryPolicy {
   pub fn from_config(cfg: &Config) -> Self {
      Self {
         max_attempts:       cfg.max_attempts,
         delay:              cfg.retry_delay(),
         retry_all_errors:   cfg.retry_all_errors,
         max_response_bytes: cfg.max_response_bytes,
      }
   }
}

/// Sends single commands to the daemon over fresh connections.
#[derive(Debug, Clone)]
pub struct CommandClient {
   socket_path: PathBuf,
   policy:      RetryPolicy,
}

impl CommandClient {
   pub fn new(socket_path: impl Into<PathBuf>, policy: RetryPolicy) -> Self {
      Self { socket_path: socket_path.into(), policy }
   }

   /// One exchange: connect, write, half-close, read the reply. The whole
   /// exchange is bounded by `timeout`.
   pub async fn send_once(&self, request: &Request, timeout: Duration) -> Result<Response> {
      let exchange = async {
         let mut stream = usock::Stream::connect(&self.socket_path).await?;
         let mut buffer = SocketBuffer::new();
         buffer.send(&mut stream, request).await?;
         stream
            .shutdown()
            .await
            .map_err(crate::error::IpcError::Write)?;
         buffer
            .recv_with_limit::<_, Response>(&mut stream, self.policy.max_response_bytes)
            .await
      };
      match time::timeout(timeout, exchange).await {
         Ok(result) => result,
         Err(_) => Err(Error::Timeout { command: request.command.clone(), after: timeout }),
      }
   }

   /// Sends `request` up to `max_attempts` times. Only transport failures and
   /// timeouts are retried unless the policy says otherwise; an `{error}`
   /// reply is returned as-is.
   pub async fn send(
      &self,
      request: &Request,
      timeout: Duration,
      max_attempts: usize,
   ) -> Result<Response> {
      let attempts = max_attempts.max(1);
      let mut attempt = 1;
      loop {
         let err = match self.send_once(request, timeout).await {
            Ok(Response::Error { error }) if self.policy.retry_all_errors => {
               Error::Application { command: request.command.clone(), message: error }
            },
            Ok(response) => return Ok(response),
            Err(e) if self.policy.retry_all_errors || e.is_retryable() => e,
            Err(e) => return Err(e),
         };

         if attempt >= attempts {
            return Err(Error::RetriesExhausted {
               command: request.command.clone(),
               attempts,
               source: Box::new(err),
            });
         }
         tracing::warn!(
            "{} attempt {attempt}/{attempts} failed: {err}; retrying in {}ms",
            request.command,
            self.policy.delay.as_millis()
         );
         time::sleep(self.policy.delay).await;
         attempt += 1;
      }
   }

   /// Sends with the policy's attempt budget and unwraps the `data` field.
   pub async fn call(&self, request: &Request, timeout: Duration) -> Result<Option<Value>> {
      self
         .send(request, timeout, self.policy.max_attempts)
         .await?
         .into_data(&request.command)
   }

   pub async fn call_typed<T: DeserializeOwned>(
      &self,
      request: &Request,
      timeout: Duration,
      what: &'static str,
   ) -> Result<T> {
      let data = self
         .call(request, timeout)
         .await?
         .ok_or(Error::UnexpectedResponse(what))?;
      serde_json::from_value(data).map_err(|_| Error::UnexpectedResponse(what))
   }

   /// Single short ping, used as a liveness check.
   pub async fn ping(&self, timeout: Duration) -> Result<()> {
      let response = self.send_once(&Request::new(Command::Ping), timeout).await?;
      response.into_data(Command::Ping.as_str()).map(|_| ())
   }
}

/// Typed operations against a running, initialized daemon.
#[derive(Debug, Clone)]
pub struct VectorStoreClient {
   commands: CommandClient,
   config:   Config,
   params:   InitializeParams,
}

impl VectorStoreClient {
   /// Makes sure a daemon is running, then initializes and verifies it.
   pub async fn connect(manager: &ServiceManager, params: InitializeParams) -> Result<Self> {
      manager.ensure_running().await?;
      Self::attach(manager.socket_path(), manager.config().clone(), params).await
   }

   /// Initializes an already-running daemon listening on `socket_path`.
   pub async fn attach(
      socket_path: &Path,
      config: Config,
      params: InitializeParams,
   ) -> Result<Self> {
      let commands = CommandClient::new(socket_path, RetryPolicy::from_config(&config));
      let client = Self { commands, config, params };
      client.initialize().await?;
      client.verify().await?;
      Ok(client)
   }

   async fn initialize(&self) -> Result<()> {
      let request = Request::with_params(Command::Initialize, &self.params)?;
      self
         .commands
         .call(&request, self.config.request_timeout())
         .await?;
      Ok(())
   }

   /// One connection attempt per round.
   async fn verify(&self) -> Result<()> {
      let request = Request::new(Command::GetStoredFiles);
      let mut attempt = 1;
      loop {
         let round = self
            .commands
            .send(&request, self.config.list_timeout(), 1)
            .await
            .and_then(|response| response.into_data(Command::GetStoredFiles.as_str()));
         match round {
            Ok(_) => return Ok(()),
            Err(e) if attempt < VERIFY_ATTEMPTS => {
               tracing::warn!("store verification attempt {attempt} failed: {e}");
               time::sleep(self.config.retry_delay()).await;
               attempt += 1;
            },
            Err(e) => {
               return Err(Error::ServiceUnavailable {
                  reason: format!("store did not become ready: {e}"),
                  output: String::new(),
               });
            },
         }
      }
   }

   async fn paths_command(&self, command: Command, paths: &[PathBuf]) -> Result<BTreeSet<PathBuf>> {
      let request = Request::with_params(command, &PathsParams { paths: paths.to_vec() })?;
      let done: Vec<PathBuf> = self
         .commands
         .call_typed(&request, self.config.bulk_timeout(), command.as_str())
         .await?;
      Ok(done.into_iter().collect())
   }

   /// Returns the subset of `paths` that was stored.
   pub async fn add_files(&self, paths: &[PathBuf]) -> Result<BTreeSet<PathBuf>> {
      self.paths_command(Command::AddFiles, paths).await
   }

   /// Returns the subset of `paths` that was removed.
   pub async fn remove_files(&self, paths: &[PathBuf]) -> Result<BTreeSet<PathBuf>> {
      self.paths_command(Command::RemoveFiles, paths).await
   }

   pub async fn get_stored_files(&self) -> Result<StoredFileIndex> {
      let request = Request::new(Command::GetStoredFiles);
      self
         .commands
         .call_typed(&request, self.config.list_timeout(), "get_stored_files")
         .await
   }

   pub async fn query_similar(&self, text: &str, n_results: usize) -> Result<Vec<SimilarDocument>> {
      let params = QueryParams { text: text.to_string(), n_results };
      let request = Request::with_params(Command::QuerySimilar, &params)?;
      self
         .commands
         .call_typed(&request, self.config.bulk_timeout(), "query_similar")
         .await
   }

   pub async fn ping(&self) -> Result<()> {
      let request = Request::new(Command::Ping);
      self
         .commands
         .send(&request, self.config.ping_timeout(), self.commands.policy.max_attempts)
         .await?
         .into_data(Command::Ping.as_str())
         .map(|_| ())
   }

   /// Asks the daemon to acknowledge a restart; the caller owns the actual
   /// process cycle.
   pub async fn restart(&self) -> Result<()> {
      let params = RestartParams {
         repo_path:       Some(self.params.repo_path.clone()),
         collection_name: self.params.collection_name.clone(),
         model_name:      self.params.embedding_model.clone(),
      };
      self.send_ack(&Request::with_params(Command::Restart, &params)?).await
   }

   pub async fn kill(&self) -> Result<()> {
      let request = Request::new(Command::Kill);
      let response = self
         .commands
         .send(&request, self.config.ping_timeout(), 1)
         .await?;
      response.into_data(Command::Kill.as_str()).map(|_| ())
   }

   async fn send_ack(&self, request: &Request) -> Result<()> {
      self
         .commands
         .call(request, self.config.request_timeout())
         .await
         .map(|_| ())
   }
}
