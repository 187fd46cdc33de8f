#![allow(dead_code, reason = "each test binary uses a different subset of helpers")]

use std::{
   collections::BTreeMap,
   path::{Path, PathBuf},
   sync::{
      Arc,
      atomic::{AtomicUsize, Ordering},
   },
   time::Duration,
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tempfile::TempDir;
use tokio::{task::JoinHandle, time};
use vectord::{
   client::{CommandClient, RetryPolicy},
   config::Config,
   ipc::{Command, InitializeParams, Request, Response},
   server::Server,
   store::{Collection, IndexProvider, IndexSettings, LocalProvider, StoreError},
   types::SimilarDocument,
   usock,
};

/// Config with short timeouts suitable for tests.
pub fn test_config(runtime_dir: &Path) -> Config {
   Config {
      runtime_dir: Some(runtime_dir.to_path_buf()),
      embedding_dims: 64,
      request_timeout_ms: 5_000,
      ping_timeout_ms: 1_000,
      list_timeout_ms: 5_000,
      bulk_timeout_ms: 5_000,
      retry_delay_ms: 20,
      start_settle_ms: 100,
      start_ping_delay_ms: 100,
      stop_timeout_ms: 2_000,
      server_read_timeout_ms: 2_000,
      metadata_timeout_ms: 1_000,
      shutdown_grace_ms: 500,
      ..Config::default()
   }
}

/// An in-process daemon bound to a socket in a temp directory.
pub struct TestServer {
   pub server:  Arc<Server>,
   pub socket:  PathBuf,
   pub config:  Config,
   pub handle:  JoinHandle<vectord::Result<()>>,
   pub runtime: TempDir,
}

impl TestServer {
   pub async fn start(config: Config, provider: Arc<dyn IndexProvider>) -> Self {
      let runtime = TempDir::new().unwrap();
      let config = Config { runtime_dir: Some(runtime.path().to_path_buf()), ..config };
      let socket = usock::socket_path(runtime.path());
      let listener = usock::Listener::bind(&socket).await.unwrap();
      let server = Server::new(config.clone(), provider);
      let handle = tokio::spawn(Arc::clone(&server).serve(listener));
      Self { server, socket, config, handle, runtime }
   }

   pub async fn local() -> Self {
      Self::start(test_config(&std::env::temp_dir()), Arc::new(LocalProvider::new())).await
   }

   pub fn client(&self) -> CommandClient {
      CommandClient::new(&self.socket, RetryPolicy::from_config(&self.config))
   }

   /// Sends one request on one connection, no retries.
   pub async fn send(&self, request: &Request) -> Response {
      self
         .client()
         .send_once(request, Duration::from_secs(5))
         .await
         .unwrap()
   }

   pub async fn initialize(&self, repo: &Path) -> Response {
      let params = InitializeParams { repo_path: repo.to_path_buf(), ..Default::default() };
      self
         .send(&Request::with_params(Command::Initialize, &params).unwrap())
         .await
   }

   /// Waits for the accept loop to exit after a `kill`.
   pub async fn join(self) -> vectord::Result<()> {
      time::timeout(Duration::from_secs(5), self.handle)
         .await
         .expect("server did not stop")
         .expect("server task panicked")
   }
}

pub fn error_of(response: &Response) -> &str {
   response.error_message().unwrap_or_else(|| panic!("expected error, got {response:?}"))
}

pub fn data_of(response: Response) -> Value {
   match response {
      Response::Success { data, .. } => data.unwrap_or(Value::Null),
      Response::Error { error } => panic!("expected success, got error {error}"),
   }
}

/// Call counters shared between a [`ScriptedProvider`] and the test.
#[derive(Debug, Default)]
pub struct CallCounts {
   pub query_calls:    AtomicUsize,
   pub metadata_calls: AtomicUsize,
   pub opens:          AtomicUsize,
}

impl CallCounts {
   pub fn queries(&self) -> usize {
      self.query_calls.load(Ordering::SeqCst)
   }

   pub fn metadata(&self) -> usize {
      self.metadata_calls.load(Ordering::SeqCst)
   }
}

/// In-memory backend whose queries can stall or fail on demand.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
   pub calls:          Arc<CallCounts>,
   pub query_stall:    Duration,
   pub metadata_stall: Duration,
   pub upsert_stall:   Duration,
   pub fail_queries:   bool,
}

#[async_trait]
impl IndexProvider for ScriptedProvider {
   async fn open_collection(&self, _settings: &IndexSettings) -> vectord::Result<Box<dyn Collection>> {
      self.calls.opens.fetch_add(1, Ordering::SeqCst);
      Ok(Box::new(ScriptedCollection {
         docs:     BTreeMap::new(),
         provider: self.clone(),
      }))
   }

   async fn create_collection(
      &self,
      settings: &IndexSettings,
   ) -> vectord::Result<Box<dyn Collection>> {
      self.open_collection(settings).await
   }
}

struct ScriptedCollection {
   docs:     BTreeMap<String, (String, Map<String, Value>)>,
   provider: ScriptedProvider,
}

#[async_trait]
impl Collection for ScriptedCollection {
   async fn upsert(
      &mut self,
      id: &str,
      content: &str,
      metadata: Map<String, Value>,
   ) -> vectord::Result<()> {
      time::sleep(self.provider.upsert_stall).await;
      self
         .docs
         .insert(id.to_string(), (content.to_string(), metadata));
      Ok(())
   }

   async fn delete(&mut self, id: &str) -> vectord::Result<()> {
      match self.docs.remove(id) {
         Some(_) => Ok(()),
         None => Err(StoreError::NotFound(id.to_string()).into()),
      }
   }

   async fn query_by_metadata(&self) -> vectord::Result<Vec<Map<String, Value>>> {
      self
         .provider
         .calls
         .metadata_calls
         .fetch_add(1, Ordering::SeqCst);
      time::sleep(self.provider.metadata_stall).await;
      Ok(self.docs.values().map(|(_, m)| m.clone()).collect())
   }

   async fn query_similar(&self, _text: &str, k: usize) -> vectord::Result<Vec<SimilarDocument>> {
      self.provider.calls.query_calls.fetch_add(1, Ordering::SeqCst);
      time::sleep(self.provider.query_stall).await;
      if self.provider.fail_queries {
         return Err(StoreError::Embed("backend unavailable".to_string()).into());
      }
      Ok(self
         .docs
         .values()
         .take(k)
         .map(|(content, metadata)| SimilarDocument {
            content:  content.clone(),
            metadata: metadata.clone(),
         })
         .collect())
   }
}

/// Writes `files` under `root` and returns their absolute paths.
pub fn write_files(root: &Path, files: &[(&str, &str)]) -> Vec<PathBuf> {
   files
      .iter()
      .map(|(rel, content)| {
         let path = root.join(rel);
         std::fs::create_dir_all(path.parent().unwrap()).unwrap();
         std::fs::write(&path, content).unwrap();
         path
      })
      .collect()
}
