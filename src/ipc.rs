//! Wire protocol between clients and the daemon.
//!
//! Every frame is a 4-byte little-endian length followed by one UTF-8 JSON
//! document. A connection carries exactly one request and one response.

use std::{fmt, io, path::PathBuf};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use smallvec::SmallVec;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Result, error::IpcError};

pub const PROTOCOL_VERSIONS: &[u32] = &[1];
pub const PROTOCOL_VERSION: u32 = 1;

pub const DEFAULT_N_RESULTS: usize = 5;

const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// The closed set of commands the daemon understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
   Ping,
   Initialize,
   AddFiles,
   RemoveFiles,
   GetStoredFiles,
   QuerySimilar,
   Restart,
   Kill,
}

impl Command {
   pub const ALL: [Self; 8] = [
      Self::Ping,
      Self::Initialize,
      Self::AddFiles,
      Self::RemoveFiles,
      Self::GetStoredFiles,
      Self::QuerySimilar,
      Self::Restart,
      Self::Kill,
   ];

   pub const fn as_str(self) -> &'static str {
      match self {
         Self::Ping => "ping",
         Self::Initialize => "initialize",
         Self::AddFiles => "add_files",
         Self::RemoveFiles => "remove_files",
         Self::GetStoredFiles => "get_stored_files",
         Self::QuerySimilar => "query_similar",
         Self::Restart => "restart",
         Self::Kill => "kill",
      }
   }

   pub fn parse(name: &str) -> Option<Self> {
      Self::ALL.into_iter().find(|c| c.as_str() == name)
   }

   /// Commands served while the index is still unloaded.
   pub const fn allowed_before_init(self) -> bool {
      matches!(self, Self::Ping | Self::Initialize)
   }
}

impl fmt::Display for Command {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

const fn default_version() -> u32 {
   PROTOCOL_VERSION
}

/// Client request message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
   #[serde(default = "default_version")]
   pub version: u32,
   pub command: String,
   #[serde(default, skip_serializing_if = "Value::is_null")]
   pub params:  Value,
}

impl Request {
   pub fn new(command: Command) -> Self {
      Self { version: PROTOCOL_VERSION, command: command.as_str().to_string(), params: Value::Null }
   }

   pub fn with_params<P: Serialize>(command: Command, params: &P) -> Result<Self> {
      let params = serde_json::to_value(params).map_err(IpcError::Serialize)?;
      Ok(Self { params, ..Self::new(command) })
   }

   /// Builds a request for an arbitrary command name, known or not.
   pub fn raw(command: impl Into<String>, params: Value) -> Self {
      Self { version: PROTOCOL_VERSION, command: command.into(), params }
   }

   pub fn check_version(&self) -> Result<(), IpcError> {
      if PROTOCOL_VERSIONS.contains(&self.version) {
         Ok(())
      } else {
         Err(IpcError::UnsupportedVersion(self.version))
      }
   }

   /// Decodes `params` into a typed struct. Absent params decode as `{}`.
   pub fn params<P: DeserializeOwned>(&self) -> serde_json::Result<P> {
      match &self.params {
         Value::Null => serde_json::from_value(Value::Object(Map::new())),
         other => P::deserialize(other),
      }
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
   Success,
}

/// Server response message: `{status: "success", data?}` or `{error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
   Success {
      status: Status,
      #[serde(default, skip_serializing_if = "Option::is_none")]
      data:   Option<Value>,
   },
   Error {
      error: String,
   },
}

impl Response {
   pub const fn ok() -> Self {
      Self::Success { status: Status::Success, data: None }
   }

   pub fn ok_with<T: Serialize>(data: &T) -> Self {
      match serde_json::to_value(data) {
         Ok(data) => Self::Success { status: Status::Success, data: Some(data) },
         Err(e) => Self::error(format!("failed to serialize: {e}")),
      }
   }

   pub fn error(message: impl Into<String>) -> Self {
      Self::Error { error: message.into() }
   }

   pub const fn is_success(&self) -> bool {
      matches!(self, Self::Success { .. })
   }

   pub fn error_message(&self) -> Option<&str> {
      match self {
         Self::Error { error } => Some(error),
         Self::Success { .. } => None,
      }
   }

   /// Converts an error reply into [`crate::Error::Application`].
   pub fn into_data(self, command: &str) -> Result<Option<Value>> {
      match self {
         Self::Success { data, .. } => Ok(data),
         Self::Error { error } => {
            Err(crate::Error::Application { command: command.to_string(), message: error })
         },
      }
   }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeParams {
   pub repo_path:       PathBuf,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub collection_name: Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub embedding_model: Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub device:          Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsParams {
   pub paths: Vec<PathBuf>,
}

const fn default_n_results() -> usize {
   DEFAULT_N_RESULTS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
   pub text:      String,
   #[serde(default = "default_n_results")]
   pub n_results: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartParams {
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub repo_path:       Option<PathBuf>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub collection_name: Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub model_name:      Option<String>,
}

/// Stack-allocated buffer for socket I/O operations
pub struct SocketBuffer {
   buf: SmallVec<[u8; 2048]>,
}

impl io::Write for SocketBuffer {
   fn write(&mut self, data: &[u8]) -> io::Result<usize> {
      self.buf.extend_from_slice(data);
      Ok(data.len())
   }

   fn flush(&mut self) -> io::Result<()> {
      Ok(())
   }
}

impl Default for SocketBuffer {
   fn default() -> Self {
      Self::new()
   }
}

impl SocketBuffer {
   pub fn new() -> Self {
      Self { buf: SmallVec::new() }
   }

   /// Serializes and sends a message with length prefix
   pub async fn send<W, T>(&mut self, writer: &mut W, msg: &T) -> Result<()>
   where
      W: AsyncWrite + Unpin,
      T: Serialize,
   {
      self.send_with_limit(writer, msg, DEFAULT_MAX_MESSAGE_BYTES).await
   }

   pub async fn send_with_limit<W, T>(&mut self, writer: &mut W, msg: &T, max_len: usize) -> Result<()>
   where
      W: AsyncWrite + Unpin,
      T: Serialize,
   {
      self.buf.clear();
      self.buf.resize(4, 0u8);
      serde_json::to_writer(&mut *self, msg).map_err(IpcError::Serialize)?;
      let payload_len = self.buf.len() - 4;
      if payload_len > max_len {
         return Err(IpcError::MessageTooLarge(payload_len).into());
      }
      let prefix =
         u32::try_from(payload_len).map_err(|_| IpcError::MessageTooLarge(payload_len))?;
      self.buf[..4].copy_from_slice(&prefix.to_le_bytes());
      writer.write_all(&self.buf).await.map_err(IpcError::Write)?;
      writer.flush().await.map_err(IpcError::Write)?;
      Ok(())
   }

   /// Receives and deserializes a message with length prefix
   pub async fn recv<'de, R, T>(&'de mut self, reader: &mut R) -> Result<T>
   where
      R: AsyncRead + Unpin,
      T: Deserialize<'de>,
   {
      self
         .recv_with_limit(reader, DEFAULT_MAX_MESSAGE_BYTES)
         .await
   }

   pub async fn recv_with_limit<'de, R, T>(
      &'de mut self,
      reader: &mut R,
      max_len: usize,
   ) -> Result<T>
   where
      R: AsyncRead + Unpin,
      T: Deserialize<'de>,
   {
      let mut len_buf = [0u8; 4];
      reader
         .read_exact(&mut len_buf)
         .await
         .map_err(IpcError::Read)?;
      let len = u32::from_le_bytes(len_buf) as usize;

      if len > max_len {
         return Err(IpcError::MessageTooLarge(len).into());
      }

      self.buf.resize(len, 0u8);
      reader
         .read_exact(self.buf.as_mut_slice())
         .await
         .map_err(IpcError::Read)?;
      serde_json::from_slice(&self.buf).map_err(|e| IpcError::Deserialize(e).into())
   }
}

#[cfg(test)]
mod tests {
   use serde_json::json;

   use super::*;

   #[test]
   fn command_names_round_trip() {
      for command in Command::ALL {
         assert_eq!(Command::parse(command.as_str()), Some(command));
      }
      assert_eq!(Command::parse("bogus"), None);
      assert_eq!(Command::parse("PING"), None);
   }

   #[test]
   fn only_ping_and_initialize_skip_the_gate() {
      let open: Vec<_> = Command::ALL
         .into_iter()
         .filter(|c| c.allowed_before_init())
         .collect();
      assert_eq!(open, vec![Command::Ping, Command::Initialize]);
   }

   #[test]
   fn request_version_defaults_to_one() {
      let req: Request = serde_json::from_value(json!({"command": "ping"})).unwrap();
      assert_eq!(req.version, 1);
      assert!(req.check_version().is_ok());

      let req: Request = serde_json::from_value(json!({"version": 9, "command": "ping"})).unwrap();
      let err = req.check_version().unwrap_err();
      assert_eq!(err.to_string(), "Unsupported protocol version: 9");
   }

   #[test]
   fn absent_params_decode_with_defaults() {
      let req = Request::new(Command::GetStoredFiles);
      let restart: RestartParams = req.params().unwrap();
      assert_eq!(restart, RestartParams::default());

      let req = Request::raw("query_similar", json!({"text": "hello"}));
      let query: QueryParams = req.params().unwrap();
      assert_eq!(query.n_results, DEFAULT_N_RESULTS);
   }

   #[test]
   fn response_shapes() {
      assert_eq!(serde_json::to_value(Response::ok()).unwrap(), json!({"status": "success"}));
      assert_eq!(
         serde_json::to_value(Response::ok_with(&"pong")).unwrap(),
         json!({"status": "success", "data": "pong"})
      );
      assert_eq!(
         serde_json::to_value(Response::error("boom")).unwrap(),
         json!({"error": "boom"})
      );

      let parsed: Response = serde_json::from_value(json!({"error": "nope"})).unwrap();
      assert_eq!(parsed.error_message(), Some("nope"));
      let parsed: Response = serde_json::from_value(json!({"status": "success"})).unwrap();
      assert!(parsed.is_success());
   }

   #[test]
   fn error_reply_becomes_application_error() {
      let err = Response::error("Unknown command: bogus")
         .into_data("bogus")
         .unwrap_err();
      assert_eq!(err.kind(), crate::ErrorKind::Application);
      assert!(err.to_string().contains("Unknown command: bogus"));
   }
}
