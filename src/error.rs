use std::{io, time::Duration};

use thiserror::Error;

use crate::{store::StoreError, usock::SocketError};

/// Main error type for vectord.
///
/// Every variant maps onto one [`ErrorKind`], which is what the retrying
/// client and the CLI exit codes look at.
#[derive(Debug, Error)]
pub enum Error {
   /// I/O error occurred during file or process operations.
   #[error("io error: {0}")]
   Io(#[from] io::Error),

   /// JSON serialization or deserialization error outside the wire codec.
   #[error("json error: {0}")]
   Json(#[from] serde_json::Error),

   /// Wire codec error.
   #[error("ipc error: {0}")]
   Ipc(#[from] IpcError),

   /// Socket transport error.
   #[error("socket error: {0}")]
   Socket(#[from] SocketError),

   /// Index backend error.
   #[error("store error: {0}")]
   Store(#[from] StoreError),

   /// Configuration-related error occurred.
   #[error("config error: {0}")]
   Config(#[from] ConfigError),

   /// No reply arrived within the deadline of a command.
   #[error("timed out after {}ms waiting for {command}", .after.as_millis())]
   Timeout { command: String, after: Duration },

   /// The daemon answered with `{error: ...}`.
   #[error("command {command} rejected: {message}")]
   Application { command: String, message: String },

   /// A command kept failing until the attempt budget ran out.
   #[error("command {command} failed after {attempts} attempts: {source}")]
   RetriesExhausted {
      command:  String,
      attempts: usize,
      #[source]
      source:   Box<Error>,
   },

   /// A reply was well-formed but did not carry the expected payload.
   #[error("unexpected response from server during {0}")]
   UnexpectedResponse(&'static str),

   /// The daemon could not be reached or made healthy.
   #[error("service unavailable: {reason}{}", format_output(.output))]
   ServiceUnavailable { reason: String, output: String },

   /// The daemon did not become healthy before the start deadline.
   #[error("service failed to start: {reason}{}", format_output(.output))]
   ServiceStartTimeout { reason: String, output: String },

   /// Failed to spawn the daemon process.
   #[error("failed to spawn daemon: {0}")]
   DaemonSpawn(#[source] io::Error),

   /// Server error occurred during a specific operation.
   #[error("server error during {op}: {reason}")]
   Server { op: &'static str, reason: String },
}

/// Coarse classification used for retry decisions and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
   /// Connect refused, reset, partial read.
   Transport,
   /// No reply within the deadline.
   Timeout,
   /// Undecodable or oversized payload, unsupported version.
   Protocol,
   /// Well-formed error reply from the daemon.
   Application,
   /// Startup failures and everything local to this process.
   Fatal,
}

impl Error {
   pub fn kind(&self) -> ErrorKind {
      match self {
         Self::Socket(_) => ErrorKind::Transport,
         Self::Ipc(e) => e.kind(),
         Self::Timeout { .. } => ErrorKind::Timeout,
         Self::Application { .. } => ErrorKind::Application,
         Self::UnexpectedResponse(_) | Self::Json(_) => ErrorKind::Protocol,
         Self::RetriesExhausted { source, .. } => source.kind(),
         Self::Io(_)
         | Self::Store(_)
         | Self::Config(_)
         | Self::ServiceUnavailable { .. }
         | Self::ServiceStartTimeout { .. }
         | Self::DaemonSpawn(_)
         | Self::Server { .. } => ErrorKind::Fatal,
      }
   }

   /// Transport failures and timeouts may succeed on a fresh connection.
   pub fn is_retryable(&self) -> bool {
      !matches!(self, Self::RetriesExhausted { .. })
         && matches!(self.kind(), ErrorKind::Transport | ErrorKind::Timeout)
   }

   pub fn exit_code(&self) -> i32 {
      match self {
         Self::ServiceUnavailable { .. } | Self::ServiceStartTimeout { .. } | Self::DaemonSpawn(_) => {
            10
         },
         Self::Timeout { .. } => 11,
         Self::RetriesExhausted { .. } => 11,
         _ => 1,
      }
   }
}

fn format_output(output: &str) -> String {
   if output.trim().is_empty() {
      String::new()
   } else {
      format!("\n--- daemon output ---\n{}", output.trim_end())
   }
}

/// Errors that can occur while framing messages on a connection.
#[derive(Debug, Error)]
pub enum IpcError {
   /// The message size exceeds the maximum allowed size.
   #[error("message too large: {0} bytes")]
   MessageTooLarge(usize),

   /// Failed to serialize a message.
   #[error("failed to serialize: {0}")]
   Serialize(#[source] serde_json::Error),

   /// Failed to deserialize a received message.
   #[error("failed to deserialize: {0}")]
   Deserialize(#[source] serde_json::Error),

   /// Failed to read from the connection.
   #[error("failed to read: {0}")]
   Read(#[source] io::Error),

   /// Failed to write to the connection.
   #[error("failed to write: {0}")]
   Write(#[source] io::Error),

   /// The peer speaks a protocol version this build does not.
   #[error("Unsupported protocol version: {0}")]
   UnsupportedVersion(u32),
}

impl IpcError {
   pub const fn kind(&self) -> ErrorKind {
      match self {
         Self::Read(_) | Self::Write(_) => ErrorKind::Transport,
         Self::MessageTooLarge(_)
         | Self::Serialize(_)
         | Self::Deserialize(_)
         | Self::UnsupportedVersion(_) => ErrorKind::Protocol,
      }
   }
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
   /// The merged configuration could not be extracted.
   #[error("failed to load configuration: {0}")]
   Load(String),

   /// A value is outside its accepted range.
   #[error("invalid config: {0}")]
   Invalid(String),

   /// No runtime directory could be derived for this user.
   #[error("failed to resolve runtime directory")]
   RuntimeDir,
}

/// Standard result type using [`enum@Error`] as the default error type
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
   use super::*;

   fn refused() -> Error {
      SocketError::Connect(io::Error::from(io::ErrorKind::ConnectionRefused)).into()
   }

   #[test]
   fn transport_and_timeout_are_retryable() {
      assert!(refused().is_retryable());
      let timeout = Error::Timeout { command: "ping".into(), after: Duration::from_secs(1) };
      assert_eq!(timeout.kind(), ErrorKind::Timeout);
      assert!(timeout.is_retryable());
   }

   #[test]
   fn application_and_protocol_are_not_retryable() {
      let app = Error::Application { command: "bogus".into(), message: "Unknown command: bogus".into() };
      assert_eq!(app.kind(), ErrorKind::Application);
      assert!(!app.is_retryable());

      let proto: Error = IpcError::MessageTooLarge(10).into();
      assert_eq!(proto.kind(), ErrorKind::Protocol);
      assert!(!proto.is_retryable());
   }

   #[test]
   fn exhausted_keeps_last_cause_and_is_final() {
      let err = Error::RetriesExhausted {
         command:  "query_similar".into(),
         attempts: 3,
         source:   Box::new(refused()),
      };
      assert_eq!(err.kind(), ErrorKind::Transport);
      assert!(!err.is_retryable());
      let msg = err.to_string();
      assert!(msg.contains("query_similar"));
      assert!(msg.contains("3 attempts"));
      assert_eq!(err.exit_code(), 11);
   }

   #[test]
   fn start_timeout_surfaces_daemon_output() {
      let err = Error::ServiceStartTimeout {
         reason: "socket did not appear".into(),
         output: "bind failed: permission denied\n".into(),
      };
      let msg = err.to_string();
      assert!(msg.contains("socket did not appear"));
      assert!(msg.contains("bind failed"));
      assert_eq!(err.exit_code(), 10);
   }
}
