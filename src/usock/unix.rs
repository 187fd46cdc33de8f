//! Unix domain socket listener and stream

use std::{
   fs, io,
   os::unix::fs::MetadataExt,
   path::{Path, PathBuf},
   pin::Pin,
   task::{self, Poll},
};

use tokio::{
   io::ReadBuf,
   net::{UnixListener as TokioUnixListener, UnixStream as TokioUnixStream},
};

use super::{MAX_SOCKET_PATH_LEN, SocketError};
use crate::Result;

/// Unix domain socket listener. Dropping it removes the socket file, unless
/// the path has since been rebound by another listener.
pub struct Listener {
   inner:   TokioUnixListener,
   path:    PathBuf,
   /// `(dev, ino)` of the socket file created by this bind.
   file_id: Option<(u64, u64)>,
}

impl Listener {
   /// Binds to a Unix domain socket path
   pub async fn bind(path: &Path) -> Result<Self> {
      if path.as_os_str().len() > MAX_SOCKET_PATH_LEN {
         return Err(SocketError::PathTooLong(path.to_path_buf()).into());
      }
      if let Some(parent) = path.parent() {
         super::ensure_runtime_dir(parent)?;
      }

      if path.exists() {
         // Unlinking a live daemon's socket would orphan it; only a failed
         // connect proves the file is stale.
         if Stream::connect(path).await.is_ok() {
            return Err(SocketError::AlreadyRunning.into());
         }
         tracing::warn!("removing stale socket {}", path.display());
         fs::remove_file(path).map_err(SocketError::RemoveStale)?;
      }

      let inner = TokioUnixListener::bind(path).map_err(SocketError::Bind)?;
      {
         use std::os::unix::fs::PermissionsExt;
         fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(SocketError::Bind)?;
      }
      let file_id = file_id(path);
      Ok(Self { inner, path: path.to_path_buf(), file_id })
   }

   /// Accepts an incoming connection
   pub async fn accept(&self) -> Result<Stream> {
      let (stream, _) = self.inner.accept().await.map_err(SocketError::Accept)?;
      Ok(Stream { inner: stream })
   }

   pub fn path(&self) -> &Path {
      &self.path
   }
}

impl Drop for Listener {
   fn drop(&mut self) {
      let current = file_id(&self.path);
      if current.is_some() && current == self.file_id {
         let _ = fs::remove_file(&self.path);
      } else if current.is_some() {
         tracing::debug!("socket {} was rebound by another daemon, leaving it", self.path.display());
      }
   }
}

fn file_id(path: &Path) -> Option<(u64, u64)> {
   fs::symlink_metadata(path).ok().map(|m| (m.dev(), m.ino()))
}

/// Unix domain socket stream implementing async I/O
#[repr(transparent)]
pub struct Stream {
   inner: TokioUnixStream,
}

impl Stream {
   /// Connects to a Unix domain socket
   pub async fn connect(path: &Path) -> Result<Self> {
      let inner = TokioUnixStream::connect(path)
         .await
         .map_err(SocketError::Connect)?;
      Ok(Self { inner })
   }
}

impl tokio::io::AsyncRead for Stream {
   fn poll_read(
      mut self: Pin<&mut Self>,
      cx: &mut task::Context<'_>,
      buf: &mut ReadBuf<'_>,
   ) -> Poll<io::Result<()>> {
      Pin::new(&mut self.inner).poll_read(cx, buf)
   }
}

impl tokio::io::AsyncWrite for Stream {
   fn poll_write(
      mut self: Pin<&mut Self>,
      cx: &mut task::Context<'_>,
      buf: &[u8],
   ) -> Poll<io::Result<usize>> {
      Pin::new(&mut self.inner).poll_write(cx, buf)
   }

   fn poll_flush(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
      Pin::new(&mut self.inner).poll_flush(cx)
   }

   /// Half-closes the write side; the peer sees EOF.
   fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
      Pin::new(&mut self.inner).poll_shutdown(cx)
   }
}
