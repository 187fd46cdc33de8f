//! Unix domain socket transport and runtime directory files

use std::{
   fs, io,
   path::{Path, PathBuf},
};

use crate::config::{LOG_FILE_NAME, PID_FILE_NAME, SOCKET_FILE_NAME};

/// Errors that can occur during socket operations
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
   #[error("server already running")]
   AlreadyRunning,

   #[error("failed to connect: {0}")]
   Connect(#[source] io::Error),

   #[error("failed to bind: {0}")]
   Bind(#[source] io::Error),

   #[error("accept failed: {0}")]
   Accept(#[source] io::Error),

   #[error("failed to create socket directory: {0}")]
   CreateDir(#[source] io::Error),

   #[error("failed to remove stale socket: {0}")]
   RemoveStale(#[source] io::Error),

   #[error("socket path too long: {0}")]
   PathTooLong(PathBuf),
}

mod unix;

pub use unix::*;

// sockaddr_un.sun_path is 108 bytes on Linux, 104 on macOS.
const MAX_SOCKET_PATH_LEN: usize = 100;

pub fn socket_path(runtime_dir: &Path) -> PathBuf {
   runtime_dir.join(SOCKET_FILE_NAME)
}

pub fn pid_path(runtime_dir: &Path) -> PathBuf {
   runtime_dir.join(PID_FILE_NAME)
}

pub fn log_path(runtime_dir: &Path) -> PathBuf {
   runtime_dir.join(LOG_FILE_NAME)
}

/// Creates the runtime directory if needed and restricts it to the owner.
pub fn ensure_runtime_dir(dir: &Path) -> Result<(), SocketError> {
   fs::create_dir_all(dir).map_err(SocketError::CreateDir)?;
   use std::os::unix::fs::PermissionsExt;
   fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(SocketError::CreateDir)
}

pub fn write_pid(runtime_dir: &Path) -> io::Result<()> {
   fs::write(pid_path(runtime_dir), format!("{}", std::process::id()))
}

pub fn read_pid(runtime_dir: &Path) -> Option<u32> {
   let text = fs::read_to_string(pid_path(runtime_dir)).ok()?;
   text.trim().parse::<u32>().ok()
}

pub fn remove_pid(runtime_dir: &Path) {
   let _ = fs::remove_file(pid_path(runtime_dir));
}

/// Removes a socket file left behind by a daemon that is no longer listening.
pub fn remove_socket(runtime_dir: &Path) {
   let _ = fs::remove_file(socket_path(runtime_dir));
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn runtime_files_live_side_by_side() {
      let dir = Path::new("/run/user/1000/vectord");
      assert_eq!(socket_path(dir), dir.join("vector_store.sock"));
      assert_eq!(pid_path(dir), dir.join("vector_store.pid"));
      assert_eq!(log_path(dir), dir.join("vector_store_service.log"));
   }

   #[test]
   fn pid_file_round_trip() {
      let dir = tempfile::tempdir().unwrap();
      assert_eq!(read_pid(dir.path()), None);
      write_pid(dir.path()).unwrap();
      assert_eq!(read_pid(dir.path()), Some(std::process::id()));
      remove_pid(dir.path());
      assert_eq!(read_pid(dir.path()), None);
   }

   #[test]
   fn runtime_dir_is_private() {
      use std::os::unix::fs::PermissionsExt;
      let dir = tempfile::tempdir().unwrap();
      let runtime = dir.path().join("rt");
      ensure_runtime_dir(&runtime).unwrap();
      let mode = fs::metadata(&runtime).unwrap().permissions().mode();
      assert_eq!(mode & 0o777, 0o700);
   }
}
