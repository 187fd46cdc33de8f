//! Daemon discovery and lifecycle management.
//!
//! The socket file is treated as a hint only: a daemon counts as alive when
//! it answers `ping`. Stale sockets are removed and a fresh daemon spawned.

use std::{
   fs::OpenOptions,
   os::unix::process::CommandExt,
   path::{Path, PathBuf},
   process::{Child, Command, Stdio},
   time::{Duration, Instant},
};

use tokio::time;

use crate::{
   Error, Result,
   client::{CommandClient, RetryPolicy},
   config::Config,
   ipc::{self, Request},
   usock,
   util::read_tail,
};

/// Interval between checks for the socket file after spawning.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How much of the daemon log is attached to startup errors.
const LOG_TAIL_BYTES: u64 = 4096;

/// Starts, pings and stops the daemon that serves one runtime directory.
#[derive(Debug, Clone)]
pub struct ServiceManager {
   config:      Config,
   runtime_dir: PathBuf,
   socket_path: PathBuf,
   exe:         PathBuf,
}

impl ServiceManager {
   /// Uses the currently running executable as the daemon binary.
   pub fn new(config: Config) -> Result<Self> {
      let exe = std::env::current_exe()?;
      Ok(Self::with_executable(config, exe))
   }

   pub fn with_executable(config: Config, exe: PathBuf) -> Self {
      let runtime_dir = config.resolve_runtime_dir();
      let socket_path = usock::socket_path(&runtime_dir);
      Self { config, runtime_dir, socket_path, exe }
   }

   pub const fn config(&self) -> &Config {
      &self.config
   }

   pub fn runtime_dir(&self) -> &Path {
      &self.runtime_dir
   }

   pub fn socket_path(&self) -> &Path {
      &self.socket_path
   }

   pub fn log_path(&self) -> PathBuf {
      usock::log_path(&self.runtime_dir)
   }

   fn client(&self) -> CommandClient {
      CommandClient::new(&self.socket_path, RetryPolicy::from_config(&self.config))
   }

   /// Single ping with the short liveness timeout.
   pub async fn is_alive(&self) -> bool {
      self
         .client()
         .ping(self.config.ping_timeout())
         .await
         .is_ok()
   }

   /// Returns once a daemon answers `ping`, spawning one if needed.
   pub async fn ensure_running(&self) -> Result<()> {
      if self.socket_path.exists() {
         match self.client().ping(self.config.ping_timeout()).await {
            Ok(()) => return Ok(()),
            Err(e) => {
               tracing::warn!("daemon at {} is not responding ({e}), restarting", self.socket_path.display());
               usock::remove_socket(&self.runtime_dir);
            },
         }
      }
      self.start().await
   }

   /// Spawns a detached daemon and waits until it answers `ping`.
   pub async fn start(&self) -> Result<()> {
      usock::ensure_runtime_dir(&self.runtime_dir)?;
      let mut child = self.spawn()?;
      tracing::info!("spawned daemon pid {}", child.id());

      let deadline = Instant::now() + self.config.start_timeout();
      while !self.socket_path.exists() {
         if let Ok(Some(status)) = child.try_wait()
            && !status.success()
         {
            return Err(Error::ServiceUnavailable {
               reason: format!("daemon exited with {status} before listening"),
               output: self.log_tail(),
            });
         }
         if Instant::now() >= deadline {
            return Err(Error::ServiceStartTimeout {
               reason: format!(
                  "socket {} did not appear within {}ms",
                  self.socket_path.display(),
                  self.config.start_timeout_ms
               ),
               output: self.log_tail(),
            });
         }
         time::sleep(POLL_INTERVAL).await;
      }

      time::sleep(self.config.start_settle()).await;

      let client = self.client();
      let mut last_err = None;
      for attempt in 1..=self.config.start_ping_attempts {
         match client.ping(self.config.ping_timeout()).await {
            Ok(()) => {
               tracing::info!("daemon ready at {}", self.socket_path.display());
               return Ok(());
            },
            Err(e) => {
               tracing::debug!("startup ping {attempt} failed: {e}");
               last_err = Some(e);
            },
         }
         if attempt < self.config.start_ping_attempts {
            time::sleep(self.config.start_ping_delay()).await;
         }
      }

      Err(Error::ServiceStartTimeout {
         reason: last_err.map_or_else(
            || "daemon did not answer ping".to_string(),
            |e| format!("daemon did not answer ping: {e}"),
         ),
         output: self.log_tail(),
      })
   }

   fn spawn(&self) -> Result<Child> {
      let log_path = self.log_path();
      let log = OpenOptions::new()
         .create(true)
         .append(true)
         .open(&log_path)
         .map_err(Error::DaemonSpawn)?;
      let log_err = log.try_clone().map_err(Error::DaemonSpawn)?;

      let mut command = Command::new(&self.exe);
      command
         .arg("serve")
         .arg(&self.runtime_dir)
         .stdin(Stdio::null())
         .stdout(Stdio::from(log))
         .stderr(Stdio::from(log_err))
         .process_group(0);
      command.spawn().map_err(Error::DaemonSpawn)
   }

   /// Stops the daemon: `kill` over the socket, then SIGTERM via the PID
   /// file. Returns whether a daemon was found.
   pub async fn stop(&self) -> Result<bool> {
      let mut found = false;

      if self.socket_path.exists() {
         let request = Request::new(ipc::Command::Kill);
         match self
            .client()
            .send(&request, self.config.ping_timeout(), 1)
            .await
         {
            Ok(response) if response.is_success() => found = true,
            Ok(response) => {
               tracing::debug!("kill rejected: {:?}", response.error_message());
            },
            Err(e) => tracing::debug!("kill over socket failed: {e}"),
         }
      }

      if !found && let Some(pid) = usock::read_pid(&self.runtime_dir) {
         if looks_like_vectord_serve(pid) {
            tracing::info!("sending SIGTERM to daemon pid {pid}");
            let _ = Command::new("kill")
               .args(["-TERM", &pid.to_string()])
               .status();
            found = true;
         } else {
            tracing::debug!("pid {pid} is not a vectord daemon, ignoring");
         }
      }

      let deadline = Instant::now() + self.config.stop_timeout();
      while self.socket_path.exists() && Instant::now() < deadline {
         time::sleep(POLL_INTERVAL).await;
      }

      usock::remove_socket(&self.runtime_dir);
      usock::remove_pid(&self.runtime_dir);
      Ok(found)
   }

   pub async fn restart(&self) -> Result<()> {
      if self.socket_path.exists() {
         let request = Request::new(ipc::Command::Restart);
         if let Err(e) = self
            .client()
            .send(&request, self.config.ping_timeout(), 1)
            .await
         {
            tracing::debug!("restart acknowledgement failed: {e}");
         }
      }
      self.stop().await?;
      self.ensure_running().await
   }

   fn log_tail(&self) -> String {
      read_tail(&self.log_path(), LOG_TAIL_BYTES)
   }
}

fn looks_like_vectord_serve(pid: u32) -> bool {
   let Ok(bytes) = std::fs::read(format!("/proc/{pid}/cmdline")) else {
      return false;
   };
   let cmdline = String::from_utf8_lossy(&bytes);
   cmdline.contains("vectord") && cmdline.contains("serve")
}

#[cfg(test)]
mod tests {
   use super::*;

   fn manager(dir: &Path) -> ServiceManager {
      let config = Config {
         runtime_dir: Some(dir.to_path_buf()),
         ping_timeout_ms: 200,
         stop_timeout_ms: 200,
         ..Config::default()
      };
      ServiceManager::with_executable(config, PathBuf::from("/nonexistent/vectord"))
   }

   #[test]
   fn paths_follow_runtime_dir() {
      let dir = tempfile::tempdir().unwrap();
      let manager = manager(dir.path());
      assert_eq!(manager.runtime_dir(), dir.path());
      assert_eq!(manager.socket_path(), dir.path().join("vector_store.sock"));
      assert_eq!(manager.log_path(), dir.path().join("vector_store_service.log"));
   }

   #[tokio::test]
   async fn stop_without_daemon_reports_nothing_found() {
      let dir = tempfile::tempdir().unwrap();
      let manager = manager(dir.path());
      std::fs::write(dir.path().join("vector_store.sock"), b"").unwrap();
      assert!(!manager.stop().await.unwrap());
      assert!(!manager.socket_path().exists());
   }

   #[tokio::test]
   async fn missing_executable_is_a_spawn_error() {
      let dir = tempfile::tempdir().unwrap();
      let err = manager(dir.path()).start().await.unwrap_err();
      assert!(matches!(err, Error::DaemonSpawn(_)));
      assert_eq!(err.exit_code(), 10);
   }

   #[test]
   fn foreign_pid_is_not_signalled() {
      assert!(!looks_like_vectord_serve(u32::MAX));
   }
}
