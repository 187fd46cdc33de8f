//! Long-running daemon server command.
//!
//! Binds the socket in the runtime directory, records its PID and serves
//! requests until `kill`, SIGTERM or SIGINT.

use std::{path::PathBuf, sync::Arc};

use console::style;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use crate::{
   Error, Result,
   config::Config,
   server::Server,
   store::LocalProvider,
   usock::{self, SocketError},
};

struct PidFileGuard {
   runtime_dir: PathBuf,
}

impl Drop for PidFileGuard {
   fn drop(&mut self) {
      usock::remove_pid(&self.runtime_dir);
   }
}

/// Executes the serve command, running the daemon in the foreground.
pub async fn execute(runtime_dir: PathBuf, config: Config) -> Result<()> {
   config.validate()?;
   let socket_path = usock::socket_path(&runtime_dir);

   let listener = match usock::Listener::bind(&socket_path).await {
      Ok(l) => l,
      Err(Error::Socket(SocketError::AlreadyRunning)) => {
         println!("{}", style("Server already running").yellow());
         return Ok(());
      },
      Err(e) => return Err(e),
   };

   usock::write_pid(&runtime_dir)?;
   let _pid_guard = PidFileGuard { runtime_dir: runtime_dir.clone() };

   tracing::info!(
      "vectord {} serving {} (pid {})",
      env!("CARGO_PKG_VERSION"),
      runtime_dir.display(),
      std::process::id()
   );

   let server = Server::new(config, Arc::new(LocalProvider::new()));
   tokio::spawn(watch_signals(server.shutdown_token()));
   server.serve(listener).await
}

async fn watch_signals(token: CancellationToken) {
   let (mut term, mut int) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt()))
   {
      (Ok(term), Ok(int)) => (term, int),
      (Err(e), _) | (_, Err(e)) => {
         tracing::error!("failed to install signal handlers: {e}");
         return;
      },
   };

   tokio::select! {
      _ = term.recv() => tracing::info!("received SIGTERM"),
      _ = int.recv() => tracing::info!("received SIGINT"),
      () = token.cancelled() => return,
   }
   token.cancel();
}
