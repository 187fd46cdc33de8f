//! The daemon: accept loop, per-connection handling and shutdown.

mod dispatch;
mod state;

use std::sync::Arc;

pub use dispatch::{NOT_INITIALIZED, Reply};
pub use state::{LoadedIndex, ServiceState};
use tokio::{
   io::{AsyncRead, AsyncWrite, AsyncWriteExt},
   sync::Semaphore,
   task::JoinSet,
   time::{self, Duration},
};
use tokio_util::sync::CancellationToken;

use crate::{
   Error, Result,
   config::Config,
   error::IpcError,
   ipc::{Request, Response, SocketBuffer},
   store::IndexProvider,
   usock,
};

pub const TIMED_OUT: &str = "Operation timed out";

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

pub struct Server {
   config:   Config,
   state:    ServiceState,
   shutdown: CancellationToken,
}

impl Server {
   pub fn new(config: Config, provider: Arc<dyn IndexProvider>) -> Arc<Self> {
      Arc::new(Self { config, state: ServiceState::new(provider), shutdown: CancellationToken::new() })
   }

   pub const fn state(&self) -> &ServiceState {
      &self.state
   }

   /// Cancelling the token stops the accept loop.
   pub fn shutdown_token(&self) -> CancellationToken {
      self.shutdown.clone()
   }

   /// Accepts connections until shut down, at most `max_connections` at a
   /// time, then drains in-flight connections for the grace period.
   pub async fn serve(self: Arc<Self>, listener: usock::Listener) -> Result<()> {
      let permits = Arc::new(Semaphore::new(self.config.max_connections));
      let mut tasks = JoinSet::new();
      tracing::info!("listening on {}", listener.path().display());

      loop {
         let permit = tokio::select! {
            () = self.shutdown.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
               Ok(permit) => permit,
               Err(_) => break,
            },
         };
         let stream = tokio::select! {
            () = self.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
               Ok(stream) => stream,
               Err(e) => {
                  tracing::error!("accept error: {e}");
                  time::sleep(ACCEPT_BACKOFF).await;
                  continue;
               },
            },
         };

         let server = Arc::clone(&self);
         tasks.spawn(async move {
            server.handle_connection(stream).await;
            drop(permit);
         });
         while tasks.try_join_next().is_some() {}
      }

      tracing::info!("shutting down, {} connections in flight", tasks.len());
      let drain = async { while tasks.join_next().await.is_some() {} };
      if time::timeout(self.config.shutdown_grace(), drain).await.is_err() {
         tracing::warn!("aborting {} connections after grace period", tasks.len());
         tasks.abort_all();
      }
      drop(listener);
      self.state.release().await;
      tracing::info!("server stopped");
      Ok(())
   }

   /// Reads one request, replies once and closes the stream.
   pub async fn handle_connection<S>(&self, mut stream: S)
   where
      S: AsyncRead + AsyncWrite + Unpin,
   {
      let mut buffer = SocketBuffer::new();
      let received = time::timeout(
         self.config.server_read_timeout(),
         buffer.recv_with_limit::<_, Request>(&mut stream, self.config.max_request_bytes),
      )
      .await;

      let reply = match received {
         Ok(Ok(request)) => self.dispatch(request).await,
         Ok(Err(e)) => {
            tracing::debug!("bad request: {e}");
            Response::error(wire_message(&e)).into()
         },
         Err(_) => {
            tracing::warn!(
               "no request within {}ms, closing connection",
               self.config.server_read_timeout_ms
            );
            Response::error(TIMED_OUT).into()
         },
      };

      let max = self.config.max_response_bytes;
      match buffer.send_with_limit(&mut stream, &reply.response, max).await {
         Ok(()) => {},
         Err(Error::Ipc(e @ IpcError::MessageTooLarge(_))) => {
            tracing::error!("response dropped: {e}");
            let _ = buffer
               .send_with_limit(&mut stream, &Response::error(e.to_string()), max)
               .await;
         },
         Err(e) => tracing::debug!("client write error: {e}"),
      }
      let _ = stream.shutdown().await;

      if reply.shutdown {
         self.shutdown.cancel();
      }
   }
}

/// Codec failures are reported without the crate-level prefix so clients see
/// `failed to read`, `failed to deserialize` or `message too large`.
fn wire_message(err: &Error) -> String {
   match err {
      Error::Ipc(e) => e.to_string(),
      other => other.to_string(),
   }
}
