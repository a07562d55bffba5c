//! TCP accept loop.

use crate::error::ServerError;
use crate::session::run_session;
use crate::state::StreamState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, info_span, warn, Instrument};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct MjpegServer {
    listener: TcpListener,
    state: Arc<StreamState>,
}

impl MjpegServer {
    pub async fn bind(addr: SocketAddr, state: Arc<StreamState>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> &Arc<StreamState> {
        &self.state
    }

    /// Accept connections forever, one task per connection.
    ///
    /// Accept failures are logged and never end the loop.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("{} listening on http://{addr}", self.state.name()),
            Err(e) => warn!("Listening on unknown address: {e}"),
        }

        loop {
            let (socket, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            if let Err(e) = socket.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {peer}: {e}");
            }
            debug!("Accepted {peer}");
            tokio::spawn(
                run_session(self.state.clone(), socket).instrument(info_span!("session", %peer)),
            );
        }
    }
}
