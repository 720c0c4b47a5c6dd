//! Websocket listener.
//!
//! Accepts TCP connections, upgrades requests for [`WS_PATH`], and hands
//! each upgraded connection to its own [`Pump`] task.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tracing::{debug, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;

use super::{Pump, PumpConfig};
use crate::Result;
use crate::hub::HubHandle;
use crate::publisher::StatePublisher;

/// The only path that is upgraded to a websocket.
pub const WS_PATH: &str = "/ws";

pub struct Server {
    listener: TcpListener,
    pump: PumpConfig,
}

impl Server {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if `addr` cannot be bound.
    pub async fn bind(addr: SocketAddr, pump: PumpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, pump })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections forever.
    ///
    /// Failed accepts and failed handshakes are logged and skipped; they
    /// never stop the listener.
    pub async fn run(self, hub: HubHandle, publisher: Arc<StatePublisher>) {
        info!(addr = ?self.listener.local_addr().ok(), path = WS_PATH, "Websocket server listening");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed: {e}");
                    continue;
                }
            };

            tokio::spawn(serve_connection(
                stream,
                peer,
                self.pump.clone(),
                hub.clone(),
                publisher.clone(),
            ));
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: PumpConfig,
    hub: HubHandle,
    publisher: Arc<StatePublisher>,
) {
    let ws = match accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%peer, "Handshake rejected: {e}");
            return;
        }
    };

    // Only used when nothing has been broadcast yet; the hub queues the
    // newest retained snapshot itself.
    let fallback = match publisher.balance_snapshot().await {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!(%peer, "Failed to encode balance snapshot: {e}");
            None
        }
    };

    let pump = Pump::new(config);
    let id = pump.id();
    if hub.register_with_snapshot(pump.handle(), fallback).is_err() {
        warn!(connection = %id, "Hub is closed, dropping connection");
        return;
    }
    info!(connection = %id, %peer, "Client connected");

    pump.run(ws, hub).await;
    info!(connection = %id, %peer, "Client disconnected");
}

/// Rejects upgrade requests for any path other than [`WS_PATH`].
#[allow(clippy::result_large_err)]
fn check_path(request: &Request, response: Response) -> std::result::Result<Response, ErrorResponse> {
    if request.uri().path() == WS_PATH {
        return Ok(response);
    }

    let mut rejection = ErrorResponse::new(Some("not found".to_string()));
    *rejection.status_mut() = StatusCode::NOT_FOUND;
    Err(rejection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tungstenite::client::IntoClientRequest;

    #[test]
    fn only_ws_path_is_upgraded() {
        let accepted = "ws://localhost/ws".into_client_request().unwrap();
        assert!(check_path(&accepted, Response::new(())).is_ok());

        let other = "ws://localhost/other".into_client_request().unwrap();
        let rejection = check_path(&other, Response::new(())).unwrap_err();
        assert_eq!(rejection.status(), StatusCode::NOT_FOUND);
    }
}
