use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::SinkExt;
use std::sync::Arc;
use tracing::debug;

use crate::server::Server;
use crate::ws::relay::{run_relay, RelayError, RelaySocket};

pub const RETRIEVE_RESPONSE_PATH: &str = "/v1/retrieveResponse";

pub async fn retrieve_response(
    ws: WebSocketUpgrade,
    State(server): State<Arc<Server>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let mut socket = AxumSocket::new(socket);
        let outcome = run_relay(&mut socket, &server).await;
        debug!(?outcome, "websocket session finished");
    })
}

/// [`RelaySocket`] over an axum WebSocket.
pub struct AxumSocket {
    inner: WebSocket,
    closed: bool,
}

impl AxumSocket {
    pub fn new(inner: WebSocket) -> Self {
        Self {
            inner,
            closed: false,
        }
    }
}

impl RelaySocket for AxumSocket {
    async fn recv_text(&mut self) -> Result<String, RelayError> {
        loop {
            match self.inner.recv().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(text.as_str().to_owned()),
                Some(Ok(WsMessage::Binary(_))) => {
                    return Err(RelayError::Failed("expected a text frame".into()))
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                Some(Ok(WsMessage::Close(_))) | None => return Err(RelayError::Disconnected),
                Some(Err(err)) => {
                    debug!(error = %err, "websocket receive failed");
                    return Err(RelayError::Disconnected);
                }
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), RelayError> {
        self.inner
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|_| RelayError::Disconnected)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = SinkExt::close(&mut self.inner).await {
            debug!(error = %err, "websocket already closed");
        }
    }
}
