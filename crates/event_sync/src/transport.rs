//! The connection seam. The engine only needs something that can carry
//! envelopes both ways and report when the peer goes away; the websocket
//! implementation lives behind the same trait the test doubles implement.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::Envelope;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};
use url::Url;

use crate::error::TransportError;

const INBOUND_BUFFER: usize = 1024;
const OUTBOUND_BUFFER: usize = 64;
const SOCKET_PATH: &str = "/socket/websocket";

/// What the embedding application supplies: where the server lives and the
/// opaque bearer token its auth layer minted. The engine never refreshes or
/// inspects the token.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub server_url: Url,
    pub token: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;
    /// Every subscriber sees every inbound frame, in arrival order.
    fn subscribe(&self) -> broadcast::Receiver<Envelope>;
    /// Flips to false exactly once, when the connection dies or is closed.
    fn watch_open(&self) -> watch::Receiver<bool>;
    fn is_open(&self) -> bool {
        *self.watch_open().borrow()
    }
    async fn close(&self);
}

#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self, options: &ConnectOptions)
        -> Result<Arc<dyn Transport>, TransportError>;
}

/// Production connector: one websocket per connect call.
pub struct WebSocketConnector;

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let endpoint = socket_endpoint(options)?;
        let (stream, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
        let (inbound_tx, _) = broadcast::channel(INBOUND_BUFFER);
        let (open_tx, open_rx) = watch::channel(true);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut writer_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_shutdown.changed() => break,
                    outgoing = outbound_rx.recv() => match outgoing {
                        Some(message) => {
                            if let Err(err) = sink.send(message).await {
                                warn!("ws: send failed: {err}");
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        let broadcaster = inbound_tx.clone();
        let mut reader_shutdown = shutdown_rx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_shutdown.changed() => break,
                    incoming = source.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<Envelope>(&text) {
                                Ok(envelope) => {
                                    let _ = broadcaster.send(envelope);
                                }
                                Err(err) => warn!("ws: discarding undecodable frame: {err}"),
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("ws: server closed the connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!("ws: receive failed: {err}");
                            break;
                        }
                        None => break,
                    },
                }
            }
            let _ = open_tx.send(false);
        });

        Ok(Arc::new(WebSocketTransport {
            outbound: outbound_tx,
            inbound: inbound_tx,
            open: open_rx,
            shutdown: shutdown_tx,
        }))
    }
}

struct WebSocketTransport {
    outbound: mpsc::Sender<Message>,
    inbound: broadcast::Sender<Envelope>,
    open: watch::Receiver<bool>,
    shutdown: watch::Sender<bool>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let text = serde_json::to_string(&envelope)?;
        self.outbound
            .send(Message::Text(text))
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inbound.subscribe()
    }

    fn watch_open(&self) -> watch::Receiver<bool> {
        self.open.clone()
    }

    async fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

fn socket_endpoint(options: &ConnectOptions) -> Result<Url, TransportError> {
    let base = options.server_url.as_str().trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        return Err(TransportError::Connect(format!(
            "server url must be http(s) or ws(s): {base}"
        )));
    };
    let mut endpoint = Url::parse(&format!("{ws_base}{SOCKET_PATH}"))
        .map_err(|err| TransportError::Connect(err.to_string()))?;
    endpoint
        .query_pairs_mut()
        .append_pair("token", &options.token);
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(server_url: &str) -> ConnectOptions {
        ConnectOptions {
            server_url: Url::parse(server_url).expect("valid url"),
            token: "tok/en=".to_string(),
        }
    }

    #[test]
    fn socket_endpoint_maps_scheme_and_encodes_token() {
        let endpoint = socket_endpoint(&options("https://coordinate.example.com/")).expect("ok");
        assert_eq!(endpoint.scheme(), "wss");
        assert_eq!(endpoint.path(), "/socket/websocket");
        assert_eq!(endpoint.query(), Some("token=tok%2Fen%3D"));

        let endpoint = socket_endpoint(&options("http://localhost:4000")).expect("ok");
        assert!(endpoint.as_str().starts_with("ws://localhost:4000"));
    }

    #[test]
    fn socket_endpoint_rejects_other_schemes() {
        assert!(socket_endpoint(&options("ftp://example.com")).is_err());
    }
}
