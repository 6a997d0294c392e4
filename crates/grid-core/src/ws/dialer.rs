//! Transport seam for [`StreamSession`](super::StreamSession).
//!
//! A [`Dialer`] opens one connection and hands back a text sink and a text
//! source. Control frames (ping/pong/close) are handled here so the session
//! only ever sees application text.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

use crate::error::{GridError, GridResult};

/// Outbound half of a connection.
pub type WsSink = Pin<Box<dyn Sink<String, Error = GridError> + Send>>;

/// Inbound half of a connection. The stream ends when the peer closes.
pub type WsSource = Pin<Box<dyn Stream<Item = GridResult<String>> + Send>>;

/// One established connection.
pub struct WsLink {
    pub sink: WsSink,
    pub source: WsSource,
}

/// Opens WebSocket connections.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, url: &str) -> GridResult<WsLink>;
}

/// TLS WebSocket dialer backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteDialer;

#[async_trait]
impl Dialer for TungsteniteDialer {
    async fn dial(&self, url: &str) -> GridResult<WsLink> {
        let (stream, _response) =
            tokio_tungstenite::connect_async(url).await.map_err(|e| GridError::WebSocket(e.to_string()))?;
        let (write, read) = stream.split();

        let sink = write
            .with(|text: String| async move {
                Ok::<_, tokio_tungstenite::tungstenite::Error>(Message::Text(text.into()))
            })
            .sink_map_err(|e| GridError::WebSocket(e.to_string()));

        let source = read.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(e) => {
                        warn!("[ws] dropping non-utf8 binary frame: {e}");
                        None
                    }
                },
                Ok(Message::Close(frame)) => Some(Err(GridError::WebSocket(format!("closed by peer: {frame:?}")))),
                // Ping replies are queued by tungstenite and flushed on the next read/write.
                Ok(_) => None,
                Err(e) => Some(Err(GridError::WebSocket(e.to_string()))),
            }
        });

        Ok(WsLink { sink: Box::pin(sink), source: Box::pin(source) })
    }
}
