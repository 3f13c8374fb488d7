use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{error::ProtocolError, Error as WsError, Message},
};
use url::Url;

use crate::connector::{Connector, Link};
use crate::error::{ChannelError, ChannelResult};

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connects to a WebSocket relay that forwards every text frame to the other
/// participants of the room.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    handshake_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

enum Inbound {
    Text(String),
    Skip,
    End,
    Failed(ChannelError),
}

fn classify(frame: Result<Message, WsError>) -> Inbound {
    match frame {
        Ok(Message::Text(text)) => Inbound::Text(text),
        Ok(Message::Binary(data)) => match String::from_utf8(data) {
            Ok(text) => Inbound::Text(text),
            Err(_) => {
                tracing::debug!(target = "signal", "ignoring non-utf8 binary frame");
                Inbound::Skip
            }
        },
        Ok(Message::Close(_)) => Inbound::End,
        Ok(_) => Inbound::Skip,
        Err(
            err @ (WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)),
        ) => {
            tracing::debug!(target = "signal", "signaling websocket closed: {err}");
            Inbound::End
        }
        Err(err) => {
            tracing::warn!(target = "signal", "signaling websocket error: {err}");
            Inbound::Failed(ChannelError::Connect(err.to_string()))
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &Url) -> ChannelResult<Link> {
        let (ws_stream, _) = tokio::time::timeout(self.handshake_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ChannelError::Timeout)?
            .map_err(|err| ChannelError::Connect(format!("websocket connect failed: {err}")))?;
        tracing::debug!(target = "signal", url = %url, "signaling websocket connected");

        let (ws_write, ws_read) = ws_stream.split();
        let sink = ws_write
            .with(|text: String| future::ready(Ok::<_, WsError>(Message::Text(text))))
            .sink_map_err(|err| ChannelError::Send(err.to_string()));
        let stream = ws_read
            .map(classify)
            .take_while(|frame| future::ready(!matches!(frame, Inbound::End)))
            .filter_map(|frame| {
                future::ready(match frame {
                    Inbound::Text(text) => Some(Ok(text)),
                    Inbound::Failed(err) => Some(Err(err)),
                    Inbound::Skip | Inbound::End => None,
                })
            });

        Ok(Link::new(Box::pin(sink), stream.boxed()))
    }
}
