//!
//! Websocket client for the realtime gateway.
//!
//! Opens one websocket per channel, performs the `connection_init` /
//! `connection_ack` handshake, sends a `subscribe` envelope describing the
//! change scope, and maps inbound envelopes (`subscribed`, `next`,
//! `channel_error`, `complete`) onto `ChannelMessage`s. Backend reachability
//! is probed over HTTP before any channel is opened.

use super::types::*;
use super::{Channel, ChannelHandle, RealtimeTransport};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest},
};
use tracing::{debug, error};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Inbound gateway envelope.
#[derive(Debug, Deserialize)]
struct GatewayEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

/// Realtime gateway client
#[derive(Clone)]
pub struct GatewayClient {
    /// HTTP client used for the reachability probe.
    http_client: Client,
    /// Base URL of the gateway HTTP endpoint.
    http_url: String,
    /// Websocket URL for change-feed channels.
    ws_url: String,
}

impl GatewayClient {
    /// Create a new gateway client.
    ///
    /// # Arguments
    /// * `http_url` - The HTTP endpoint used for health probes.
    /// * `ws_url` - The websocket endpoint for channels.
    pub fn new(http_url: String, ws_url: String) -> Result<Self, TransportError> {
        let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            http_client,
            http_url,
            ws_url,
        })
    }

    /// Perform the websocket handshake: connect, send `connection_init`,
    /// await `connection_ack`.
    async fn open_socket(
        &self,
    ) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, TransportError> {
        debug!("Attempting websocket connection to: {}", self.ws_url);

        let mut request = self.ws_url.clone().into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            "realtime-sync-v1".parse().map_err(|_| {
                TransportError::Handshake("Invalid websocket subprotocol header value".to_string())
            })?,
        );

        let (mut ws_stream, response) = connect_async(request).await?;
        debug!(
            "Websocket connection established, response status: {}",
            response.status()
        );

        let init_message = json!({ "type": "connection_init" });
        ws_stream
            .send(Message::Text(init_message.to_string()))
            .await?;

        match ws_stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let parsed: GatewayEnvelope = serde_json::from_str(&text)?;
                if parsed.kind != "connection_ack" {
                    return Err(TransportError::Handshake(
                        "Connection not acknowledged".to_string(),
                    ));
                }
            }
            Some(Ok(_)) => {
                return Err(TransportError::Handshake(
                    "Unexpected message type during handshake".to_string(),
                ));
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(TransportError::Handshake(
                    "Connection closed during handshake".to_string(),
                ));
            }
        }

        Ok(ws_stream)
    }
}

#[async_trait::async_trait]
impl RealtimeTransport for GatewayClient {
    async fn establish(&self) -> Result<(), TransportError> {
        let response = self
            .http_client
            .get(format!("{}/health", self.http_url))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Gateway(format!(
                "Health probe failed: HTTP {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn open_channel(
        &self,
        channel_name: &str,
        scope: &ChangeScope,
    ) -> Result<Channel, TransportError> {
        let ws_stream = self.open_socket().await?;
        let (mut ws_sender, ws_receiver) = ws_stream.split();

        let subscribe_message = json!({
            "id": channel_name,
            "type": "subscribe",
            "payload": {
                "schema": scope.schema,
                "table": scope.table,
                "event": scope.event.as_str(),
                "filter": scope.filter,
            }
        });
        ws_sender
            .send(Message::Text(subscribe_message.to_string()))
            .await?;

        let messages = ws_receiver.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<GatewayEnvelope>(&text) {
                    Ok(envelope) => map_envelope(envelope),
                    Err(e) => {
                        error!("Failed to parse gateway envelope: {}", e);
                        None
                    }
                },
                Ok(Message::Close(_)) => Some(ChannelMessage::Status(ChannelStatus::Closed)),
                // Ping/pong frames are handled by tungstenite itself.
                Ok(_) => None,
                Err(e) => Some(ChannelMessage::Status(ChannelStatus::ChannelError {
                    reason: e.to_string(),
                })),
            }
        });

        Ok(Channel {
            messages: Box::pin(messages),
            handle: Box::new(GatewayChannelHandle {
                sender: tokio::sync::Mutex::new(ws_sender),
            }),
        })
    }
}

/// Map an inbound envelope onto a channel message, dropping envelope kinds
/// the sync layer does not consume.
fn map_envelope(envelope: GatewayEnvelope) -> Option<ChannelMessage> {
    match envelope.kind.as_str() {
        "subscribed" => Some(ChannelMessage::Status(ChannelStatus::Subscribed)),
        "next" => match envelope.payload {
            Some(payload) => match serde_json::from_value::<ChangeEvent>(payload) {
                Ok(event) => Some(ChannelMessage::Change(event)),
                Err(e) => {
                    error!("Failed to deserialize change event: {}", e);
                    None
                }
            },
            None => {
                error!("Gateway `next` envelope without payload");
                None
            }
        },
        "channel_error" => {
            let reason = envelope
                .payload
                .as_ref()
                .and_then(|p| p.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown channel error")
                .to_string();
            Some(ChannelMessage::Status(ChannelStatus::ChannelError {
                reason,
            }))
        }
        "complete" => {
            debug!("Channel subscription completed");
            Some(ChannelMessage::Status(ChannelStatus::Closed))
        }
        other => {
            debug!("Ignoring gateway envelope type: {}", other);
            None
        }
    }
}

struct GatewayChannelHandle {
    sender: tokio::sync::Mutex<WsSink>,
}

#[async_trait::async_trait]
impl ChannelHandle for GatewayChannelHandle {
    async fn close(&self) -> Result<(), TransportError> {
        let mut sender = self.sender.lock().await;
        sender.send(Message::Close(None)).await?;
        Ok(())
    }
}
