use anyhow::{anyhow, Result};
use rust_socketio::client::Client;
use rust_socketio::{ClientBuilder, Payload, RawClient, TransportType};
use url::Url;

use super::Transport;

/// Socket.IO client over a websocket transport.
///
/// The client library runs its own receive thread; emits are sent without
/// waiting for an acknowledgement.
pub struct SocketIoTransport {
    client: Client,
}

impl SocketIoTransport {
    pub fn connect(url: &Url) -> Result<Self> {
        let client = ClientBuilder::new(url.as_str())
            .transport_type(TransportType::Websocket)
            .on("error", |payload: Payload, _socket: RawClient| {
                log::warn!("socket.io error: {:?}", payload);
            })
            .connect()
            .map_err(|e| anyhow!("socket.io connect to {} failed: {}", url, e))?;
        Ok(Self { client })
    }
}

impl Transport for SocketIoTransport {
    fn name(&self) -> &'static str {
        "socket.io"
    }

    fn emit(&mut self, event: &str, payload: &serde_json::Value) -> Result<()> {
        self.client
            .emit(event, Payload::Text(vec![payload.clone()]))
            .map_err(|e| anyhow!("socket.io emit failed: {}", e))
    }

    fn disconnect(&mut self) -> Result<()> {
        self.client
            .disconnect()
            .map_err(|e| anyhow!("socket.io disconnect failed: {}", e))
    }
}
