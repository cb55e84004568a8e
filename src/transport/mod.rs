//! Outbound transport to the remote consumer.
//!
//! One persistent connection per run. The concrete adapter is chosen from the
//! endpoint URL scheme:
//!
//! - `http`, `https`, `ws`, `wss`: Socket.IO client (feature `transport-socketio`)
//! - `mqtt`, `mqtts`: MQTT v5, events published to `{prefix}/{event}`
//! - `log`: dry run, emitted events are only logged
//!
//! `Connection` owns the adapter and guarantees `disconnect` runs exactly once,
//! either through an explicit `close()` or when the guard is dropped.

mod dry_run;
mod mqtt;
#[cfg(feature = "transport-socketio")]
mod socketio;

use std::fmt;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use url::{Host, Url};

use crate::config::TransportSettings;

pub use self::dry_run::LogTransport;
pub use self::mqtt::{MqttEndpoint, MqttTransport};
#[cfg(feature = "transport-socketio")]
pub use self::socketio::SocketIoTransport;

/// A connected session able to deliver named JSON events.
pub trait Transport {
    fn name(&self) -> &'static str;

    /// Deliver one event. Fire-and-forget: no acknowledgement is awaited.
    fn emit(&mut self, event: &str, payload: &serde_json::Value) -> Result<()>;

    /// Close the session. Called at most once, by `Connection`.
    fn disconnect(&mut self) -> Result<()>;
}

/// Parsed endpoint address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    SocketIo(Url),
    Mqtt(MqttEndpoint),
    Log,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::SocketIo(url) => write!(f, "socket.io {}", url),
            Endpoint::Mqtt(ep) => write!(
                f,
                "{}://{}:{}",
                if ep.use_tls { "mqtts" } else { "mqtt" },
                ep.host,
                ep.port
            ),
            Endpoint::Log => f.write_str("log://"),
        }
    }
}

impl Endpoint {
    /// Parse an endpoint URL. Socket.IO URLs without a path get `socketio_path`.
    pub fn parse(raw: &str, socketio_path: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(anyhow!("endpoint is empty"));
        }
        let mut url = Url::parse(raw).with_context(|| format!("invalid endpoint URL: {}", raw))?;
        match url.scheme() {
            "http" | "https" | "ws" | "wss" => {
                if url.host_str().is_none() {
                    return Err(anyhow!("endpoint {} has no host", raw));
                }
                if url.path().is_empty() || url.path() == "/" {
                    url.set_path(socketio_path);
                }
                Ok(Endpoint::SocketIo(url))
            }
            "mqtt" | "mqtts" => {
                let use_tls = url.scheme() == "mqtts";
                let host = match url.host() {
                    Some(Host::Domain(name)) => name.to_string(),
                    Some(Host::Ipv4(addr)) => addr.to_string(),
                    Some(Host::Ipv6(addr)) => addr.to_string(),
                    None => return Err(anyhow!("MQTT endpoint {} has no host", raw)),
                };
                let port = url.port().unwrap_or(if use_tls { 8883 } else { 1883 });
                Ok(Endpoint::Mqtt(MqttEndpoint {
                    host,
                    port,
                    use_tls,
                }))
            }
            "log" => Ok(Endpoint::Log),
            other => Err(anyhow!("unsupported endpoint scheme: {}", other)),
        }
    }
}

/// Open a connection to the configured endpoint. Blocks until the session is up.
pub fn connect(settings: &TransportSettings) -> Result<Connection> {
    let endpoint = Endpoint::parse(&settings.endpoint, &settings.socketio_path)?;
    let transport: Box<dyn Transport> = match &endpoint {
        Endpoint::SocketIo(url) => connect_socketio(url)?,
        Endpoint::Mqtt(ep) => Box::new(MqttTransport::connect(
            ep,
            &settings.mqtt_client_id,
            &settings.mqtt_topic_prefix,
        )?),
        Endpoint::Log => Box::new(LogTransport::new()),
    };
    log::info!("connected to {} via {}", endpoint, transport.name());
    Ok(Connection::new(transport, endpoint))
}

#[cfg(feature = "transport-socketio")]
fn connect_socketio(url: &Url) -> Result<Box<dyn Transport>> {
    Ok(Box::new(SocketIoTransport::connect(url)?))
}

#[cfg(not(feature = "transport-socketio"))]
fn connect_socketio(url: &Url) -> Result<Box<dyn Transport>> {
    Err(anyhow!(
        "Socket.IO endpoint {} requires the transport-socketio feature",
        url
    ))
}

/// Owning guard over one transport session.
pub struct Connection {
    transport: Box<dyn Transport>,
    endpoint: Endpoint,
    open: bool,
}

impl Connection {
    pub fn new(transport: Box<dyn Transport>, endpoint: Endpoint) -> Self {
        Self {
            transport,
            endpoint,
            open: true,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Serialize `payload` to JSON and emit it under `event`.
    pub fn emit<P: Serialize>(&mut self, event: &str, payload: &P) -> Result<()> {
        if !self.open {
            return Err(anyhow!("emit '{}' on closed connection", event));
        }
        let value = serde_json::to_value(payload)
            .with_context(|| format!("serialize '{}' payload", event))?;
        self.transport
            .emit(event, &value)
            .with_context(|| format!("emit '{}' via {}", event, self.transport.name()))
    }

    /// Disconnect. Later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.transport
            .disconnect()
            .with_context(|| format!("disconnect from {}", self.endpoint))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.close() {
                log::warn!("{:#}", e);
            }
        }
    }
}
