use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, Event, Incoming, MqttOptions};

use super::Transport;

/// MQTT broker address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// MQTT v5 publisher. Each event goes to `{topic_prefix}/{event}` as a JSON body.
///
/// rumqttc needs its event loop polled for anything to hit the wire, so after
/// the broker acknowledges the session the connection is handed to a pump thread.
pub struct MqttTransport {
    client: Client,
    topic_prefix: String,
    pump: Option<JoinHandle<()>>,
}

impl MqttTransport {
    pub fn connect(endpoint: &MqttEndpoint, client_id: &str, topic_prefix: &str) -> Result<Self> {
        let mut options = MqttOptions::new(client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if endpoint.use_tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        let (client, mut connection) = Client::new(options, 10);
        wait_for_connack(&mut connection)
            .with_context(|| format!("connect to MQTT broker {}:{}", endpoint.host, endpoint.port))?;

        let pump = std::thread::spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        log::warn!("MQTT connection error: {}", e);
                        break;
                    }
                }
            }
        });

        log::info!(
            "connected to MQTT broker (TLS: {}, topics: {}/*)",
            endpoint.use_tls,
            topic_prefix
        );
        Ok(Self {
            client,
            topic_prefix: topic_prefix.trim_end_matches('/').to_string(),
            pump: Some(pump),
        })
    }

    pub fn topic(&self, event: &str) -> String {
        topic_for(&self.topic_prefix, event)
    }
}

fn topic_for(prefix: &str, event: &str) -> String {
    if prefix.is_empty() {
        event.to_string()
    } else {
        format!("{}/{}", prefix, event)
    }
}

fn wait_for_connack(connection: &mut Connection) -> Result<()> {
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(anyhow!("MQTT connection failed: {}", e)),
        }
    }
    Err(anyhow!("MQTT event loop ended before ConnAck"))
}

impl Transport for MqttTransport {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn emit(&mut self, event: &str, payload: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        self.client
            .publish(self.topic(event), QoS::AtMostOnce, false, body)?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.client.disconnect()?;
        if let Some(handle) = self.pump.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}
