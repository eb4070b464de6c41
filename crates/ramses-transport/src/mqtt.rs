//! MQTT gateway link.
//!
//! Some RAMSES gateways are reached through an MQTT broker instead of a
//! local USB port: the gateway publishes received frames on
//! `<base>/rx` and consumes frames to transmit from `<base>/tx`, each as
//! a small JSON envelope mirroring the textual line.
//!
//! The broker session itself (connection, subscription, keep-alive) is
//! the application's concern; this module provides the frame-level
//! glue: [`MqttTransport`] implements [`FrameTransport`] over a pair of
//! channels, and the matching [`MqttLink`] is handed to whatever owns
//! the broker session.
//!
//! A broker round-trip does not reflect our own transmissions back, so
//! the transport synthesizes the echo locally -- the engine's echo
//! matching works identically over serial and MQTT.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use ramses_core::error::{Error, Result};
use ramses_core::FrameTransport;

/// The JSON envelope carried on the `rx`/`tx` topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttFrame {
    /// ISO-8601 timestamp, microsecond resolution.
    pub ts: String,
    /// The frame in the textual line grammar.
    pub msg: String,
}

impl MqttFrame {
    /// Envelope a frame line, stamped now.
    pub fn now(msg: &str) -> MqttFrame {
        MqttFrame {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            msg: msg.to_string(),
        }
    }
}

/// The broker-session half: payloads in and out of the transport.
///
/// Feed payloads received on `<base>/rx` into `to_transport`; publish
/// whatever `from_transport` yields onto `<base>/tx`.
pub struct MqttLink {
    /// Inbound JSON payloads (broker -> engine).
    pub to_transport: mpsc::Sender<String>,
    /// Outbound JSON payloads (engine -> broker).
    pub from_transport: mpsc::Receiver<String>,
}

/// Frame transport over an MQTT gateway link.
pub struct MqttTransport {
    rx: mpsc::Receiver<String>,
    tx: mpsc::Sender<String>,
    /// Locally synthesized echoes, delivered before broker traffic.
    echoes: VecDeque<String>,
    connected: bool,
}

impl MqttTransport {
    /// Create a transport and its broker-session counterpart.
    pub fn channel(capacity: usize) -> (MqttTransport, MqttLink) {
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        (
            MqttTransport {
                rx: in_rx,
                tx: out_tx,
                echoes: VecDeque::new(),
                connected: true,
            },
            MqttLink {
                to_transport: in_tx,
                from_transport: out_rx,
            },
        )
    }
}

#[async_trait]
impl FrameTransport for MqttTransport {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        let payload = serde_json::to_string(&MqttFrame::now(line))
            .map_err(|e| Error::Transport(format!("envelope encode: {e}")))?;
        trace!(%line, "publishing frame");
        self.tx
            .send(payload)
            .await
            .map_err(|_| Error::Transport("mqtt link closed".into()))?;
        self.echoes.push_back(line.to_string());
        Ok(())
    }

    async fn recv_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if let Some(echo) = self.echoes.pop_front() {
            return Ok(Some(echo));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let payload = match tokio::time::timeout(deadline - now, self.rx.recv()).await {
                Ok(Some(payload)) => payload,
                Ok(None) => return Err(Error::Transport("mqtt link closed".into())),
                Err(_) => return Ok(None),
            };
            match serde_json::from_str::<MqttFrame>(&payload) {
                Ok(frame) => return Ok(Some(frame.msg)),
                Err(e) => {
                    debug!(%payload, error = %e, "dropping unparseable mqtt payload");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
