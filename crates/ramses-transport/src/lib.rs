//! ramses-transport: links between the RAMSES engine and a radio.
//!
//! Three [`FrameTransport`](ramses_core::FrameTransport) implementations:
//!
//! - [`SerialTransport`] -- HGI80/evofw3 USB gateways (the common case)
//! - [`MqttTransport`] -- gateways reached through an MQTT broker, with
//!   the broker session owned by the application
//! - [`ReplayTransport`] -- packet-log playback with recorded pacing
//!
//! All three present the same contract to the engine: a line stream in,
//! a line sink out, and an echo of every transmitted line on the read
//! side (hardware echo on serial, synthesized for MQTT; replay is
//! read-only).

pub mod mqtt;
pub mod replay;
pub mod serial;

pub use mqtt::{MqttFrame, MqttLink, MqttTransport};
pub use replay::ReplayTransport;
pub use serial::{SerialTransport, DEFAULT_BAUD};
