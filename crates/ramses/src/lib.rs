//! # ramses -- a client runtime for the RAMSES II 868 MHz protocol
//!
//! `ramses` talks to Honeywell-compatible heating and HVAC devices
//! (evohome, Itho, Orcon, Nuaire, Vasco, ClimaRad) through a serial USB
//! radio or an MQTT gateway: it decodes the textual RAMSES frames into
//! structured packets, runs the half-duplex send/echo/reply transaction
//! discipline the bus demands, and can pair with devices by playing
//! either side of the `1FC9` binding handshake.
//!
//! ## Quick Start
//!
//! Add `ramses` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! ramses = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! Connect to a gateway and poll a fan:
//!
//! ```no_run
//! use ramses::{Command, Engine, EngineConfig, SerialTransport};
//!
//! #[tokio::main]
//! async fn main() -> ramses::Result<()> {
//!     let transport = SerialTransport::open("/dev/ttyUSB0").await?;
//!     let engine = Engine::spawn(Box::new(transport), EngineConfig::default());
//!
//!     let fan = "32:022222".parse().unwrap();
//!     let reply = engine.send_command(Command::get_vent_state(fan)?).await?;
//!     println!("31DA: {reply}");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate                 | Purpose                                         |
//! |-----------------------|-------------------------------------------------|
//! | `ramses-core`         | Addresses, verbs, codes, errors, the transport trait |
//! | `ramses-codec`        | Frame codec, packets (hdr/ctx), command builders, fingerprints |
//! | `ramses-transport`    | Serial, MQTT-link, and packet-log replay transports |
//! | `ramses-engine`       | The single-transaction protocol engine and dispatcher |
//! | `ramses-binding`      | The supplicant/respondent pairing handshake     |
//! | **`ramses`**          | This facade crate -- re-exports everything      |
//!
//! ## Listening
//!
//! Every decoded packet that is not part of an in-flight transaction is
//! delivered to subscribers through filtered channels:
//!
//! ```no_run
//! use ramses::{Code, PacketFilter};
//! # async fn example(engine: &ramses::Engine) {
//! let mut vents = engine.subscribe(PacketFilter::code(Code::VENT_STATE));
//! while let Some(pkt) = vents.recv().await {
//!     println!("{pkt}");
//! }
//! # }
//! ```
//!
//! ## Binding
//!
//! Emulate a remote and pair it with a fan:
//!
//! ```no_run
//! use ramses::{BindOffer, Code, SupplicantBinding};
//! # async fn example(engine: &ramses::Engine) -> ramses::Result<()> {
//! let offer = BindOffer {
//!     oem_code: Some(0x66), // Vasco
//!     ..BindOffer::new(vec![Code::FAN_RATE, Code::FAN_BOOST])
//! };
//! let mut supp = SupplicantBinding::new(engine, "29:091138".parse().unwrap(), offer);
//! supp.bind().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Listen-only operation
//!
//! Setting `RAMSES_DISABLE_SENDING=1` (or `EngineConfig::disable_sending`)
//! keeps the receive path fully alive while every submission fails with
//! [`Error::ReadOnly`]; pair it with
//! [`ReplayTransport`] to drive the engine from a packet log.

pub use ramses_core::{
    Address, Code, DeviceKind, EngineEvent, Error, FrameTransport, Priority, Result, TimeoutKind,
    Verb,
};

pub use ramses_codec::{
    decode_payload, BindTriplet, Command, Ctx, DeviceClass, DeviceFingerprint, ExpectedReply,
    Frame, Packet, PayloadKind, Qos, ReplyFrom, Rssi,
};

pub use ramses_engine::{
    Engine, EngineConfig, EngineStatsSnapshot, PacketFilter, PendingCommand,
};

pub use ramses_binding::{
    BindAccept, BindContext, BindOffer, BindRole, BindState, RespondentBinding,
    SupplicantBinding,
};

pub use ramses_transport::{MqttLink, MqttTransport, ReplayTransport, SerialTransport};
