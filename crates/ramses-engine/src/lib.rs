//! ramses-engine: the RAMSES II protocol engine.
//!
//! The engine serializes all access to the half-duplex radio through one
//! IO task that owns the transport: it transmits queued commands, matches
//! each transmission's echo, waits for expected replies with retries and
//! backoff, and routes everything else to subscribers.
//!
//! # Example
//!
//! ```no_run
//! use ramses_codec::Command;
//! use ramses_engine::{Engine, EngineConfig, PacketFilter};
//! use ramses_transport::SerialTransport;
//!
//! # async fn example() -> ramses_core::Result<()> {
//! let transport = SerialTransport::open("/dev/ttyUSB0").await?;
//! let engine = Engine::spawn(Box::new(transport), EngineConfig::default());
//!
//! // Watch all ventilation state broadcasts.
//! let mut vents = engine.subscribe(PacketFilter::code(ramses_core::Code::VENT_STATE));
//!
//! // Ask a fan for its identity.
//! let fan = "32:022222".parse().unwrap();
//! let reply = engine.send_command(Command::get_device_info(fan)?).await?;
//! println!("identity: {reply}");
//! # Ok(())
//! # }
//! ```

mod dispatcher;
mod engine;
mod fsm;

pub use dispatcher::{Dispatcher, PacketFilter};
pub use engine::{
    Engine, EngineConfig, EngineStats, EngineStatsSnapshot, PendingCommand, DISABLE_SENDING_ENV,
    SEND_QUEUE_BOUND,
};
