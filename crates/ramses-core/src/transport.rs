//! Transport trait for RAMSES frame streams.
//!
//! The [`FrameTransport`] trait abstracts over the link to the radio.
//! RAMSES gateways (HGI80, evofw3 sticks) speak a line-oriented textual
//! protocol, so the trait deals in lines rather than raw bytes; byte
//! framing is the transport's own concern. Implementations exist for
//! serial ports, MQTT gateway links, packet-log replay, and the mock
//! transport in `ramses-test-harness`.
//!
//! # The echo contract
//!
//! The protocol engine relies on seeing its own transmissions reflected on
//! the read side: serial gateways echo every written frame back within the
//! echo timeout, and software transports (MQTT, mock) must synthesize an
//! equivalent echo. The engine's transaction state machine advances on
//! that echo.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous line-level transport to a RAMSES radio.
///
/// The engine's IO task owns the transport exclusively; no other
/// component writes to it.
#[async_trait]
pub trait FrameTransport: Send {
    /// Write one frame line to the radio.
    ///
    /// The line is the serialized frame without a trailing newline;
    /// implementations append whatever terminator the link requires.
    async fn send_line(&mut self, line: &str) -> Result<()>;

    /// Read the next line from the radio, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived within the deadline. Lines
    /// are returned verbatim (minus the terminator); comment and
    /// out-of-band lines are passed through for the caller to filter.
    async fn recv_line(&mut self, timeout: Duration) -> Result<Option<String>>;

    /// Close the transport connection.
    ///
    /// After `close()`, subsequent calls should return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
