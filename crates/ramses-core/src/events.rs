//! Engine diagnostic events.
//!
//! Events are emitted by the protocol engine through a
//! [`tokio::sync::broadcast`] channel. They carry lifecycle and codec
//! diagnostics; decoded packets themselves travel through the dispatcher's
//! subscriptions instead.

/// A diagnostic event emitted by the protocol engine.
///
/// Delivered on a best-effort basis through a bounded broadcast channel;
/// slow consumers may miss events.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The engine's IO task is up and draining the transport.
    Connected,

    /// The transport closed or faulted; the engine has stopped.
    Disconnected,

    /// A received line failed frame validation and was dropped.
    ///
    /// Codec rejections never stop the engine; they are counted and
    /// surfaced here for observability.
    CodecError {
        /// The offending line, verbatim.
        line: String,
        /// The rejection, rendered.
        error: String,
    },
}
