//! Error types for the RAMSES runtime.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Codec rejections, protocol engine
//! failures, and binding outcomes are all captured here as a single tagged
//! union so that callers can pattern-match on the kind.

use std::fmt;

/// Which awaited step a timeout belongs to.
///
/// The protocol engine times out waiting for an echo or a reply; the
/// binding FSM times out waiting for an offer's accept (`Wait`) or an
/// accept's confirm (`Confirm`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    /// The transport did not echo our own transmission.
    Echo,
    /// The addressed device did not reply to an RQ/W.
    Reply,
    /// A binding step's awaited packet did not arrive.
    Wait,
    /// The respondent's accept was not confirmed in time.
    Confirm,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeoutKind::Echo => "echo",
            TimeoutKind::Reply => "reply",
            TimeoutKind::Wait => "wait",
            TimeoutKind::Confirm => "confirm",
        };
        write!(f, "{s}")
    }
}

/// The error type for all RAMSES runtime operations.
///
/// Codec errors (`Malformed`, `Length`, `Checksum`) are raised per frame,
/// counted, and never fatal to the engine. Engine errors complete the
/// originating caller; `Transport` stops the engine and fails everything
/// still pending.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The frame text violates the line grammar.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The declared payload length does not match the payload.
    #[error("length mismatch: declared {declared} bytes, payload has {actual}")]
    Length {
        /// Byte count declared in the length field.
        declared: usize,
        /// Byte count actually present in the payload hex.
        actual: usize,
    },

    /// The trailing checksum does not verify.
    #[error("checksum mismatch: expected {expected:02X}, found {found:02X}")]
    Checksum {
        /// The checksum the body sums to.
        expected: u8,
        /// The checksum carried on the wire.
        found: u8,
    },

    /// No payload parser is registered for this command code.
    ///
    /// Non-fatal: the raw payload is preserved and surfaced as-is.
    #[error("no payload parser for code {0}")]
    UnknownCode(String),

    /// An awaited packet did not arrive within its deadline.
    #[error("timeout waiting for {0}")]
    Timeout(TimeoutKind),

    /// A transaction used up every permitted send attempt.
    #[error("retries exhausted after {attempts} sends")]
    RetriesExhausted {
        /// Total number of transmissions, including the first.
        attempts: u32,
    },

    /// The send queue is full.
    #[error("send queue full")]
    Busy,

    /// The caller cancelled the command or binding attempt.
    ///
    /// Not an anomaly; never logged above debug.
    #[error("cancelled")]
    Cancelled,

    /// The engine is in listen-only mode (`RAMSES_DISABLE_SENDING=1`).
    #[error("sending disabled (listen-only mode)")]
    ReadOnly,

    /// A binding attempt reached its terminal failure state.
    #[error("binding failed: {0}")]
    BindingFailed(String),

    /// The transport faulted; the engine has stopped.
    #[error("transport fault: {0}")]
    Transport(String),

    /// No transport connection is established.
    #[error("not connected")]
    NotConnected,

    /// An invalid parameter was passed to a command builder.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
