//! ramses-core: Core types, traits, and error definitions for the RAMSES
//! II client runtime.
//!
//! This crate defines the transport- and codec-agnostic abstractions the
//! rest of the workspace builds on. Applications normally depend on the
//! `ramses` facade crate instead.
//!
//! # Key types
//!
//! - [`Address`] -- 9-character device ids (`TT:NNNNNN`) and sentinels
//! - [`Verb`] / [`Code`] -- packet verbs and 4-hex command codes
//! - [`FrameTransport`] -- line-level link to the radio
//! - [`EngineEvent`] -- engine lifecycle and codec diagnostics
//! - [`Error`] / [`Result`] -- error handling

pub mod address;
pub mod error;
pub mod events;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use ramses_core::*`.
pub use address::{Address, ParseAddressError};
pub use error::{Error, Result, TimeoutKind};
pub use events::EngineEvent;
pub use transport::FrameTransport;
pub use types::{Code, DeviceKind, ParseCodeError, ParseVerbError, Priority, Verb};
