//! Mock transport for deterministic testing of the RAMSES engine.
//!
//! [`MockTransport`] implements [`FrameTransport`] against scripted
//! traffic instead of a radio. It reproduces the bus behavior the engine
//! is built around:
//!
//! - every sent line is echoed back on the read side (the evofw3
//!   contract), unless a test arranges for echoes to be dropped;
//! - pre-loaded request/response expectations answer commands;
//! - the paired [`MockHandle`] injects spontaneous traffic mid-test and
//!   inspects what was sent.
//!
//! # Example
//!
//! ```
//! use ramses_test_harness::MockTransport;
//!
//! let (mut mock, handle) = MockTransport::new();
//! // When the engine transmits this RQ, answer with this RP.
//! handle.expect(
//!     "RQ --- 18:000730 32:022222 --:------ 10E0 001 00",
//!     &["... RP --- 32:022222 18:000730 --:------ 10E0 024 \
//!        000001C83A190F66FFFFFFFFFFFF0E0207E3443630000000"],
//! );
//! # let _ = &mut mock;
//! ```

mod mock_transport;

pub use mock_transport::{MockHandle, MockTransport};
