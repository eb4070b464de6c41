//! ramses-binding: the RAMSES II device-pairing handshake.
//!
//! Binding is the `1FC9` four-phase exchange that introduces two devices
//! to each other: the supplicant broadcasts a TENDER of the codes it will
//! publish, a respondent answers with an ACCEPT, the supplicant confirms
//! with an AFFIRM, and some vendors close with a `10E0` RATIFY identity
//! broadcast. This crate drives either role over a running
//! [`Engine`](ramses_engine::Engine), emulating a remote (supplicant) or
//! a fan (respondent).
//!
//! # Example: bind as a Vasco-style remote
//!
//! ```no_run
//! use ramses_binding::{BindOffer, SupplicantBinding};
//! use ramses_core::Code;
//! # async fn example(engine: &ramses_engine::Engine) -> ramses_core::Result<()> {
//! let offer = BindOffer {
//!     oem_code: Some(0x66),
//!     ..BindOffer::new(vec![Code::FAN_RATE, Code::FAN_BOOST])
//! };
//! let mut supp = SupplicantBinding::new(engine, "29:091138".parse().unwrap(), offer);
//! supp.bind().await?;
//! assert!(supp.context().state().is_bound());
//! # Ok(())
//! # }
//! ```

mod context;
mod respondent;
mod supplicant;

pub use context::{BindContext, BindRole, BindState, RETRY_LIMIT, T_CONFIRM, T_WAIT};
pub use respondent::{BindAccept, RespondentBinding};
pub use supplicant::{BindOffer, SupplicantBinding};
