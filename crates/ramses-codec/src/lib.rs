//! ramses-codec: the RAMSES II textual frame codec.
//!
//! This crate turns gateway lines into structured packets and commands
//! back into lines:
//!
//! - [`Frame`] -- one decoded line: verb, addresses, code, payload,
//!   checksum handling
//! - [`Packet`] -- a validated frame plus its correlation header (`hdr`)
//!   and context (`ctx`)
//! - [`Command`] -- an outbound transmission with QoS and the reply it
//!   expects; built through the per-code constructors
//! - [`DeviceFingerprint`] -- `10E0` identity parsing and the signature
//!   class table
//! - [`PayloadKind`] -- the closed inbound payload decode registry
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use ramses_codec::{Frame, Packet};
//!
//! let line = " I --- 29:091138 32:022222 --:------ 1FC9 001 00";
//! let pkt = Packet::from_frame(Frame::decode(Utc::now(), line).unwrap());
//! assert_eq!(pkt.hdr(), "1FC9|I|00");
//! ```

pub mod command;
pub mod fingerprint;
pub mod frame;
pub mod packet;
pub mod payload;

pub use command::{
    encode_bind_triplets, parse_bind_triplets, BindTriplet, Command, ExpectedReply, Qos,
    ReplyFrom, DEFAULT_REPLY_TIMEOUT, DEFAULT_RETRIES,
};
pub use fingerprint::{lookup_class, DeviceClass, DeviceFingerprint, DEFAULT_OEM_CODE};
pub use frame::{bytes_to_hex, hex_to_bytes, Frame, Rssi, MAX_PAYLOAD_LEN};
pub use packet::{ctx_of, hdr_of, Ctx, Packet};
pub use payload::{decode_payload, PayloadKind};
