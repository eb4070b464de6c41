//! Packets: validated frames with correlation keys.
//!
//! A [`Packet`] is a decoded [`Frame`] plus two derived keys:
//!
//! - the header `hdr` (`CODE|VERB|CTX`), used to correlate a reply with
//!   its request and to deduplicate repeated announcements, and
//! - the context `ctx`, the payload-derived discriminator within a code
//!   (for most codes the first payload byte, the zone or domain index).
//!
//! Both are deterministic functions of `(code, verb, payload)`.

use std::fmt;
use std::ops::Deref;

use ramses_core::{Code, Verb};

use crate::frame::{bytes_to_hex, Frame};

/// The payload-derived discriminator of a packet within its code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ctx {
    /// A zone/domain index, as two uppercase hex chars.
    Idx(String),
    /// A boolean discriminator, for codes with exactly one context.
    Flag(bool),
    /// No context (empty payload).
    None,
}

impl fmt::Display for Ctx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ctx::Idx(s) => f.write_str(s),
            Ctx::Flag(true) => f.write_str("True"),
            Ctx::Flag(false) => f.write_str("False"),
            Ctx::None => Ok(()),
        }
    }
}

/// Derive the context for a `(code, payload)` pair.
///
/// Default rule: the first payload byte. `10E0` carries one identity per
/// device, so its context is the constant `True`.
pub fn ctx_of(code: Code, payload: &[u8]) -> Ctx {
    if code == Code::DEV_INFO {
        return Ctx::Flag(true);
    }
    match payload.first() {
        Some(b) => Ctx::Idx(bytes_to_hex(&[*b])),
        None => Ctx::None,
    }
}

/// Format a header from its parts: `CODE|VERB|CTX`.
pub fn hdr_of(code: Code, verb: Verb, payload: &[u8]) -> String {
    format!("{code}|{verb}|{}", ctx_of(code, payload))
}

/// A validated frame with its correlation keys.
///
/// Packets live until every subscriber has been notified; the engine
/// clones them freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    frame: Frame,
    hdr: String,
    ctx: Ctx,
}

impl Packet {
    /// Build a packet from an already validated frame.
    pub fn from_frame(frame: Frame) -> Packet {
        let ctx = ctx_of(frame.code, &frame.payload);
        let hdr = hdr_of(frame.code, frame.verb, &frame.payload);
        Packet { frame, hdr, ctx }
    }

    /// The underlying frame.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// The correlation header, `CODE|VERB|CTX`.
    pub fn hdr(&self) -> &str {
        &self.hdr
    }

    /// The payload-derived context.
    pub fn ctx(&self) -> &Ctx {
        &self.ctx
    }
}

impl Deref for Packet {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.frame
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // e.g.: I --- 29:091138 ... 1FC9 024 00... # 1FC9|I|00
        write!(f, "{} # {}", self.frame, self.hdr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ramses_core::Error;

    fn packet(line: &str) -> Packet {
        Packet::from_frame(Frame::decode(Utc::now(), line).unwrap())
    }

    #[test]
    fn hdr_default_rule_uses_first_byte() {
        let pkt = packet(" I --- 29:091138 --:------ 29:091138 1FC9 001 00");
        assert_eq!(pkt.hdr(), "1FC9|I|00");
        assert_eq!(pkt.ctx(), &Ctx::Idx("00".into()));
    }

    #[test]
    fn hdr_1fc9_uses_domain_id() {
        // Nuaire traffic binds at domain 21.
        let pkt = packet(" W --- 30:098165 32:208628 --:------ 1FC9 006 2131DA797F75");
        assert_eq!(pkt.hdr(), "1FC9|W|21");
    }

    #[test]
    fn hdr_10e0_uses_flag() {
        let pkt = packet("045 RQ --- 18:000730 32:022222 --:------ 10E0 001 00");
        assert_eq!(pkt.hdr(), "10E0|RQ|True");
        assert_eq!(pkt.ctx(), &Ctx::Flag(true));
    }

    #[test]
    fn hdr_31da_uses_domain_byte() {
        let pkt = packet("067 RP --- 32:022222 18:000730 --:------ 31DA 029 \
            21EF007FFF7FFF7FFF7FFF7FFF7FFFEF007FFF7FFF7FFF7FFF7FFF7FFF");
        assert_eq!(pkt.hdr(), "31DA|RP|21");
    }

    #[test]
    fn hdr_determinism() {
        let a = packet(" I --- 29:091138 --:------ 29:091138 22F1 003 000207");
        let b = packet(" I --- 37:155617 --:------ 37:155617 22F1 003 000407");
        // Same code, verb, and first payload byte -- same hdr.
        assert_eq!(a.hdr(), b.hdr());

        let c = packet(" I --- 29:091138 --:------ 29:091138 22F1 003 010207");
        assert_ne!(a.hdr(), c.hdr());
    }

    #[test]
    fn ctx_display_forms() {
        assert_eq!(Ctx::Idx("21".into()).to_string(), "21");
        assert_eq!(Ctx::Flag(true).to_string(), "True");
        assert_eq!(Ctx::Flag(false).to_string(), "False");
        assert_eq!(Ctx::None.to_string(), "");
    }

    #[test]
    fn deref_exposes_frame_fields() {
        let pkt = packet(" I --- 29:091138 32:022222 --:------ 1FC9 001 00");
        assert_eq!(pkt.verb, ramses_core::Verb::I);
        assert_eq!(pkt.src.id(), "29:091138");
        assert_eq!(pkt.code, ramses_core::Code::BIND);
    }

    #[test]
    fn invalid_frames_never_become_packets() {
        // The length invariant is enforced at the frame layer, before a
        // packet can exist.
        let err = Frame::decode(Utc::now(), " I --- 29:091138 --:------ 29:091138 1FC9 004 00")
            .unwrap_err();
        assert!(matches!(err, Error::Length { .. }));
    }
}
