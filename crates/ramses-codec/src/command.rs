//! Outbound command construction.
//!
//! A [`Command`] is the pre-frame form of a transmission: verb, addresses,
//! code, payload, QoS, and the header of the reply it expects (if any).
//! Commands are built through the per-code constructors below, which
//! validate their typed parameters and produce payloads of the exact
//! length the code requires; [`Command::from_attrs`] is the raw escape
//! hatch for codes without a dedicated builder.
//!
//! The engine injects its own gateway address into commands built without
//! an explicit source before transmission.

use std::time::Duration;

use chrono::{DateTime, Utc};

use ramses_core::error::{Error, Result};
use ramses_core::{Address, Code, Priority, Verb};

use crate::frame::{Frame, MAX_PAYLOAD_LEN};
use crate::packet::hdr_of;

/// Default reply-wait deadline.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(3);

/// Default number of retries (total sends = retries + 1).
pub const DEFAULT_RETRIES: u32 = 3;

/// Per-command quality of service: priority, retry budget, deadlines.
///
/// `None` deadlines fall back to the engine's configured defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qos {
    /// Which send queue the command joins.
    pub priority: Priority,
    /// How many times a failed send is retried.
    pub retries: u32,
    /// Override for the echo-wait deadline.
    pub echo_timeout: Option<Duration>,
    /// Override for the reply-wait deadline.
    pub reply_timeout: Option<Duration>,
}

impl Default for Qos {
    fn default() -> Self {
        Qos {
            priority: Priority::Command,
            retries: DEFAULT_RETRIES,
            echo_timeout: None,
            reply_timeout: None,
        }
    }
}

impl Qos {
    /// The QoS defaults observed to work for a verb|code pair.
    ///
    /// Binding traffic jumps the queue and keeps a tight retry budget;
    /// the full `31DA` status block takes some fans most of a second to
    /// assemble.
    pub fn for_verb_code(verb: Verb, code: Code) -> Qos {
        match (verb, code) {
            (Verb::I | Verb::W, Code::BIND) => Qos {
                priority: Priority::Binding,
                retries: 2,
                ..Qos::default()
            },
            (Verb::Rq, Code::VENT_STATE) => Qos {
                reply_timeout: Some(Duration::from_millis(4500)),
                ..Qos::default()
            },
            _ => Qos::default(),
        }
    }
}

/// Where the expected reply must come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyFrom {
    /// The addressed device.
    Addr(Address),
    /// Any device. Used for self-addressed offers, where the answering
    /// respondent is not known in advance.
    Any,
}

/// The reply a command waits for after its echo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedReply {
    /// Header the reply must carry (`CODE|VERB|CTX`).
    pub hdr: String,
    /// Source constraint for the reply.
    pub from: ReplyFrom,
}

/// An outbound command: a frame to be, plus transmission policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The packet verb.
    pub verb: Verb,
    /// Source address; `None` means "the gateway", injected at send time.
    pub src: Option<Address>,
    /// Destination device. When equal to `src` the frame goes out in
    /// broadcast shape (null dst slot, announce carrying the source).
    pub dst: Address,
    /// The 4-hex command code.
    pub code: Code,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// Transmission policy.
    pub qos: Qos,
    /// The reply to wait for, or `None` to resolve on echo.
    pub expected_reply: Option<ExpectedReply>,
}

impl Command {
    /// Build a command from raw attributes.
    ///
    /// Derives the expected reply from the verb discipline: an `RQ`
    /// expects an `RP` and a `W` expects an `I`, both with this command's
    /// context, from the addressed device.
    pub fn from_attrs(verb: Verb, dst: Address, code: Code, payload: &[u8]) -> Result<Command> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::InvalidParameter(format!(
                "payload too long: {} bytes",
                payload.len()
            )));
        }
        let expected_reply = verb.reply_verb().map(|reply_verb| ExpectedReply {
            hdr: hdr_of(code, reply_verb, payload),
            from: ReplyFrom::Addr(dst.clone()),
        });
        Ok(Command {
            verb,
            src: None,
            dst,
            code,
            payload: payload.to_vec(),
            qos: Qos::for_verb_code(verb, code),
            expected_reply,
        })
    }

    /// Set an explicit source address (an emulated device).
    ///
    /// Without this the engine substitutes its own gateway id.
    pub fn with_src(mut self, src: Address) -> Self {
        self.src = Some(src);
        self
    }

    /// Replace the QoS policy.
    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    /// Clear the reply expectation; the command resolves on its echo.
    pub fn no_reply(mut self) -> Self {
        self.expected_reply = None;
        self
    }

    /// The header this command transmits under.
    pub fn tx_hdr(&self) -> String {
        hdr_of(self.code, self.verb, &self.payload)
    }

    /// Realize the frame for transmission, with the source resolved.
    ///
    /// A self-addressed command takes the broadcast shape: null dst slot,
    /// announce slot carrying the source.
    pub fn to_frame(&self, gateway_id: &Address, dtm: DateTime<Utc>) -> Frame {
        let src = self.src.clone().unwrap_or_else(|| gateway_id.clone());
        let (dst, announce) = if self.dst == src {
            (Address::none(), src.clone())
        } else {
            (self.dst.clone(), Address::none())
        };
        Frame {
            dtm,
            rssi: None,
            verb: self.verb,
            src,
            dst,
            announce,
            code: self.code,
            payload: self.payload.clone(),
            checksum: None,
        }
    }

    // -- per-code constructors ------------------------------------------

    /// `RQ 10E0`: ask a device for its identity block.
    pub fn get_device_info(dst: Address) -> Result<Command> {
        Command::from_attrs(Verb::Rq, dst, Code::DEV_INFO, &[0x00])
    }

    /// `I 10E0` broadcast: publish an identity block (the RATIFY step of
    /// a binding handshake, or periodic self-announcement).
    pub fn device_info_announce(src: Address, payload: &[u8]) -> Result<Command> {
        if payload.len() < 18 {
            return Err(Error::InvalidParameter(format!(
                "identity payload too short: {} bytes",
                payload.len()
            )));
        }
        Ok(Command::from_attrs(Verb::I, Address::all(), Code::DEV_INFO, payload)?
            .with_src(src)
            .no_reply())
    }

    /// `I 22F1`: a remote keypress selecting fan rate `rate` of `scale`.
    pub fn set_fan_rate(dst: Address, rate: u8, scale: u8) -> Result<Command> {
        if scale == 0 || scale > 10 {
            return Err(Error::InvalidParameter(format!("fan rate scale: {scale}")));
        }
        if rate > scale {
            return Err(Error::InvalidParameter(format!("fan rate {rate} of {scale}")));
        }
        Ok(Command::from_attrs(Verb::I, dst, Code::FAN_RATE, &[0x00, rate, scale])?.no_reply())
    }

    /// `I 22F3`: run the fan boost timer for `minutes`.
    pub fn set_fan_boost(dst: Address, minutes: u8) -> Result<Command> {
        if minutes == 0 {
            return Err(Error::InvalidParameter("boost of zero minutes".into()));
        }
        Ok(Command::from_attrs(Verb::I, dst, Code::FAN_BOOST, &[0x00, minutes, 0x00])?.no_reply())
    }

    /// `RQ 31D9`: poll a fan's basic state.
    pub fn get_fan_state(dst: Address) -> Result<Command> {
        Command::from_attrs(Verb::Rq, dst, Code::FAN_STATE, &[0x00])
    }

    /// `RQ 31DA`: poll a ventilation unit's full status block.
    pub fn get_vent_state(dst: Address) -> Result<Command> {
        Command::from_attrs(Verb::Rq, dst, Code::VENT_STATE, &[0x00])
    }

    // -- binding handshake ----------------------------------------------

    /// `I 1FC9` TENDER: offer to publish `offer_codes` at `idx`.
    ///
    /// The offer is self-addressed (broadcast shape) and always closes
    /// with the mandatory `00 1FC9 <src>` triplet; an `oem` code inserts
    /// the `<oem> 10E0 <src>` identity advertisement before it. The
    /// expected reply is an accept (`1FC9 W` at the same idx) from any
    /// respondent.
    pub fn tender(src: Address, idx: u8, offer_codes: &[Code], oem: Option<u8>) -> Result<Command> {
        if offer_codes.is_empty() {
            return Err(Error::InvalidParameter("tender with no offer codes".into()));
        }
        let mut triplets: Vec<BindTriplet> = offer_codes
            .iter()
            .map(|&code| BindTriplet {
                idx,
                code,
                addr: src.clone(),
            })
            .collect();
        if let Some(oem) = oem {
            triplets.push(BindTriplet {
                idx: oem,
                code: Code::DEV_INFO,
                addr: src.clone(),
            });
        }
        triplets.push(BindTriplet {
            idx: 0x00,
            code: Code::BIND,
            addr: src.clone(),
        });

        let payload = encode_bind_triplets(&triplets)?;
        let mut cmd = Command::from_attrs(Verb::I, src.clone(), Code::BIND, &payload)?
            .with_src(src);
        cmd.expected_reply = Some(ExpectedReply {
            hdr: format!("{}|{}|{:02X}", Code::BIND, Verb::W, idx),
            from: ReplyFrom::Any,
        });
        Ok(cmd)
    }

    /// `W 1FC9` ACCEPT: consume `accept_codes` at `idx`, addressed to the
    /// offering supplicant. Expects the AFFIRM (`1FC9 I` at `idx`) back
    /// from the supplicant.
    pub fn accept(
        src: Address,
        supplicant: Address,
        idx: u8,
        accept_codes: &[Code],
    ) -> Result<Command> {
        if accept_codes.is_empty() {
            return Err(Error::InvalidParameter("accept with no codes".into()));
        }
        let triplets: Vec<BindTriplet> = accept_codes
            .iter()
            .map(|&code| BindTriplet {
                idx,
                code,
                addr: src.clone(),
            })
            .collect();
        let payload = encode_bind_triplets(&triplets)?;
        let mut cmd = Command::from_attrs(Verb::W, supplicant.clone(), Code::BIND, &payload)?
            .with_src(src);
        cmd.expected_reply = Some(ExpectedReply {
            hdr: format!("{}|{}|{:02X}", Code::BIND, Verb::I, idx),
            from: ReplyFrom::Addr(supplicant),
        });
        Ok(cmd)
    }

    /// `I 1FC9` AFFIRM: confirm a binding to the respondent.
    ///
    /// Transmits the one-byte idx form (receivers also accept a full
    /// offer echo, but this runtime emits the short form).
    pub fn affirm(src: Address, respondent: Address, idx: u8) -> Result<Command> {
        Ok(Command::from_attrs(Verb::I, respondent, Code::BIND, &[idx])?
            .with_src(src)
            .no_reply())
    }
}

// -----------------------------------------------------------------------
// 1FC9 triplets
// -----------------------------------------------------------------------

/// One `idx(1) | code(2) | addr(3)` element of a `1FC9` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindTriplet {
    /// Domain id (vendor-specific: `00` Vasco/ClimaRad, `21` Nuaire) --
    /// or the oem code on a `10E0` advertisement triplet.
    pub idx: u8,
    /// The code being offered or accepted.
    pub code: Code,
    /// The publishing device, 3-byte packed on the wire.
    pub addr: Address,
}

/// Encode binding triplets into a `1FC9` payload.
///
/// Every triplet must carry the same source address; a mixed offer is a
/// construction error.
pub fn encode_bind_triplets(triplets: &[BindTriplet]) -> Result<Vec<u8>> {
    let Some(first) = triplets.first() else {
        return Err(Error::InvalidParameter("no binding triplets".into()));
    };
    if triplets.iter().any(|t| t.addr != first.addr) {
        return Err(Error::InvalidParameter(
            "binding triplets with mixed source addresses".into(),
        ));
    }
    let mut payload = Vec::with_capacity(triplets.len() * 6);
    for t in triplets {
        payload.push(t.idx);
        payload.extend_from_slice(&t.code.0.to_be_bytes());
        let packed =
            u32::from_str_radix(&t.addr.to_hex(), 16).expect("addresses pack to 6 hex digits");
        payload.extend_from_slice(&packed.to_be_bytes()[1..]);
    }
    Ok(payload)
}

/// Parse a `1FC9` payload into its triplets.
///
/// Fails on a length that is not a multiple of six. The one-byte AFFIRM
/// payload is not triplet-shaped; callers check for it first.
pub fn parse_bind_triplets(payload: &[u8]) -> Result<Vec<BindTriplet>> {
    if payload.is_empty() || payload.len() % 6 != 0 {
        return Err(Error::Malformed(format!(
            "1FC9 payload of {} bytes is not triplets",
            payload.len()
        )));
    }
    payload
        .chunks(6)
        .map(|chunk| {
            let code = Code(u16::from_be_bytes([chunk[1], chunk[2]]));
            let hex = format!("{:02X}{:02X}{:02X}", chunk[3], chunk[4], chunk[5]);
            let addr = Address::from_hex(&hex)
                .map_err(|e| Error::Malformed(format!("1FC9 triplet address: {e}")))?;
            Ok(BindTriplet {
                idx: chunk[0],
                code,
                addr,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::bytes_to_hex;
    use chrono::Utc;

    fn rem() -> Address {
        "29:091138".parse().unwrap()
    }

    fn fan() -> Address {
        "32:022222".parse().unwrap()
    }

    fn hgi() -> Address {
        Address::hgi()
    }

    // -------------------------------------------------------------------
    // raw construction and reply derivation
    // -------------------------------------------------------------------

    #[test]
    fn rq_derives_rp_expectation() {
        let cmd = Command::get_device_info(fan()).unwrap();
        assert_eq!(cmd.verb, Verb::Rq);
        let reply = cmd.expected_reply.as_ref().unwrap();
        assert_eq!(reply.hdr, "10E0|RP|True");
        assert_eq!(reply.from, ReplyFrom::Addr(fan()));
    }

    #[test]
    fn i_with_no_expectation_resolves_on_echo() {
        let cmd = Command::set_fan_rate(fan(), 2, 4).unwrap();
        assert!(cmd.expected_reply.is_none());
        assert_eq!(cmd.payload, vec![0x00, 0x02, 0x04]);
    }

    #[test]
    fn from_attrs_rejects_oversized_payload() {
        let big = vec![0u8; 256];
        assert!(matches!(
            Command::from_attrs(Verb::I, fan(), Code::FAN_RATE, &big),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn builders_validate_parameters() {
        assert!(Command::set_fan_rate(fan(), 5, 4).is_err());
        assert!(Command::set_fan_rate(fan(), 1, 0).is_err());
        assert!(Command::set_fan_rate(fan(), 1, 11).is_err());
        assert!(Command::set_fan_boost(fan(), 0).is_err());
        assert!(Command::device_info_announce(rem(), &[0u8; 4]).is_err());
    }

    #[test]
    fn qos_table_binding_priority() {
        let cmd = Command::tender(rem(), 0x00, &[Code::FAN_RATE], None).unwrap();
        assert_eq!(cmd.qos.priority, Priority::Binding);
        assert_eq!(cmd.qos.retries, 2);

        let cmd = Command::get_vent_state(fan()).unwrap();
        assert_eq!(cmd.qos.reply_timeout, Some(Duration::from_millis(4500)));

        let cmd = Command::get_fan_state(fan()).unwrap();
        assert_eq!(cmd.qos, Qos::default());
    }

    // -------------------------------------------------------------------
    // frame realization
    // -------------------------------------------------------------------

    #[test]
    fn gateway_src_injection() {
        let cmd = Command::get_device_info(fan()).unwrap();
        let frame = cmd.to_frame(&hgi(), Utc::now());
        assert_eq!(frame.src, hgi());
        assert_eq!(frame.dst, fan());
        assert!(frame.announce.is_null());
    }

    #[test]
    fn explicit_src_is_kept() {
        let cmd = Command::affirm(rem(), fan(), 0x00).unwrap();
        let frame = cmd.to_frame(&hgi(), Utc::now());
        assert_eq!(frame.src, rem());
        assert_eq!(frame.dst, fan());
    }

    #[test]
    fn self_addressed_takes_broadcast_shape() {
        let cmd = Command::tender(rem(), 0x00, &[Code::FAN_RATE], None).unwrap();
        let frame = cmd.to_frame(&hgi(), Utc::now());
        assert_eq!(frame.src, rem());
        assert!(frame.dst.is_null());
        assert_eq!(frame.announce, rem());
        assert!(frame.is_broadcast());
    }

    // -------------------------------------------------------------------
    // binding payloads against the captured traces
    // -------------------------------------------------------------------

    #[test]
    fn vasco_tender_payload_matches_capture() {
        // I 29:091138 --:------ 29:091138 1FC9 024
        //   0022F1756402 0022F3756402 6610E0756402 001FC9756402
        let cmd = Command::tender(
            rem(),
            0x00,
            &[Code::FAN_RATE, Code::FAN_BOOST],
            Some(0x66),
        )
        .unwrap();
        assert_eq!(
            bytes_to_hex(&cmd.payload),
            "0022F17564020022F37564026610E0756402001FC9756402"
        );
        let reply = cmd.expected_reply.as_ref().unwrap();
        assert_eq!(reply.hdr, "1FC9|W|00");
        assert_eq!(reply.from, ReplyFrom::Any);
    }

    #[test]
    fn nuaire_accept_payload_matches_capture() {
        // W 30:098165 ... 1FC9 006 2131DA797F75
        let resp: Address = "30:098165".parse().unwrap();
        let supp: Address = "32:208628".parse().unwrap();
        let cmd = Command::accept(resp.clone(), supp.clone(), 0x21, &[Code::VENT_STATE]).unwrap();
        assert_eq!(bytes_to_hex(&cmd.payload), "2131DA797F75");
        assert_eq!(cmd.verb, Verb::W);
        assert_eq!(cmd.dst, supp);
        let reply = cmd.expected_reply.as_ref().unwrap();
        assert_eq!(reply.hdr, "1FC9|I|21");
        assert_eq!(reply.from, ReplyFrom::Addr(supp));
    }

    #[test]
    fn affirm_is_single_idx_byte() {
        let cmd = Command::affirm(rem(), fan(), 0x21).unwrap();
        assert_eq!(cmd.payload, vec![0x21]);
        assert!(cmd.expected_reply.is_none());
        assert_eq!(cmd.tx_hdr(), "1FC9|I|21");
    }

    #[test]
    fn tender_requires_offer_codes() {
        assert!(Command::tender(rem(), 0x00, &[], None).is_err());
        assert!(Command::accept(fan(), rem(), 0x00, &[]).is_err());
    }

    // -------------------------------------------------------------------
    // triplet codec
    // -------------------------------------------------------------------

    #[test]
    fn triplet_round_trip() {
        let triplets = vec![
            BindTriplet {
                idx: 0x00,
                code: Code::FAN_STATE,
                addr: fan(),
            },
            BindTriplet {
                idx: 0x00,
                code: Code::VENT_STATE,
                addr: fan(),
            },
        ];
        let payload = encode_bind_triplets(&triplets).unwrap();
        assert_eq!(payload.len(), 12);
        assert_eq!(parse_bind_triplets(&payload).unwrap(), triplets);
    }

    #[test]
    fn triplets_reject_mixed_sources() {
        let mixed = vec![
            BindTriplet {
                idx: 0x00,
                code: Code::FAN_RATE,
                addr: rem(),
            },
            BindTriplet {
                idx: 0x00,
                code: Code::BIND,
                addr: fan(),
            },
        ];
        assert!(matches!(
            encode_bind_triplets(&mixed),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn parse_rejects_non_triplet_lengths() {
        assert!(parse_bind_triplets(&[]).is_err());
        assert!(parse_bind_triplets(&[0x00]).is_err());
        assert!(parse_bind_triplets(&[0u8; 7]).is_err());
    }

    #[test]
    fn parse_vasco_accept() {
        // W 32:022222 29:091138 --:------ 1FC9 012 0031D98056CE0031DA8056CE
        let payload = crate::frame::hex_to_bytes("0031D98056CE0031DA8056CE").unwrap();
        let triplets = parse_bind_triplets(&payload).unwrap();
        assert_eq!(triplets.len(), 2);
        assert_eq!(triplets[0].idx, 0x00);
        assert_eq!(triplets[0].code, Code::FAN_STATE);
        assert_eq!(triplets[1].code, Code::VENT_STATE);
        assert_eq!(triplets[0].addr, triplets[1].addr);
        assert_eq!(triplets[0].addr.to_hex(), "8056CE");
    }
}
