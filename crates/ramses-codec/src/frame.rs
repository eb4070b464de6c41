//! RAMSES frame encoder/decoder.
//!
//! RAMSES gateways (HGI80, evofw3) speak a line-oriented textual protocol.
//! This module handles the pure text-level decoding and serialization of
//! one frame line, including checksum synthesis and verification.
//!
//! # Line format
//!
//! ```text
//! <rssi?> <verb> --- <src> <dst> <announce> <code> <len> <payload_hex> [*<checksum>]
//! ```
//!
//! - `rssi`: three decimal digits, or `...` when the radio gives none;
//!   absent entirely on transmitted lines
//! - `verb`: right-padded to two chars (`" I"`, `"RQ"`, `"RP"`, `" W"`)
//! - `---`: the (unused) sequence-number slot
//! - three address slots, any of which may be `--:------`
//! - `len`: three decimal digits, the payload byte count
//! - `payload_hex`: exactly `2 * len` hex digits
//! - `*HH`: optional checksum; the byte sum of the body text plus the
//!   checksum byte is 0 mod 256
//!
//! Packet-log lines carry the same grammar prefixed with an ISO-8601
//! timestamp; see [`Frame::decode_logline`].

use chrono::{DateTime, SecondsFormat, Utc};

use ramses_core::error::{Error, Result};
use ramses_core::{Address, Code, Verb};

/// Maximum payload size a frame can declare.
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Received signal strength as reported by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rssi {
    /// A three-digit strength reading (lower is stronger on evofw3).
    Level(u8),
    /// The radio reported no reading (`...`).
    Unknown,
}

impl std::fmt::Display for Rssi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rssi::Level(v) => write!(f, "{v:03}"),
            Rssi::Unknown => f.write_str("..."),
        }
    }
}

/// A decoded RAMSES frame.
///
/// Frames are ephemeral: the engine turns them into
/// [`Packet`](crate::packet::Packet)s (which add the correlation header)
/// before anything downstream sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// When the frame was received (or created, for outbound frames).
    pub dtm: DateTime<Utc>,
    /// Signal strength, present on received lines only.
    pub rssi: Option<Rssi>,
    /// The packet verb.
    pub verb: Verb,
    /// Source address; never the null slot.
    pub src: Address,
    /// Destination address; the null slot on broadcast frames.
    pub dst: Address,
    /// Announce slot; equals `src` on broadcast frames.
    pub announce: Address,
    /// The 4-hex command code.
    pub code: Code,
    /// Payload bytes; the declared length has already been verified.
    pub payload: Vec<u8>,
    /// Checksum byte as carried on the wire, if any. Verified on decode.
    pub checksum: Option<u8>,
}

impl Frame {
    /// Returns `true` for lines the gateway emits outside the frame
    /// grammar: `#` comments and `!` evofw3 out-of-band diagnostics.
    pub fn is_out_of_band(line: &str) -> bool {
        matches!(line.trim_start().as_bytes().first(), Some(b'#') | Some(b'!') | None)
    }

    /// Returns `true` if this is a broadcast frame (null destination,
    /// announce slot carrying the source).
    pub fn is_broadcast(&self) -> bool {
        self.dst.is_null() && self.announce == self.src
    }

    /// The device this frame is effectively addressed to.
    ///
    /// For directed frames that is the destination slot; broadcasts have
    /// no single addressee and return the announce slot.
    pub fn effective_dst(&self) -> &Address {
        if self.dst.is_null() {
            &self.announce
        } else {
            &self.dst
        }
    }

    /// Decode one frame line received at `dtm`.
    ///
    /// Fails with [`Error::Malformed`] on a structural violation,
    /// [`Error::Length`] when the declared length does not match the
    /// payload, and [`Error::Checksum`] when a carried checksum does not
    /// verify. A frame without a checksum is accepted.
    pub fn decode(dtm: DateTime<Utc>, line: &str) -> Result<Frame> {
        let mut tokens = line.split_whitespace().peekable();

        let malformed = |what: &str| Error::Malformed(format!("{what}: {line:?}"));

        // Optional RSSI: three digits or three dots.
        let rssi = match tokens.peek() {
            Some(&t) if t == "..." => {
                tokens.next();
                Some(Rssi::Unknown)
            }
            Some(&t) if t.len() == 3 && t.bytes().all(|b| b.is_ascii_digit()) => {
                let level: u16 = t.parse().expect("three digits");
                let level = u8::try_from(level).map_err(|_| malformed("rssi out of range"))?;
                tokens.next();
                Some(Rssi::Level(level))
            }
            _ => None,
        };

        let verb: Verb = tokens
            .next()
            .ok_or_else(|| malformed("missing verb"))?
            .parse()
            .map_err(|_| malformed("bad verb"))?;

        match tokens.next() {
            Some("---") => {}
            _ => return Err(malformed("missing sequence slot")),
        }

        let mut addr = |slot: &str| -> Result<Address> {
            tokens
                .next()
                .ok_or_else(|| malformed(&format!("missing {slot} address")))?
                .parse()
                .map_err(|_| malformed(&format!("bad {slot} address")))
        };
        let src = addr("src")?;
        let dst = addr("dst")?;
        let announce = addr("announce")?;

        if src.is_null() {
            return Err(malformed("null src address"));
        }

        let code: Code = tokens
            .next()
            .ok_or_else(|| malformed("missing code"))?
            .parse()
            .map_err(|_| malformed("bad code"))?;

        let len_tok = tokens.next().ok_or_else(|| malformed("missing length"))?;
        if len_tok.len() != 3 || !len_tok.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed("bad length field"));
        }
        let declared: usize = len_tok.parse().expect("three digits");
        if declared > MAX_PAYLOAD_LEN {
            return Err(malformed("length out of range"));
        }

        // The payload token is absent altogether when len is 000.
        let payload_hex = if declared > 0 {
            tokens.next().ok_or_else(|| malformed("missing payload"))?
        } else if tokens.peek().is_some_and(|t| !t.starts_with('*')) {
            tokens.next().expect("peeked")
        } else {
            ""
        };
        let payload = hex_to_bytes(payload_hex).ok_or_else(|| malformed("bad payload hex"))?;
        if payload.len() != declared {
            return Err(Error::Length {
                declared,
                actual: payload.len(),
            });
        }

        let checksum = match tokens.next() {
            None => None,
            Some(t) if t.len() == 3 && t.starts_with('*') => Some(
                u8::from_str_radix(&t[1..], 16).map_err(|_| malformed("bad checksum hex"))?,
            ),
            Some(_) => return Err(malformed("trailing garbage")),
        };
        if tokens.next().is_some() {
            return Err(malformed("trailing garbage"));
        }

        let frame = Frame {
            dtm,
            rssi,
            verb,
            src,
            dst,
            announce,
            code,
            payload,
            checksum,
        };

        if let Some(found) = checksum {
            let expected = frame.compute_checksum();
            if found != expected {
                return Err(Error::Checksum { expected, found });
            }
        }

        Ok(frame)
    }

    /// Decode a packet-log line: an ISO-8601 timestamp, a space, then the
    /// frame grammar. A trailing ` # comment` is stripped.
    pub fn decode_logline(line: &str) -> Result<Frame> {
        let body = match line.find(" # ") {
            Some(pos) => &line[..pos],
            None => line,
        };
        let (ts, rest) = body
            .split_once(' ')
            .ok_or_else(|| Error::Malformed(format!("no timestamp: {line:?}")))?;
        let dtm = ts
            .parse::<DateTime<Utc>>()
            .or_else(|_| {
                // Log writers stamp naive local-less ISO times.
                chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|naive| naive.and_utc())
            })
            .map_err(|_| Error::Malformed(format!("bad timestamp: {ts:?}")))?;
        Frame::decode(dtm, rest)
    }

    /// The canonical body text, verb through payload.
    ///
    /// This is the region the checksum covers and the region compared for
    /// echo matching.
    pub fn body(&self) -> String {
        format!(
            "{} --- {} {} {} {} {:03} {}",
            self.verb.wire(),
            self.src,
            self.dst,
            self.announce,
            self.code,
            self.payload.len(),
            bytes_to_hex(&self.payload),
        )
    }

    /// Serialize back to the line this frame was decoded from, preserving
    /// RSSI and checksum presence.
    pub fn encode(&self) -> String {
        let mut line = String::new();
        if let Some(rssi) = self.rssi {
            line.push_str(&rssi.to_string());
            line.push(' ');
        }
        line.push_str(&self.body());
        if let Some(sum) = self.checksum {
            line.push_str(&format!(" *{sum:02X}"));
        }
        line
    }

    /// Serialize for transmission: no RSSI, checksum always synthesized.
    pub fn encode_for_tx(&self) -> String {
        format!("{} *{:02X}", self.body(), self.compute_checksum())
    }

    /// Serialize as a packet-log line: ISO timestamp plus [`encode`](Self::encode).
    pub fn encode_logline(&self) -> String {
        format!(
            "{} {}",
            self.dtm.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.encode()
        )
    }

    /// The checksum byte for this frame's body.
    ///
    /// Two's complement of the byte sum of the body text, so the total
    /// including the checksum is 0 mod 256.
    pub fn compute_checksum(&self) -> u8 {
        let sum: u32 = self.body().bytes().map(u32::from).sum();
        (sum as u8).wrapping_neg()
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Decode a hex string into bytes. Returns `None` on odd length or a
/// non-hex digit.
pub fn hex_to_bytes(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(s, 16).ok()
        })
        .collect()
}

/// Encode bytes as uppercase hex.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02X}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dtm() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 9, 2, 12, 0, 0).unwrap()
    }

    // The supplicant's tender from the Vasco binding capture.
    const TENDER: &str = " I --- 29:091138 --:------ 29:091138 1FC9 024 \
        0022F17564020022F37564026610E0756402001FC9756402";

    // -------------------------------------------------------------------
    // hex helpers
    // -------------------------------------------------------------------

    #[test]
    fn hex_round_trip() {
        let bytes = hex_to_bytes("0022F1756402").unwrap();
        assert_eq!(bytes, vec![0x00, 0x22, 0xF1, 0x75, 0x64, 0x02]);
        assert_eq!(bytes_to_hex(&bytes), "0022F1756402");
    }

    #[test]
    fn hex_rejects_bad_input() {
        assert!(hex_to_bytes("0").is_none());
        assert!(hex_to_bytes("0G").is_none());
        assert_eq!(hex_to_bytes("").unwrap(), Vec::<u8>::new());
    }

    // -------------------------------------------------------------------
    // decoding -- valid frames
    // -------------------------------------------------------------------

    #[test]
    fn decode_broadcast_tender() {
        let frame = Frame::decode(dtm(), TENDER).unwrap();
        assert_eq!(frame.verb, Verb::I);
        assert_eq!(frame.src.id(), "29:091138");
        assert!(frame.dst.is_null());
        assert_eq!(frame.announce, frame.src);
        assert!(frame.is_broadcast());
        assert_eq!(frame.code, Code::BIND);
        assert_eq!(frame.payload.len(), 24);
        assert_eq!(frame.rssi, None);
        assert_eq!(frame.checksum, None);
    }

    #[test]
    fn decode_with_rssi() {
        let line = "045 RQ --- 18:000730 01:145038 --:------ 10E0 001 00";
        let frame = Frame::decode(dtm(), line).unwrap();
        assert_eq!(frame.rssi, Some(Rssi::Level(45)));
        assert_eq!(frame.verb, Verb::Rq);
        assert_eq!(frame.code, Code::DEV_INFO);
        assert_eq!(frame.payload, vec![0x00]);
    }

    #[test]
    fn decode_with_unknown_rssi() {
        let line = "...  W --- 32:022222 29:091138 --:------ 1FC9 012 0031D98056CE0031DA8056CE";
        let frame = Frame::decode(dtm(), line).unwrap();
        assert_eq!(frame.rssi, Some(Rssi::Unknown));
        assert_eq!(frame.verb, Verb::W);
        assert_eq!(frame.dst.id(), "29:091138");
        assert!(frame.announce.is_null());
        assert!(!frame.is_broadcast());
    }

    #[test]
    fn decode_directed_affirm() {
        let line = " I --- 29:091138 32:022222 --:------ 1FC9 001 00";
        let frame = Frame::decode(dtm(), line).unwrap();
        assert_eq!(frame.payload, vec![0x00]);
        assert_eq!(frame.effective_dst().id(), "32:022222");
    }

    #[test]
    fn decode_with_valid_checksum() {
        let base = Frame::decode(dtm(), TENDER).unwrap();
        let line = base.encode_for_tx();
        let frame = Frame::decode(dtm(), &line).unwrap();
        assert_eq!(frame.checksum, Some(base.compute_checksum()));
    }

    // -------------------------------------------------------------------
    // decoding -- rejections
    // -------------------------------------------------------------------

    #[test]
    fn decode_rejects_malformed() {
        for line in [
            "",
            "nonsense",
            " I 29:091138 --:------ 29:091138 1FC9 001 00",      // no seq slot
            " X --- 29:091138 --:------ 29:091138 1FC9 001 00",  // bad verb
            " I --- 29:09 --:------ 29:091138 1FC9 001 00",      // bad address
            " I --- --:------ 29:091138 --:------ 1FC9 001 00",  // null src
            " I --- 29:091138 --:------ 29:091138 1FC 001 00",   // bad code
            " I --- 29:091138 --:------ 29:091138 1FC9 01 00",   // 2-digit len
            " I --- 29:091138 --:------ 29:091138 1FC9 001 0Z",  // bad hex
            " I --- 29:091138 --:------ 29:091138 1FC9 001 00 extra",
            "999  I --- 29:091138 --:------ 29:091138 1FC9 001 00", // rssi overflow
        ] {
            let err = Frame::decode(dtm(), line).unwrap_err();
            assert!(matches!(err, Error::Malformed(_)), "line {line:?} gave {err:?}");
        }
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let line = " I --- 29:091138 --:------ 29:091138 1FC9 024 00";
        match Frame::decode(dtm(), line).unwrap_err() {
            Error::Length { declared, actual } => {
                assert_eq!(declared, 24);
                assert_eq!(actual, 1);
            }
            other => panic!("expected Length, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_bad_checksum() {
        let base = Frame::decode(dtm(), TENDER).unwrap();
        let good = base.compute_checksum();
        let bad = good.wrapping_add(1);
        let line = format!("{} *{bad:02X}", base.body());
        match Frame::decode(dtm(), &line).unwrap_err() {
            Error::Checksum { expected, found } => {
                assert_eq!(expected, good);
                assert_eq!(found, bad);
            }
            other => panic!("expected Checksum, got {other:?}"),
        }
    }

    // -------------------------------------------------------------------
    // checksum property
    // -------------------------------------------------------------------

    #[test]
    fn checksum_sums_to_zero() {
        let frame = Frame::decode(dtm(), TENDER).unwrap();
        let sum: u32 = frame.body().bytes().map(u32::from).sum::<u32>()
            + u32::from(frame.compute_checksum());
        assert_eq!(sum % 256, 0);
    }

    // -------------------------------------------------------------------
    // round trips
    // -------------------------------------------------------------------

    #[test]
    fn encode_round_trip_identity() {
        for line in [
            TENDER,
            "045 RQ --- 18:000730 01:145038 --:------ 10E0 001 00",
            "... RP --- 29:091138 18:000730 --:------ 10E0 038 \
             000001C8400F0166FFFFFFFFFFFF0E0207E3564D4E2D31374C4D503031000000000000000000",
            " W --- 32:022222 29:091138 --:------ 1FC9 012 0031D98056CE0031DA8056CE",
        ] {
            let frame = Frame::decode(dtm(), line).unwrap();
            let encoded = frame.encode();
            assert_eq!(
                encoded.split_whitespace().collect::<Vec<_>>(),
                line.split_whitespace().collect::<Vec<_>>(),
            );
            // A second pass is byte-identical: the first encode is canonical.
            let again = Frame::decode(dtm(), &encoded).unwrap();
            assert_eq!(again, frame);
            assert_eq!(again.encode(), encoded);
        }
    }

    #[test]
    fn tx_round_trip_with_checksum() {
        let frame = Frame::decode(dtm(), TENDER).unwrap();
        let wire = frame.encode_for_tx();
        let back = Frame::decode(dtm(), &wire).unwrap();
        assert_eq!(back.encode(), wire);
        assert_eq!(back.payload, frame.payload);
        assert!(back.checksum.is_some());
    }

    #[test]
    fn logline_round_trip() {
        let frame = Frame::decode(dtm(), TENDER).unwrap();
        let logline = frame.encode_logline();
        let back = Frame::decode_logline(&logline).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn logline_strips_comment() {
        let line = format!("{} {} # bound CO2 sensor", dtm().to_rfc3339(), TENDER.trim());
        let frame = Frame::decode_logline(&line).unwrap();
        assert_eq!(frame.code, Code::BIND);
    }

    #[test]
    fn logline_accepts_naive_timestamps() {
        let line = format!("2023-09-02T12:00:00.123456 {}", TENDER.trim());
        let frame = Frame::decode_logline(&line).unwrap();
        assert_eq!(frame.dtm.timestamp_subsec_micros(), 123_456);
    }

    // -------------------------------------------------------------------
    // out-of-band lines
    // -------------------------------------------------------------------

    #[test]
    fn out_of_band_detection() {
        assert!(Frame::is_out_of_band("# comment from the gateway"));
        assert!(Frame::is_out_of_band("!V evofw3 0.7.1"));
        assert!(Frame::is_out_of_band(""));
        assert!(Frame::is_out_of_band("   # indented comment"));
        assert!(!Frame::is_out_of_band(TENDER));
        assert!(!Frame::is_out_of_band("045 RQ --- 18:000730 01:145038 --:------ 10E0 001 00"));
    }
}
