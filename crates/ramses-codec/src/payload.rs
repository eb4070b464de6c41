//! The closed payload decode registry.
//!
//! Inbound payload parsing is a fixed table of per-code decoders keyed by
//! the 4-hex code; the result is the tagged [`PayloadKind`]. Codes
//! without a decoder are not an error: their bytes are preserved in
//! [`PayloadKind::Raw`] and surfaced untouched, so subscribers can bring
//! their own parsing for codes this runtime does not model.

use ramses_core::error::{Error, Result};
use ramses_core::{Code, Verb};

use crate::command::{parse_bind_triplets, BindTriplet};
use crate::fingerprint::DeviceFingerprint;

/// A decoded payload, tagged by what the code carries.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadKind {
    /// `10E0`: a device identity block.
    DeviceInfo(DeviceFingerprint),
    /// `1FC9` tender/accept: binding triplets.
    BindTriplets(Vec<BindTriplet>),
    /// `1FC9` affirm: the one-byte domain id.
    BindConfirm {
        /// The confirmed domain id.
        idx: u8,
    },
    /// `22F1`: a fan rate selection.
    FanRate {
        /// Selected rate step.
        rate: u8,
        /// Number of steps on the scale.
        scale: u8,
    },
    /// `31D9`: basic fan state.
    FanState {
        /// Domain id.
        idx: u8,
        /// Raw mode/fault bitmap.
        flags: u8,
        /// Fan speed as a fraction, `None` when the unit reports `FF`.
        speed: Option<f32>,
    },
    /// `1060`: battery state.
    Battery {
        /// Charge fraction, `None` when the device reports `FF`.
        level: Option<f32>,
        /// The low-battery alarm bit.
        low: bool,
    },
    /// Any code without a registered decoder; bytes preserved verbatim.
    Raw(Vec<u8>),
}

/// Decode a payload through the registry.
///
/// Known codes parse strictly (a short `31D9` is `Malformed`); unknown
/// codes fall through to [`PayloadKind::Raw`].
pub fn decode_payload(code: Code, verb: Verb, payload: &[u8]) -> Result<PayloadKind> {
    match code {
        Code::DEV_INFO if verb != Verb::Rq => {
            Ok(PayloadKind::DeviceInfo(DeviceFingerprint::from_payload(payload)?))
        }
        Code::BIND => match payload {
            [idx] => Ok(PayloadKind::BindConfirm { idx: *idx }),
            _ => Ok(PayloadKind::BindTriplets(parse_bind_triplets(payload)?)),
        },
        Code::FAN_RATE => {
            let [_, rate, scale] = payload else {
                return Err(Error::Malformed(format!(
                    "22F1 payload of {} bytes",
                    payload.len()
                )));
            };
            Ok(PayloadKind::FanRate {
                rate: *rate,
                scale: *scale,
            })
        }
        Code::FAN_STATE => {
            if payload.len() < 3 {
                return Err(Error::Malformed(format!(
                    "31D9 payload of {} bytes",
                    payload.len()
                )));
            }
            let speed = match payload[2] {
                0xFF => None,
                v => Some(f32::from(v) / 200.0),
            };
            Ok(PayloadKind::FanState {
                idx: payload[0],
                flags: payload[1],
                speed,
            })
        }
        Code::BATTERY => {
            if payload.len() < 3 {
                return Err(Error::Malformed(format!(
                    "1060 payload of {} bytes",
                    payload.len()
                )));
            }
            let level = match payload[1] {
                0xFF => None,
                v => Some(f32::from(v) / 200.0),
            };
            Ok(PayloadKind::Battery {
                level,
                low: payload[2] == 0x00,
            })
        }
        _ => Ok(PayloadKind::Raw(payload.to_vec())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::DeviceClass;
    use crate::frame::hex_to_bytes;

    #[test]
    fn decode_device_info() {
        let payload = hex_to_bytes(
            "000001C8400F0166FFFFFFFFFFFF0E0207E3564D4E2D31374C4D503031000000000000000000",
        )
        .unwrap();
        match decode_payload(Code::DEV_INFO, Verb::I, &payload).unwrap() {
            PayloadKind::DeviceInfo(fp) => {
                assert_eq!(fp.class, DeviceClass::Rem);
                assert_eq!(fp.oem_code, 0x66);
            }
            other => panic!("expected DeviceInfo, got {other:?}"),
        }
    }

    #[test]
    fn rq_10e0_is_not_an_identity_block() {
        // The request payload is a bare index, not a fingerprint.
        match decode_payload(Code::DEV_INFO, Verb::Rq, &[0x00]).unwrap() {
            PayloadKind::Raw(bytes) => assert_eq!(bytes, vec![0x00]),
            other => panic!("expected Raw, got {other:?}"),
        }
    }

    #[test]
    fn decode_bind_shapes() {
        let triplets = hex_to_bytes("0031D98056CE0031DA8056CE").unwrap();
        match decode_payload(Code::BIND, Verb::W, &triplets).unwrap() {
            PayloadKind::BindTriplets(t) => assert_eq!(t.len(), 2),
            other => panic!("expected BindTriplets, got {other:?}"),
        }

        match decode_payload(Code::BIND, Verb::I, &[0x21]).unwrap() {
            PayloadKind::BindConfirm { idx } => assert_eq!(idx, 0x21),
            other => panic!("expected BindConfirm, got {other:?}"),
        }
    }

    #[test]
    fn decode_fan_rate() {
        match decode_payload(Code::FAN_RATE, Verb::I, &[0x00, 0x02, 0x04]).unwrap() {
            PayloadKind::FanRate { rate, scale } => {
                assert_eq!(rate, 2);
                assert_eq!(scale, 4);
            }
            other => panic!("expected FanRate, got {other:?}"),
        }
        assert!(decode_payload(Code::FAN_RATE, Verb::I, &[0x00]).is_err());
    }

    #[test]
    fn decode_fan_state() {
        match decode_payload(Code::FAN_STATE, Verb::I, &[0x00, 0x00, 0x64]).unwrap() {
            PayloadKind::FanState { idx, flags, speed } => {
                assert_eq!(idx, 0);
                assert_eq!(flags, 0);
                assert_eq!(speed, Some(0.5));
            }
            other => panic!("expected FanState, got {other:?}"),
        }
        match decode_payload(Code::FAN_STATE, Verb::I, &[0x00, 0x00, 0xFF]).unwrap() {
            PayloadKind::FanState { speed, .. } => assert_eq!(speed, None),
            other => panic!("expected FanState, got {other:?}"),
        }
    }

    #[test]
    fn decode_battery() {
        match decode_payload(Code::BATTERY, Verb::I, &[0x00, 0x64, 0x01]).unwrap() {
            PayloadKind::Battery { level, low } => {
                assert_eq!(level, Some(0.5));
                assert!(!low);
            }
            other => panic!("expected Battery, got {other:?}"),
        }
        match decode_payload(Code::BATTERY, Verb::I, &[0x00, 0xFF, 0x00]).unwrap() {
            PayloadKind::Battery { level, low } => {
                assert_eq!(level, None);
                assert!(low);
            }
            other => panic!("expected Battery, got {other:?}"),
        }
    }

    #[test]
    fn unknown_code_preserves_raw_bytes() {
        let bytes = [0xDE, 0xAD, 0xBE, 0xEF];
        match decode_payload(Code(0x3150), Verb::I, &bytes).unwrap() {
            PayloadKind::Raw(raw) => assert_eq!(raw, bytes),
            other => panic!("expected Raw, got {other:?}"),
        }
    }
}
