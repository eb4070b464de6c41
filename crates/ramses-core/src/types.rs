//! Core protocol types: verbs, command codes, device kinds, priorities.

use std::fmt;
use std::str::FromStr;

/// A RAMSES packet verb.
///
/// `I` announces state, `RQ` requests (and expects an `RP`), `RP` answers
/// an `RQ`, and `W` writes (and expects an `I` confirmation). On the wire
/// the verb field is padded to two characters: `" I"`, `"RQ"`, `"RP"`,
/// `" W"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Informational broadcast.
    I,
    /// Request; the addressed device answers with an `RP`.
    Rq,
    /// Reply to an `RQ`.
    Rp,
    /// Write; the addressed device confirms with an `I`.
    W,
}

impl Verb {
    /// The two-character wire form (`" I"`, `"RQ"`, `"RP"`, `" W"`).
    pub fn wire(&self) -> &'static str {
        match self {
            Verb::I => " I",
            Verb::Rq => "RQ",
            Verb::Rp => "RP",
            Verb::W => " W",
        }
    }

    /// The verb a device answers this verb with, if any.
    ///
    /// `RQ` expects `RP`; `W` expects an `I` confirmation. `I` and `RP`
    /// expect nothing.
    pub fn reply_verb(&self) -> Option<Verb> {
        match self {
            Verb::Rq => Some(Verb::Rp),
            Verb::W => Some(Verb::I),
            Verb::I | Verb::Rp => None,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire().trim_start())
    }
}

/// Error returned when a string cannot be parsed into a [`Verb`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVerbError(String);

impl fmt::Display for ParseVerbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown verb: '{}'", self.0)
    }
}

impl std::error::Error for ParseVerbError {}

impl FromStr for Verb {
    type Err = ParseVerbError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "I" => Ok(Verb::I),
            "RQ" => Ok(Verb::Rq),
            "RP" => Ok(Verb::Rp),
            "W" => Ok(Verb::W),
            _ => Err(ParseVerbError(s.to_string())),
        }
    }
}

/// A 4-hex-digit RAMSES command code (e.g. `1FC9`, `10E0`, `31DA`).
///
/// The code space is open-ended; the runtime names the codes it handles
/// itself and passes every other code through untouched.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Code(pub u16);

impl Code {
    /// `1FC9` -- the binding handshake (tender/accept/affirm).
    pub const BIND: Code = Code(0x1FC9);
    /// `10E0` -- device identity (manufacturer, product, oem code, model).
    pub const DEV_INFO: Code = Code(0x10E0);
    /// `1060` -- battery state.
    pub const BATTERY: Code = Code(0x1060);
    /// `1298` -- CO2 level.
    pub const CO2_LEVEL: Code = Code(0x1298);
    /// `12A0` -- indoor humidity.
    pub const INDOOR_HUMIDITY: Code = Code(0x12A0);
    /// `22F1` -- fan rate (remote keypress).
    pub const FAN_RATE: Code = Code(0x22F1);
    /// `22F3` -- fan boost timer.
    pub const FAN_BOOST: Code = Code(0x22F3);
    /// `2E10` -- presence detect.
    pub const PRESENCE: Code = Code(0x2E10);
    /// `31D9` -- fan state.
    pub const FAN_STATE: Code = Code(0x31D9);
    /// `31DA` -- ventilation state (the full HRU status block).
    pub const VENT_STATE: Code = Code(0x31DA);
    /// `31E0` -- ventilation demand.
    pub const VENT_DEMAND: Code = Code(0x31E0);
    /// `7FFF` -- the gateway's own puzzle/trace code.
    pub const PUZZLE: Code = Code(0x7FFF);

    /// The canonical 4-hex-digit form (`"1FC9"`).
    pub fn as_hex(&self) -> String {
        format!("{:04X}", self.0)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({:04X})", self.0)
    }
}

/// Error returned when a string cannot be parsed into a [`Code`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCodeError(String);

impl fmt::Display for ParseCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid command code: '{}'", self.0)
    }
}

impl std::error::Error for ParseCodeError {}

impl FromStr for Code {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.len() != 4 {
            return Err(ParseCodeError(s.to_string()));
        }
        u16::from_str_radix(s, 16)
            .map(Code)
            .map_err(|_| ParseCodeError(s.to_string()))
    }
}

/// Coarse device kind derived from an address class tag.
///
/// The HVAC class tags (`20`, `29`, `30`, `32`, `37`) cover remotes, fans,
/// and sensors alike; `10E0` fingerprints resolve the finer class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Evohome controller (class `01`).
    Controller,
    /// Underfloor heating hub (class `02`).
    UnderfloorHub,
    /// Radiator valve actuator, e.g. HR92 (class `04`).
    TrvActuator,
    /// OpenTherm bridge (class `10`).
    OpenthermBridge,
    /// Wireless relay box, e.g. BDR91 (class `13`).
    BdrSwitch,
    /// USB gateway: HGI80 or an evofw3 stick (class `18`).
    Gateway,
    /// Itho spIDer gateway (class `21`).
    RfGateway,
    /// Room thermostat (classes `03`, `22`, `34`).
    Thermostat,
    /// HVAC family: remotes, fans, CO2/humidity sensors, displays.
    Hvac,
    /// Anything the class tag does not identify.
    Unknown,
}

impl DeviceKind {
    /// Map a two-character class tag to its coarse kind.
    pub fn from_class_tag(tag: &str) -> DeviceKind {
        match tag {
            "01" => DeviceKind::Controller,
            "02" => DeviceKind::UnderfloorHub,
            "03" | "22" | "34" => DeviceKind::Thermostat,
            "04" => DeviceKind::TrvActuator,
            "10" => DeviceKind::OpenthermBridge,
            "13" => DeviceKind::BdrSwitch,
            "18" => DeviceKind::Gateway,
            "21" => DeviceKind::RfGateway,
            "20" | "29" | "30" | "32" | "37" => DeviceKind::Hvac,
            _ => DeviceKind::Unknown,
        }
    }
}

/// Transmission priority class.
///
/// The engine drains its send queues strictly in this order: binding
/// messages first, then ordinary commands, then background probes. Within
/// one class the order is FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Binding handshake traffic; the handshake deadlines are short.
    Binding,
    /// Ordinary commands.
    #[default]
    Command,
    /// Background discovery/poll traffic.
    Probe,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_wire_forms() {
        assert_eq!(Verb::I.wire(), " I");
        assert_eq!(Verb::Rq.wire(), "RQ");
        assert_eq!(Verb::Rp.wire(), "RP");
        assert_eq!(Verb::W.wire(), " W");
    }

    #[test]
    fn verb_display_is_trimmed() {
        assert_eq!(Verb::I.to_string(), "I");
        assert_eq!(Verb::W.to_string(), "W");
        assert_eq!(Verb::Rq.to_string(), "RQ");
    }

    #[test]
    fn verb_parse_accepts_padded() {
        assert_eq!(" I".parse::<Verb>().unwrap(), Verb::I);
        assert_eq!("RQ".parse::<Verb>().unwrap(), Verb::Rq);
        assert_eq!(" W".parse::<Verb>().unwrap(), Verb::W);
        assert!("XX".parse::<Verb>().is_err());
    }

    #[test]
    fn verb_reply_discipline() {
        assert_eq!(Verb::Rq.reply_verb(), Some(Verb::Rp));
        assert_eq!(Verb::W.reply_verb(), Some(Verb::I));
        assert_eq!(Verb::I.reply_verb(), None);
        assert_eq!(Verb::Rp.reply_verb(), None);
    }

    #[test]
    fn code_display_and_parse() {
        assert_eq!(Code::BIND.to_string(), "1FC9");
        assert_eq!(Code::DEV_INFO.to_string(), "10E0");
        assert_eq!("1FC9".parse::<Code>().unwrap(), Code::BIND);
        assert_eq!("1fc9".parse::<Code>().unwrap(), Code::BIND);
        assert!("1FC".parse::<Code>().is_err());
        assert!("1FC9A".parse::<Code>().is_err());
        assert!("WXYZ".parse::<Code>().is_err());
    }

    #[test]
    fn code_zero_pads() {
        assert_eq!(Code(0x0008).to_string(), "0008");
    }

    #[test]
    fn device_kind_mapping() {
        assert_eq!(DeviceKind::from_class_tag("01"), DeviceKind::Controller);
        assert_eq!(DeviceKind::from_class_tag("04"), DeviceKind::TrvActuator);
        assert_eq!(DeviceKind::from_class_tag("13"), DeviceKind::BdrSwitch);
        assert_eq!(DeviceKind::from_class_tag("18"), DeviceKind::Gateway);
        assert_eq!(DeviceKind::from_class_tag("32"), DeviceKind::Hvac);
        assert_eq!(DeviceKind::from_class_tag("99"), DeviceKind::Unknown);
        assert_eq!(DeviceKind::from_class_tag("--"), DeviceKind::Unknown);
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Binding < Priority::Command);
        assert!(Priority::Command < Priority::Probe);
        assert_eq!(Priority::default(), Priority::Command);
    }
}
