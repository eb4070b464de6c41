//! RAMSES device addressing.
//!
//! Every device on the 868 MHz bus is identified by a 9-character id of the
//! form `TT:NNNNNN`, where `TT` is the two-digit device class (`01`
//! controller, `04` TRV, `18` gateway, `29`/`32`/`37` HVAC, ...) and
//! `NNNNNN` is a six-digit decimal serial in `0..=262142`. Two sentinels
//! complete the grammar: `63:262142` is the broadcast/null source and
//! `--:------` marks an absent address slot.
//!
//! On the wire inside `1FC9` binding triplets the same id is packed into
//! three bytes as `(class << 18) | serial`, so `29:091138` becomes
//! `756402`.
//!
//! # Example
//!
//! ```
//! use ramses_core::Address;
//!
//! let rem: Address = "29:091138".parse().unwrap();
//! assert_eq!(rem.class_tag(), "29");
//! assert_eq!(rem.to_hex(), "756402");
//! assert_eq!(Address::from_hex("756402").unwrap(), rem);
//! ```

use std::fmt;
use std::str::FromStr;

use crate::types::DeviceKind;

/// Largest serial number an address can carry (`63:262142` is broadcast).
const MAX_SERIAL: u32 = 262_142;

/// A RAMSES device address in canonical `TT:NNNNNN` form.
///
/// The inner string is guaranteed canonical: either a validated
/// `TT:NNNNNN` id or the null slot `--:------`. Equality is string
/// equality.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address {
    id: String,
}

impl Address {
    /// The null address, used for absent slots: `--:------`.
    pub const NULL_ID: &'static str = "--:------";

    /// The broadcast/null-source address: `63:262142`.
    pub const ALL_ID: &'static str = "63:262142";

    /// The conventional gateway (HGI80/evofw3) sentinel id.
    ///
    /// Commands built without an explicit source get this placeholder; the
    /// engine substitutes its own gateway id before transmission.
    pub const HGI_ID: &'static str = "18:000730";

    /// Returns the null address (`--:------`).
    pub fn none() -> Self {
        Address {
            id: Self::NULL_ID.to_string(),
        }
    }

    /// Returns the broadcast address (`63:262142`).
    pub fn all() -> Self {
        Address {
            id: Self::ALL_ID.to_string(),
        }
    }

    /// Returns the gateway sentinel address (`18:000730`).
    pub fn hgi() -> Self {
        Address {
            id: Self::HGI_ID.to_string(),
        }
    }

    /// Parse an address from its canonical string form.
    ///
    /// Accepts `TT:NNNNNN` (decimal, serial in `0..=262142`) and the null
    /// slot `--:------`. Anything else is rejected.
    pub fn parse(s: &str) -> std::result::Result<Self, ParseAddressError> {
        if s == Self::NULL_ID {
            return Ok(Self::none());
        }

        let bytes = s.as_bytes();
        if bytes.len() != 9 || bytes[2] != b':' {
            return Err(ParseAddressError(s.to_string()));
        }
        if !bytes[..2].iter().all(u8::is_ascii_digit)
            || !bytes[3..].iter().all(u8::is_ascii_digit)
        {
            return Err(ParseAddressError(s.to_string()));
        }

        let serial: u32 = s[3..].parse().map_err(|_| ParseAddressError(s.to_string()))?;
        if serial > MAX_SERIAL {
            return Err(ParseAddressError(s.to_string()));
        }

        Ok(Address { id: s.to_string() })
    }

    /// Parse an address from its 3-byte packed hex form (`756402`).
    ///
    /// The packing is `(class << 18) | serial`. The all-ones null packing
    /// `7FFFFF` maps back to `--:------`.
    pub fn from_hex(hex: &str) -> std::result::Result<Self, ParseAddressError> {
        if hex.len() != 6 {
            return Err(ParseAddressError(hex.to_string()));
        }
        if hex.eq_ignore_ascii_case("7FFFFF") {
            return Ok(Self::none());
        }
        let packed = u32::from_str_radix(hex, 16).map_err(|_| ParseAddressError(hex.to_string()))?;
        let class = packed >> 18;
        let serial = packed & 0x3FFFF;
        Self::parse(&format!("{class:02}:{serial:06}"))
    }

    /// The canonical string id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The two-character device class tag (`"29"`), or `"--"` for the
    /// null address.
    pub fn class_tag(&self) -> &str {
        &self.id[..2]
    }

    /// The coarse device kind implied by the class tag.
    ///
    /// HVAC class tags are ambiguous between REM/FAN/CO2/... at this
    /// level; `10E0` fingerprints resolve them.
    pub fn kind(&self) -> DeviceKind {
        DeviceKind::from_class_tag(self.class_tag())
    }

    /// Returns `true` for the absent-slot address `--:------`.
    pub fn is_null(&self) -> bool {
        self.id == Self::NULL_ID
    }

    /// Returns `true` for the broadcast address `63:262142`.
    pub fn is_broadcast(&self) -> bool {
        self.id == Self::ALL_ID
    }

    /// The 3-byte packed hex form used in `1FC9` binding triplets.
    ///
    /// The null address packs to `7FFFFF` (all ones below the class bits).
    pub fn to_hex(&self) -> String {
        if self.is_null() {
            return "7FFFFF".to_string();
        }
        let class: u32 = self.id[..2].parse().expect("canonical address");
        let serial: u32 = self.id[3..].parse().expect("canonical address");
        format!("{:06X}", (class << 18) | serial)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.id)
    }
}

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Error returned when a string cannot be parsed into an [`Address`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAddressError(String);

impl fmt::Display for ParseAddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid device address: '{}'", self.0)
    }
}

impl std::error::Error for ParseAddressError {}
