//! Device classification from `10E0` identity payloads.
//!
//! HVAC devices share a handful of address class tags, so the tag alone
//! cannot distinguish a remote from a fan from a CO2 sensor. The `10E0`
//! identity block carries what the tag does not: manufacturer, product,
//! the one-byte oem vendor code, a firmware date, and an ASCII model
//! string. A static signature table assigns the finer device class.
//!
//! The binding FSM reads the oem code from here: its presence in a tender
//! governs the `<oem> 10E0 <src>` advertisement triplet. A device that
//! has never sent a `10E0` defaults to oem code `00`.
//!
//! # Payload layout
//!
//! ```text
//! byte  0      idx (00)
//! bytes 1..10  signature: group(2) sub(1) product(1) sw(1) unk(1) oem(1) unk(2)
//! bytes 10..14 reserved
//! byte  14     firmware day
//! byte  15     firmware month
//! bytes 16..18 firmware year (big-endian)
//! bytes 18..   ASCII model string, NUL-padded
//! ```

use chrono::NaiveDate;
use tracing::debug;

use ramses_core::error::{Error, Result};

use crate::frame::bytes_to_hex;

/// The oem code assumed for devices with no received `10E0`.
pub const DEFAULT_OEM_CODE: u8 = 0x00;

/// Fine device class, resolved from a `10E0` signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// Evohome controller.
    Ctl,
    /// Underfloor heating hub.
    Ufc,
    /// Radiator valve actuator.
    Trv,
    /// OpenTherm bridge.
    Otb,
    /// Internet gateway (RFG100 and kin).
    Rfg,
    /// Round thermostat.
    Rnd,
    /// Ventilation unit (CVE/HRU/PIV).
    Fan,
    /// Ventilation remote.
    Rem,
    /// Ventilation display remote.
    Dis,
    /// CO2 sensor.
    Co2,
    /// Humidity sensor.
    Hum,
    /// spIDer RF gateway.
    Rfs,
    /// Signature not in the table.
    Unknown,
}

/// A parsed `10E0` identity block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFingerprint {
    /// The 9-byte signature as 18 uppercase hex chars.
    pub signature: String,
    /// Manufacturer group (bytes 0-1 of the signature; `0001` for the
    /// Airios platform vendors).
    pub manufacturer_group: u16,
    /// Manufacturer sub id (e.g. `C8`).
    pub manufacturer_sub: u8,
    /// Product id within the manufacturer.
    pub product_id: u8,
    /// The oem vendor code (7th signature byte; `66` Vasco, `67` Orcon,
    /// `6C` Nuaire).
    pub oem_code: u8,
    /// Firmware date, when the block carries a plausible one.
    pub firmware_date: Option<NaiveDate>,
    /// Model string with trailing NULs stripped.
    pub model: String,
    /// Class assigned by the signature table.
    pub class: DeviceClass,
}

impl DeviceFingerprint {
    /// Parse a `10E0` payload.
    ///
    /// Requires at least the fixed 18-byte prefix; everything after it is
    /// the model string.
    pub fn from_payload(payload: &[u8]) -> Result<DeviceFingerprint> {
        if payload.len() < 18 {
            return Err(Error::Malformed(format!(
                "10E0 payload too short: {} bytes",
                payload.len()
            )));
        }

        let signature = bytes_to_hex(&payload[1..10]);
        let class = match lookup_class(&signature) {
            Some(class) => class,
            None => {
                debug!(%signature, "10E0 signature not in table");
                DeviceClass::Unknown
            }
        };

        let day = payload[14];
        let month = payload[15];
        let year = u16::from_be_bytes([payload[16], payload[17]]);
        let firmware_date =
            NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day));

        let model = payload[18..]
            .iter()
            .take_while(|&&b| b != 0x00)
            .map(|&b| char::from(b))
            .collect::<String>()
            .trim_end()
            .to_string();

        Ok(DeviceFingerprint {
            signature,
            manufacturer_group: u16::from_be_bytes([payload[1], payload[2]]),
            manufacturer_sub: payload[3],
            product_id: payload[4],
            oem_code: payload[7],
            firmware_date,
            model,
            class,
        })
    }
}

/// Look up the device class for a `10E0` signature.
///
/// A curated table of observed identity blocks: the Honeywell heating
/// range plus the Airios-platform HVAC families (Vasco, ClimaRad, Orcon,
/// Nuaire, Itho) this runtime binds against.
pub fn lookup_class(signature: &str) -> Option<DeviceClass> {
    let class = match signature {
        // Heating...
        "0002FF0119FFFFFFFF" => DeviceClass::Ctl, // EvoTouch Colour
        "0002FF0163FFFFFFFF" => DeviceClass::Ctl, // Evo Color
        "0003FF0203FFFF0001" => DeviceClass::Ufc, // HCE80 V3.10
        "0002FF0412FFFFFFFF" => DeviceClass::Trv, // HR92 Radiator Ctrl.
        "0002FF050BFFFFFFFF" => DeviceClass::Trv, // HR91 Radiator Ctrl.
        "0001C8810B0700FEFF" => DeviceClass::Otb, // R8820
        "0002FF0A0CFFFFFFFF" => DeviceClass::Otb, // R8810A Bridge
        "0002FF1E01FFFFFFFF" => DeviceClass::Rfg, // Internet Gateway
        "0001C8380A0100F1FF" => DeviceClass::Rnd, // T87RF2025 Round
        // Vasco gateway (CTL-like bridge)
        "0001C848260066FEFE" => DeviceClass::Ctl, // BRDG-02EM23
        // FAN: CVE/HRU extraction and heat-recovery units
        "0001001B221201FEFF" => DeviceClass::Fan, // CVE-RF
        "0001001B271501FEFF" => DeviceClass::Fan, // CVE-RF
        "0001001B2E1901FEFF" => DeviceClass::Fan, // CVE-RF
        "0001001B381B01FEFF" => DeviceClass::Fan, // CVE-RF
        "0001C8830C0A65FEFF" => DeviceClass::Fan, // ClimaRad VenturaV1x
        "0001C81D150765FFFF" => DeviceClass::Fan, // ClimaRad MiniBox
        "0001C81C090466FEFF" => DeviceClass::Fan, // Vasco VMC-17RP01
        "0001C83A190F66FFFF" => DeviceClass::Fan, // Vasco D60
        "0001C8260A0367FFFF" => DeviceClass::Fan, // Orcon VMC-15RP01
        "0001C85F0E0267FFFF" => DeviceClass::Fan, // Orcon MVS-15
        "0001C87D130D67FEFF" => DeviceClass::Fan, // Orcon HRC-300-EcoMax
        "0001C895050567FEFF" => DeviceClass::Fan, // Orcon VMD-15RMS86
        // PIV (Nuaire DriMaster)
        "0001C90011006CFEFF" => DeviceClass::Fan, // BRDG-02JAS01
        "0001C9001D006CFEFE" => DeviceClass::Fan, // BRDG-02JAS01
        // CO2 sensors
        "00010028080101FEFF" => DeviceClass::Co2, // VMS-12C39
        "0001C822030166FEFF" => DeviceClass::Co2, // Vasco VMS-17C01
        "0001C8500B0167FEFF" => DeviceClass::Co2, // Orcon VMS-15C16
        "0001C85701016CFFFF" => DeviceClass::Co2, // Nuaire VMS-23C33
        "0001C88D020167FEFF" => DeviceClass::Co2, // Orcon VMI-15MC01 (sensor fw)
        // Humidity sensors
        "0001C825050266FFFF" => DeviceClass::Hum, // VMS-17HB01
        "0001C85802016CFFFF" => DeviceClass::Hum, // Nuaire VMS-23HB33
        // Remotes
        "0001C827050167FFFF" => DeviceClass::Rem, // Orcon VMN-15LF01
        "0001C827090167FFFF" => DeviceClass::Rem, // Orcon VMN-15LF01
        "0001C8400F0166FFFF" => DeviceClass::Rem, // Vasco VMN-17LMP01 4-way
        "0001C85901016CFFFF" => DeviceClass::Rem, // Nuaire VMN-23LMH23
        "0001C85A01016CFFFF" => DeviceClass::Rem, // Nuaire VMN-23LMH23
        "0001C88D030167FEFF" => DeviceClass::Rem, // Orcon VMI-15MC01 (with CO2)
        // Display remotes
        "0001C894030167FFFF" => DeviceClass::Dis, // Orcon VMI-15WSJ53
        // spIDer gateways
        "000100220B0001FEFF" => DeviceClass::Rfs, // Itho CCU-12T20
        "00010022340001FEFF" => DeviceClass::Rfs, // Itho CCU-12T20
        _ => return None,
    };
    Some(class)
}
