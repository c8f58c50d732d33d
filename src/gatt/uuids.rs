//! Bluetooth SIG assigned numbers used by blood-pressure monitors.
//!
//! 16-bit SIG identifiers expand into the 128-bit base UUID
//! `0000xxxx-0000-1000-8000-00805f9b34fb`.

use uuid::Uuid;

const SIG_BASE: u128 = 0x00000000_0000_1000_8000_00805F9B34FB;

/// Expands a 16-bit SIG assigned number to its full 128-bit UUID.
pub const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(SIG_BASE | (short as u128) << 96)
}

/// Blood Pressure service (0x1810).
pub const BLOOD_PRESSURE_SERVICE: Uuid = sig_uuid(0x1810);

/// Blood Pressure Measurement characteristic (0x2A35), indications only.
pub const BLOOD_PRESSURE_MEASUREMENT: Uuid = sig_uuid(0x2A35);

/// Client Characteristic Configuration descriptor (0x2902).
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = sig_uuid(0x2902);

/// Device Information service (0x180A).
pub const DEVICE_INFORMATION_SERVICE: Uuid = sig_uuid(0x180A);

/// Manufacturer Name String characteristic (0x2A29).
pub const MANUFACTURER_NAME: Uuid = sig_uuid(0x2A29);

/// CCC descriptor value that turns on indications.
pub const ENABLE_INDICATION: [u8; 2] = [0x02, 0x00];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sig_expansion_matches_assigned_numbers() {
        assert_eq!(
            BLOOD_PRESSURE_SERVICE,
            Uuid::parse_str("00001810-0000-1000-8000-00805f9b34fb").unwrap()
        );
        assert_eq!(
            BLOOD_PRESSURE_MEASUREMENT,
            Uuid::parse_str("00002a35-0000-1000-8000-00805f9b34fb").unwrap()
        );
        assert_eq!(
            CLIENT_CHARACTERISTIC_CONFIGURATION,
            Uuid::parse_str("00002902-0000-1000-8000-00805f9b34fb").unwrap()
        );
    }
}
