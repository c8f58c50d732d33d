//! Blood Pressure Measurement characteristic (0x2A35) decoding.
//!
//! # Payload structure
//!
//! ```text
//! [0]     : Flags (u8)
//!           bit 0: unit (1 = mmHg, 0 = kPa)
//!           bit 1: timestamp field present
//!           bit 2: pulse-rate field present
//!           bit 3: user-id field present
//!           bit 4: measurement-status field present
//! [1-2]   : Systolic (SFLOAT)
//! [3-4]   : Diastolic (SFLOAT)
//! [5-6]   : Mean arterial pressure (SFLOAT)
//! then, each only when its flag bit is set, in this order:
//!         : Timestamp (7-byte date_time)
//!         : Pulse rate (SFLOAT)
//!         : User ID (u8)
//!         : Measurement status (u16)
//! ```
//!
//! Decoding is all-or-nothing: a truncated payload yields an error and
//! never a partially filled measurement.

use bitflags::bitflags;

use crate::domain::datetime::DeviceDateTime;
use crate::error::CodecError;
use crate::wire::{self, ByteCursor};

bitflags! {
    /// Flags byte of the measurement payload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MeasurementFlags: u8 {
        const UNIT_MMHG = 1 << 0;
        const TIMESTAMP = 1 << 1;
        const PULSE_RATE = 1 << 2;
        const USER_ID = 1 << 3;
        const STATUS = 1 << 4;
    }
}

bitflags! {
    /// Measurement-status bitfield appended by cuffs that grade their own
    /// reading quality.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MeasurementStatus: u16 {
        const BODY_MOVEMENT = 0x0001;
        const CUFF_TOO_LOOSE = 0x0002;
        const IRREGULAR_PULSE = 0x0004;
        const PULSE_RATE_OUT_OF_RANGE = 0x0008;
        const IMPROPER_POSITION = 0x0020;
    }
}

/// Pressure unit selected by flags bit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureUnit {
    Mmhg,
    Kpa,
}

/// One decoded blood-pressure reading.
///
/// A value type created per successfully decoded notification; fields not
/// signalled by the flags byte are `None`, never zero.
#[derive(Debug, Clone, PartialEq)]
pub struct BloodPressureMeasurement {
    pub systolic: f32,
    pub diastolic: f32,
    pub mean_arterial_pressure: f32,
    pub unit: PressureUnit,
    pub timestamp: Option<DeviceDateTime>,
    pub pulse_rate: Option<f32>,
    pub user_id: Option<u8>,
    pub status: Option<MeasurementStatus>,
}

impl BloodPressureMeasurement {
    pub fn from_bytes(value: &[u8]) -> Result<Self, CodecError> {
        let mut cur = ByteCursor::new(value);
        let flags = MeasurementFlags::from_bits_retain(cur.read_u8()?);

        let unit = if flags.contains(MeasurementFlags::UNIT_MMHG) {
            PressureUnit::Mmhg
        } else {
            PressureUnit::Kpa
        };

        let systolic = cur.read_sfloat()?;
        let diastolic = cur.read_sfloat()?;
        let mean_arterial_pressure = cur.read_sfloat()?;

        let timestamp = if flags.contains(MeasurementFlags::TIMESTAMP) {
            Some(cur.read_date_time()?)
        } else {
            None
        };
        let pulse_rate = if flags.contains(MeasurementFlags::PULSE_RATE) {
            Some(cur.read_sfloat()?)
        } else {
            None
        };
        let user_id = if flags.contains(MeasurementFlags::USER_ID) {
            Some(cur.read_u8()?)
        } else {
            None
        };
        let status = if flags.contains(MeasurementFlags::STATUS) {
            Some(MeasurementStatus::from_bits_retain(cur.read_u16()?))
        } else {
            None
        };

        Ok(Self {
            systolic,
            diastolic,
            mean_arterial_pressure,
            unit,
            timestamp,
            pulse_rate,
            user_id,
            status,
        })
    }

    /// Inverse of [`from_bytes`](Self::from_bytes); lets the simulated
    /// monitor and the tests build payloads that match real cuff output.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut flags = MeasurementFlags::empty();
        if self.unit == PressureUnit::Mmhg {
            flags |= MeasurementFlags::UNIT_MMHG;
        }
        if self.timestamp.is_some() {
            flags |= MeasurementFlags::TIMESTAMP;
        }
        if self.pulse_rate.is_some() {
            flags |= MeasurementFlags::PULSE_RATE;
        }
        if self.user_id.is_some() {
            flags |= MeasurementFlags::USER_ID;
        }
        if self.status.is_some() {
            flags |= MeasurementFlags::STATUS;
        }

        let mut buf = Vec::with_capacity(19);
        wire::put_u8(&mut buf, flags.bits());
        wire::put_sfloat(&mut buf, self.systolic);
        wire::put_sfloat(&mut buf, self.diastolic);
        wire::put_sfloat(&mut buf, self.mean_arterial_pressure);
        if let Some(dt) = self.timestamp {
            dt.write_to(&mut buf);
        }
        if let Some(pulse) = self.pulse_rate {
            wire::put_sfloat(&mut buf, pulse);
        }
        if let Some(user) = self.user_id {
            wire::put_u8(&mut buf, user);
        }
        if let Some(status) = self.status {
            wire::put_u16_le(&mut buf, status.bits());
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_payload_decodes_every_field() {
        // flags 0x07: mmHg, timestamp, pulse rate
        let bytes = [
            0x07, //
            0x78, 0x00, // systolic 120
            0x50, 0x00, // diastolic 80
            0x5D, 0x00, // MAP 93
            0xE7, 0x07, 8, 22, 14, 30, 45, // 2023-08-22 14:30:45
            0x48, 0x00, // pulse 72
        ];
        let m = BloodPressureMeasurement::from_bytes(&bytes).unwrap();
        assert_eq!(m.unit, PressureUnit::Mmhg);
        assert_eq!(m.systolic, 120.0);
        assert_eq!(m.diastolic, 80.0);
        assert_eq!(m.mean_arterial_pressure, 93.0);
        assert_eq!(
            m.timestamp,
            Some(DeviceDateTime::new(2023, 8, 22, 14, 30, 45).unwrap())
        );
        assert_eq!(m.pulse_rate, Some(72.0));
        assert_eq!(m.user_id, None);
        assert_eq!(m.status, None);
    }

    #[test]
    fn minimal_payload_leaves_optional_fields_absent() {
        let bytes = [0x00, 0x78, 0x00, 0x50, 0x00, 0x5D, 0x00];
        let m = BloodPressureMeasurement::from_bytes(&bytes).unwrap();
        assert_eq!(m.unit, PressureUnit::Kpa);
        assert_eq!(m.timestamp, None);
        assert_eq!(m.pulse_rate, None);
        assert_eq!(m.user_id, None);
        assert_eq!(m.status, None);
    }

    #[test]
    fn scaled_mantissa_decodes_to_decimal_pressure() {
        // systolic mantissa 1200 with exponent -1 is 120.0
        let bytes = [0x00, 0xB0, 0xF4, 0x50, 0x00, 0x5D, 0x00];
        let m = BloodPressureMeasurement::from_bytes(&bytes).unwrap();
        assert_eq!(m.systolic, 120.0);
    }

    #[test]
    fn user_id_and_status_decode_when_flagged() {
        let bytes = [
            0x1F, //
            0x78, 0x00, 0x50, 0x00, 0x5D, 0x00, //
            0xE7, 0x07, 8, 22, 14, 30, 45, //
            0x48, 0x00, //
            0x03, // user 3
            0x21, 0x00, // body movement + improper position
        ];
        let m = BloodPressureMeasurement::from_bytes(&bytes).unwrap();
        assert_eq!(m.user_id, Some(3));
        let status = m.status.unwrap();
        assert!(status.contains(MeasurementStatus::BODY_MOVEMENT));
        assert!(status.contains(MeasurementStatus::IMPROPER_POSITION));
        assert!(!status.contains(MeasurementStatus::CUFF_TOO_LOOSE));
    }

    #[test]
    fn truncated_payload_never_yields_partial_measurement() {
        // flags promise a timestamp that is not there
        let bytes = [0x02, 0x78, 0x00, 0x50, 0x00, 0x5D, 0x00];
        assert!(matches!(
            BloodPressureMeasurement::from_bytes(&bytes),
            Err(CodecError::BufferUnderrun { .. })
        ));
        // cut inside the mandatory triple
        assert!(BloodPressureMeasurement::from_bytes(&[0x00, 0x78]).is_err());
        assert!(BloodPressureMeasurement::from_bytes(&[]).is_err());
    }

    #[test]
    fn invalid_timestamp_fails_the_whole_decode() {
        let bytes = [
            0x02, 0x78, 0x00, 0x50, 0x00, 0x5D, 0x00, 0xE7, 0x07, 13, 22, 14, 30, 45,
        ];
        assert_eq!(
            BloodPressureMeasurement::from_bytes(&bytes),
            Err(CodecError::InvalidDateTime {
                field: "month",
                value: 13
            })
        );
    }

    #[test]
    fn encoding_round_trips_a_full_reading() {
        let original = BloodPressureMeasurement {
            systolic: 118.5,
            diastolic: 77.0,
            mean_arterial_pressure: 90.8,
            unit: PressureUnit::Mmhg,
            timestamp: Some(DeviceDateTime::new(2026, 8, 22, 9, 15, 0).unwrap()),
            pulse_rate: Some(68.0),
            user_id: Some(1),
            status: Some(MeasurementStatus::IRREGULAR_PULSE),
        };
        let decoded = BloodPressureMeasurement::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(decoded, original);
    }
}
