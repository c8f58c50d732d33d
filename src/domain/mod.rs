//! Typed values decoded from monitor payloads.
//!
//! ## Modules
//!
//! - [`measurement`] - Blood Pressure Measurement characteristic decoding
//! - [`datetime`] - the 7-byte `date_time` calendar value

pub mod datetime;
pub mod measurement;

pub use datetime::DeviceDateTime;
pub use measurement::{
    BloodPressureMeasurement, MeasurementFlags, MeasurementStatus, PressureUnit,
};
