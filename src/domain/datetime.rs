//! The BLE `date_time` characteristic value.
//!
//! Monitors stamp stored measurements with a plain calendar reading from
//! their onboard clock. The wire format carries no time zone or UTC
//! offset, so the value stays a broken-down local timestamp rather than
//! being promoted to an instant.

use std::fmt;

use crate::error::CodecError;

/// Calendar timestamp as reported by the device clock.
///
/// Construction validates every field, so a held value is always a real
/// calendar date: year 1582..=9999 (the range the SIG characteristic
/// defines), month 1..=12, day bounded by the leap-aware month length,
/// and time-of-day fields in their natural ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DeviceDateTime {
    pub fn new(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Result<Self, CodecError> {
        let reject = |field, value: u16| Err(CodecError::InvalidDateTime { field, value });
        if !(1582..=9999).contains(&year) {
            return reject("year", year);
        }
        if !(1..=12).contains(&month) {
            return reject("month", month as u16);
        }
        if day < 1 || day > days_in_month(year, month) {
            return reject("day", day as u16);
        }
        if hour > 23 {
            return reject("hour", hour as u16);
        }
        if minute > 59 {
            return reject("minute", minute as u16);
        }
        if second > 59 {
            return reject("second", second as u16);
        }
        Ok(Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        })
    }

    /// Appends the 7-byte wire encoding: u16 year little-endian, then
    /// month, day, hour, minute, second.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.year.to_le_bytes());
        buf.extend_from_slice(&[self.month, self.day, self.hour, self.minute, self.second]);
    }
}

impl fmt::Display for DeviceDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 31,
    }
}
