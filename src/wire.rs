//! Byte-level decoding of BLE SIG characteristic value formats.
//!
//! GATT health-device payloads pack little-endian integers of odd widths,
//! IEEE-11073 medical floats and a 7-byte calendar stamp into one buffer.
//! [`ByteCursor`] walks such a buffer left to right, one field per call,
//! and refuses to read past the end before moving its offset.
//!
//! ```text
//! SFLOAT (2 bytes)              FLOAT (4 bytes)
//! ┌───────────┬────────┐        ┌──────────────────┬──────────┐
//! │ mantissa  │ exp    │        │ mantissa         │ exponent │
//! │ 12 bits   │ 4 bits │        │ 24 bits          │ 8 bits   │
//! └───────────┴────────┘        └──────────────────┴──────────┘
//! value = mantissa × 10^exponent, both fields two's complement
//! ```

use crate::domain::DeviceDateTime;
use crate::error::CodecError;

/// Byte order for multi-byte integer fields.
///
/// BLE SIG payloads are little-endian almost everywhere; the cursor
/// defaults to that and the order only matters for the few vendor
/// formats that disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    LittleEndian,
    BigEndian,
}

/// Sequential reader over one characteristic payload.
///
/// Every successful read advances the offset by exactly the consumed
/// width; a failed read leaves the cursor untouched. There is no seek:
/// wire formats are decoded front to back or not at all.
#[derive(Debug)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    offset: usize,
    order: ByteOrder,
}

impl<'a> ByteCursor<'a> {
    /// Little-endian cursor over `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_order(buf, ByteOrder::LittleEndian)
    }

    pub fn with_order(buf: &'a [u8], order: ByteOrder) -> Self {
        Self {
            buf,
            offset: 0,
            order,
        }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Bounds-checks the next `width` bytes without consuming them.
    fn peek(&self, width: usize) -> Result<&'a [u8], CodecError> {
        if self.offset + width > self.buf.len() {
            return Err(CodecError::BufferUnderrun {
                offset: self.offset,
                needed: width,
                len: self.buf.len(),
            });
        }
        Ok(&self.buf[self.offset..self.offset + width])
    }

    /// Commits a read whose bounds (and any field validation) have
    /// already been accepted. This is the only place the offset moves,
    /// so a failed read can never leave the cursor half-advanced.
    fn advance(&mut self, width: usize) {
        self.offset += width;
    }

    /// Checks the bound, then consumes `width` bytes.
    fn take(&mut self, width: usize) -> Result<&'a [u8], CodecError> {
        let bytes = self.peek(width)?;
        self.advance(width);
        Ok(bytes)
    }

    /// Reads `width` bytes as an unsigned integer in the cursor's order.
    fn read_uint(&mut self, width: usize) -> Result<u32, CodecError> {
        let bytes = self.take(width)?;
        let mut value: u32 = 0;
        match self.order {
            ByteOrder::LittleEndian => {
                for (i, b) in bytes.iter().enumerate() {
                    value |= (*b as u32) << (8 * i);
                }
            }
            ByteOrder::BigEndian => {
                for b in bytes {
                    value = (value << 8) | *b as u32;
                }
            }
        }
        Ok(value)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_uint(1)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(self.read_uint(2)? as u16)
    }

    pub fn read_u24(&mut self) -> Result<u32, CodecError> {
        self.read_uint(3)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.read_uint(4)
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(self.read_u16()? as i16)
    }

    /// 24-bit signed integer, sign-extended from bit 23.
    pub fn read_i24(&mut self) -> Result<i32, CodecError> {
        Ok(sign_extend(self.read_u24()?, 24))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.read_u32()? as i32)
    }

    /// IEEE-11073 16-bit SFLOAT: 12-bit mantissa, 4-bit base-10 exponent,
    /// both two's complement.
    ///
    /// Reserved encodings (NaN, ±infinity, NRes) are not special-cased;
    /// they come out of the same formula as plain numbers.
    pub fn read_sfloat(&mut self) -> Result<f32, CodecError> {
        let raw = self.read_u16()?;
        let mantissa = sign_extend((raw & 0x0FFF) as u32, 12);
        let exponent = sign_extend((raw >> 12) as u32, 4);
        Ok(mantissa as f32 * 10f32.powi(exponent))
    }

    /// IEEE-11073 32-bit FLOAT: 24-bit mantissa, signed 8-bit base-10
    /// exponent in the top byte.
    pub fn read_float(&mut self) -> Result<f32, CodecError> {
        let raw = self.read_u32()?;
        let mantissa = sign_extend(raw & 0x00FF_FFFF, 24);
        let exponent = (raw >> 24) as u8 as i8;
        Ok(mantissa as f32 * 10f32.powi(exponent as i32))
    }

    /// BLE date_time characteristic field: u16 year then u8 month, day,
    /// hour, minute, second. Always little-endian, whatever order the
    /// cursor was built with.
    ///
    /// Out-of-range fields fail with `InvalidDateTime` rather than
    /// rolling over the way a lenient calendar would, and the seven
    /// bytes stay unconsumed.
    pub fn read_date_time(&mut self) -> Result<DeviceDateTime, CodecError> {
        let bytes = self.peek(7)?;
        let year = u16::from_le_bytes([bytes[0], bytes[1]]);
        let value = DeviceDateTime::new(year, bytes[2], bytes[3], bytes[4], bytes[5], bytes[6])?;
        self.advance(7);
        Ok(value)
    }
}

/// Two's-complement sign extension from `width` bits: subtract 2^width
/// when the width-bit MSB is set.
fn sign_extend(value: u32, width: u32) -> i32 {
    debug_assert!(width < 32);
    if value & (1 << (width - 1)) != 0 {
        (value as i64 - (1i64 << width)) as i32
    } else {
        value as i32
    }
}

// Encoding helpers. The library itself only decodes; these exist so the
// simulated peripheral and the round-trip tests can build payloads that
// are bit-exact with what a real monitor sends.

pub fn put_u8(buf: &mut Vec<u8>, value: u8) {
    buf.push(value);
}

pub fn put_u16_le(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Encodes `value` as an SFLOAT, preferring the largest exponent that
/// keeps the mantissa integral. Values outside the representable range
/// saturate at the mantissa bounds.
pub fn put_sfloat(buf: &mut Vec<u8>, value: f32) {
    let mut mantissa = value;
    let mut exponent: i32 = 0;
    while mantissa.fract().abs() > 1e-4 && mantissa.abs() < 204.7 && exponent > -8 {
        mantissa *= 10.0;
        exponent -= 1;
    }
    while mantissa.abs() > 2047.0 && exponent < 7 {
        mantissa /= 10.0;
        exponent += 1;
    }
    let m = (mantissa.round() as i32).clamp(-2048, 2047);
    let raw = ((exponent as u16) << 12) | (m as u16 & 0x0FFF);
    put_u16_le(buf, raw);
}
