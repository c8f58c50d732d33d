//! Callback events emitted by the transport layer.
//!
//! Every asynchronous GATT outcome crosses from the platform side into
//! this crate as one [`GattEvent`]. Events are immutable once published
//! and cheap to clone, so they can fan out to any number of waiters.

use uuid::Uuid;

/// Outcome code attached to a GATT operation callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    /// Raw ATT error code as reported by the stack.
    Error(u8),
}

impl GattStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, GattStatus::Success)
    }
}

impl From<u8> for GattStatus {
    fn from(code: u8) -> Self {
        if code == 0 {
            GattStatus::Success
        } else {
            GattStatus::Error(code)
        }
    }
}

/// Physical link state reported alongside connection callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Identifies one characteristic inside a service on the connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicId {
    pub service: Uuid,
    pub uuid: Uuid,
}

/// Identifies one descriptor attached to a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId {
    pub characteristic: CharacteristicId,
    pub uuid: Uuid,
}

/// One transport callback, fanned out through the event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum GattEvent {
    /// The link came up or went down. `status` tells success from stack
    /// failure; `new_state` is the resulting link state either way.
    ConnectionStateChanged {
        status: GattStatus,
        new_state: LinkState,
    },
    /// Service discovery finished.
    ServicesDiscovered { status: GattStatus },
    /// A characteristic read completed, carrying the value on success.
    CharacteristicRead {
        characteristic: CharacteristicId,
        status: GattStatus,
        value: Vec<u8>,
    },
    /// A descriptor write completed.
    DescriptorWritten {
        descriptor: DescriptorId,
        status: GattStatus,
    },
    /// The device pushed a notification or indication.
    CharacteristicChanged {
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn att_code_zero_is_success() {
        assert!(GattStatus::from(0).is_success());
        assert_eq!(GattStatus::from(133), GattStatus::Error(133));
        assert!(!GattStatus::from(133).is_success());
    }
}
