//! Error types for sphygmo, one enum per layer.
//!
//! Decode problems stay local (a bad notification is dropped, the link
//! survives), command timeouts are surfaced to the session which owns the
//! retry policy, and transport-level failures funnel into the reconnect
//! loop instead of reaching the consumer as faults.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Wire-level decode failure. Recoverable: the offending payload is
/// discarded and the session keeps running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A read would run past the end of the payload. The cursor is left
    /// untouched, so no partially consumed value can leak out.
    #[error("buffer underrun: need {needed} byte(s) at offset {offset}, payload holds {len}")]
    BufferUnderrun {
        offset: usize,
        needed: usize,
        len: usize,
    },

    /// A date-time field is outside its calendar range.
    #[error("invalid date-time: {field} = {value}")]
    InvalidDateTime { field: &'static str, value: u16 },
}

/// Failure while waiting on the event bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// No matching event arrived within the deadline.
    #[error("no matching event within {timeout:?}")]
    Timeout { timeout: Duration },

    /// The subscription fell behind and the bus dropped its oldest
    /// events. Reading continues from the oldest retained event.
    #[error("event stream lagged, {skipped} event(s) dropped")]
    Lagged { skipped: u64 },

    /// All publishers are gone; no further events can arrive.
    #[error("event bus closed")]
    Closed,
}

/// Failure of one serialized GATT command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The command did not complete within its deadline. The serializer
    /// lock has already been released; retrying is the caller's call.
    #[error("timed out after {timeout:?} on BLE call: {label}")]
    Timeout { label: String, timeout: Duration },

    /// The transport rejected the initiating call.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The event bus failed underneath the command.
    #[error(transparent)]
    Bus(#[from] WaitError),
}

/// Failure reported by a [`Transport`](crate::gatt::Transport)
/// implementation when *initiating* an operation. Outcomes of accepted
/// operations arrive later as [`GattEvent`](crate::gatt::GattEvent)s.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The platform adapter is missing or powered off.
    #[error("bluetooth adapter unavailable")]
    AdapterUnavailable,

    /// The scan could not be started.
    #[error("scan could not be started")]
    ScanFailed,

    /// The requested peer is unknown to the transport.
    #[error("device {0} not known to the transport")]
    DeviceNotFound(String),

    /// An operation was issued on a link that is not connected.
    #[error("link is not connected")]
    NotConnected,

    /// Service discovery has not produced this characteristic.
    #[error("characteristic {0} not present on the device")]
    CharacteristicNotFound(Uuid),

    /// The characteristic does not carry this descriptor.
    #[error("descriptor {0} not present on the characteristic")]
    DescriptorNotFound(Uuid),

    /// Anything else the platform stack reports.
    #[error("platform error: {0}")]
    Platform(String),
}

/// Session-level failure handed to the consumer of
/// [`MonitorSession`](crate::session::MonitorSession).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// An operation was attempted on a closed or never-opened device
    /// link. This is a programming error and fails fast.
    #[error("device link is closed or was never opened")]
    LinkInvalid,

    /// `connect_device` was called before any scan result arrived.
    #[error("no device discovered yet; start a scan first")]
    NoDeviceDiscovered,

    /// The peer answered an operation with a non-success GATT status.
    #[error("GATT error {code} during {operation}")]
    Gatt { operation: &'static str, code: u8 },

    /// The link dropped while an operation was awaiting its outcome.
    #[error("link dropped while {operation}")]
    Disconnected { operation: &'static str },

    /// A serialized command failed or timed out.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// A direct (unserialized) transport call failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_error_display() {
        let err = CodecError::BufferUnderrun {
            offset: 7,
            needed: 2,
            len: 8,
        };
        assert_eq!(
            err.to_string(),
            "buffer underrun: need 2 byte(s) at offset 7, payload holds 8"
        );

        let err = CodecError::InvalidDateTime {
            field: "month",
            value: 13,
        };
        assert_eq!(err.to_string(), "invalid date-time: month = 13");
    }

    #[test]
    fn command_timeout_display_names_the_label() {
        let err = CommandError::Timeout {
            label: "discover services".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(
            err.to_string(),
            "timed out after 5s on BLE call: discover services"
        );
    }

    #[test]
    fn transport_error_converts_into_command_error() {
        let err: CommandError = TransportError::NotConnected.into();
        assert!(matches!(
            err,
            CommandError::Transport(TransportError::NotConnected)
        ));
    }

    #[test]
    fn session_error_wraps_command_error() {
        let err: SessionError = CommandError::Bus(WaitError::Closed).into();
        assert_eq!(err.to_string(), "event bus closed");
    }
}
