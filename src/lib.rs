//! Async client layer for BLE blood-pressure monitors.
//!
//! The crate turns the callback-driven GATT surface of a platform BLE
//! stack into a small async API: scan for a cuff, connect to it, enable
//! indications on the Blood Pressure Measurement characteristic, and
//! receive decoded readings on a channel. A reconnect loop keeps the
//! session alive across the link drops that cuffs produce every time
//! they power down between readings.
//!
//! ## Modules
//!
//! - [`session`]: the connection state machine and consumer-facing API
//! - [`gatt`]: event bus, command serialization and transport traits
//! - [`domain`]: decoded measurement and timestamp types
//! - [`wire`]: byte-level codec for the SIG field formats
//! - [`sim`]: in-process fake peripheral for tests and demos
//! - [`config`]: persisted settings
//! - [`logging`]: tracing setup

pub mod config;
pub mod domain;
pub mod error;
pub mod gatt;
pub mod logging;
pub mod session;
pub mod sim;
pub mod wire;

pub use config::{ConfigService, SessionConfig};
pub use domain::{BloodPressureMeasurement, DeviceDateTime, MeasurementStatus, PressureUnit};
pub use error::{CodecError, CommandError, SessionError, TransportError, WaitError};
pub use session::{ConnectionState, MonitorEvent, MonitorSession};
