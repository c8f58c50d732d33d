//! GATT Plumbing Module
//!
//! Turns the callback-driven, one-operation-at-a-time GATT transport into
//! awaitable request/response exchanges.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     MonitorSession                      │
//! │        (state machine, drives everything below)         │
//! └──────────────┬─────────────────────────┬────────────────┘
//!                │ serialized commands     │ subscribe/wait
//!                ▼                         ▼
//!        ┌──────────────┐          ┌──────────────┐
//!        │ CommandRunner│          │   EventBus   │
//!        │              │          │              │
//!        │ - one at a   │          │ - broadcast  │
//!        │   time       │          │ - wait_for   │
//!        │ - deadline   │          │ - no lost    │
//!        │   per command│          │   wakeups    │
//!        └──────┬───────┘          └──────▲───────┘
//!               │ initiate                │ publish callbacks
//!               ▼                         │
//!        ┌────────────────────────────────┴───────┐
//!        │        Transport / DeviceLink          │
//!        │   (platform BLE stack or simulator)    │
//!        └────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`event`] - callback event vocabulary ([`GattEvent`] and friends)
//! - [`bus`] - bounded fan-out of events to concurrent waiters
//! - [`commands`] - single-flight command serialization with deadlines
//! - [`transport`] - traits the platform side implements
//! - [`uuids`] - SIG assigned numbers for blood-pressure monitors

pub mod bus;
pub mod commands;
pub mod event;
pub mod transport;
pub mod uuids;

pub use bus::{EventBus, EventPublisher, EventStream};
pub use commands::{CommandContext, CommandRunner, DEFAULT_COMMAND_TIMEOUT};
pub use event::{CharacteristicId, DescriptorId, GattEvent, GattStatus, LinkState};
pub use transport::{Advertisement, DeviceId, DeviceLink, ScanFilter, Transport};
