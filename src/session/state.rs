//! Connection lifecycle states.
//!
//! ```text
//! Idle ──start_scan──▶ Scanning ──connect_device──▶ Connecting
//!                                                       │
//!                          ┌────────────────────────────┘
//!                          ▼
//!                     Discovering ──▶ EnablingNotifications ──▶ Connected
//!                                                                  │
//!               Reconnecting ◀── Disconnected ◀────── link drop ───┘
//!                     │
//!                     └──────▶ Connecting (attempt loop)
//! ```
//!
//! Setup failures fall back to `Disconnected`; `close()` returns the
//! session to `Idle` from anywhere.

use std::fmt;

/// Where the session currently is in its lifecycle. Written only by the
/// session itself, observed through
/// [`MonitorSession::state`](crate::session::MonitorSession::state) and
/// `MonitorEvent::StateChanged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Discovering,
    EnablingNotifications,
    Connected,
    Disconnected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Discovering => "discovering services",
            ConnectionState::EnablingNotifications => "enabling notifications",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}
