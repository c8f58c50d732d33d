//! Transport trait definitions and scan types.
//!
//! The OS Bluetooth stack stays behind these traits: the session drives
//! them, implementations call back by publishing [`GattEvent`]s through
//! the [`EventPublisher`] handed to [`Transport::connect`]. The crate
//! ships a simulated implementation for tests and demos; a real backend
//! wraps the platform BLE API the same way.
//!
//! Initiating calls return as soon as the request is accepted by the
//! stack. The outcome arrives later as an event, which is exactly the
//! asymmetry the event bus and command runner exist to bridge.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::TransportError;
use crate::gatt::bus::EventPublisher;
use crate::gatt::event::{CharacteristicId, DescriptorId, LinkState};

/// Platform identifier of one peripheral, usually its address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One received advertisement during a scan.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub device: DeviceId,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    /// Service UUIDs carried in the advertising data.
    pub services: Vec<Uuid>,
}

/// Masked service-UUID filter applied while scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanFilter {
    pub service: Uuid,
    pub mask: Uuid,
}

impl ScanFilter {
    /// Filter that matches exactly `service` (all mask bits set).
    pub fn for_service(service: Uuid) -> Self {
        Self {
            service,
            mask: Uuid::from_u128(u128::MAX),
        }
    }

    /// True when `candidate` equals the filter's service under the mask.
    pub fn matches(&self, candidate: Uuid) -> bool {
        let mask = self.mask.as_u128();
        candidate.as_u128() & mask == self.service.as_u128() & mask
    }
}

/// Central-role scanning and connecting.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin scanning; matching advertisements appear on
    /// [`advertisements`](Self::advertisements).
    async fn start_scan(&self, filter: &ScanFilter) -> Result<(), TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Subscribe to advertisements from the current and future scans.
    fn advertisements(&self) -> broadcast::Receiver<Advertisement>;

    /// Open a link to `device`. Returns the link handle as soon as the
    /// attempt is underway; success or failure arrives later as a
    /// `ConnectionStateChanged` event through `events`.
    async fn connect(
        &self,
        device: &DeviceId,
        events: EventPublisher,
    ) -> Result<Arc<dyn DeviceLink>, TransportError>;

    /// Platform view of the link state, consulted before reconnecting.
    fn link_state(&self, device: &DeviceId) -> LinkState;
}

/// An open (or reopenable) link to one peripheral.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Re-initiate the connection after a drop, reusing this handle.
    async fn reconnect(&self) -> Result<(), TransportError>;

    /// Start service discovery; completion arrives as `ServicesDiscovered`.
    async fn discover_services(&self) -> Result<(), TransportError>;

    /// Look up a discovered characteristic by service and UUID.
    fn find_characteristic(&self, service: Uuid, characteristic: Uuid)
        -> Option<CharacteristicId>;

    fn find_descriptor(
        &self,
        characteristic: &CharacteristicId,
        descriptor: Uuid,
    ) -> Option<DescriptorId>;

    /// Request a read; the value arrives as `CharacteristicRead`.
    async fn read_characteristic(
        &self,
        characteristic: &CharacteristicId,
    ) -> Result<(), TransportError>;

    /// Request a descriptor write; completion arrives as `DescriptorWritten`.
    async fn write_descriptor(
        &self,
        descriptor: &DescriptorId,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Route (or stop routing) this characteristic's notifications to the
    /// event publisher. Synchronous with an immediate result, matching
    /// the platform call it wraps.
    fn set_characteristic_notification(
        &self,
        characteristic: &CharacteristicId,
        enable: bool,
    ) -> bool;

    /// Tear the link down and release platform resources.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::uuids;

    #[test]
    fn full_mask_filter_matches_only_its_service() {
        let filter = ScanFilter::for_service(uuids::BLOOD_PRESSURE_SERVICE);
        assert!(filter.matches(uuids::BLOOD_PRESSURE_SERVICE));
        assert!(!filter.matches(uuids::DEVICE_INFORMATION_SERVICE));
    }

    #[test]
    fn partial_mask_ignores_cleared_bits() {
        // mask out the 16-bit assigned-number field entirely
        let filter = ScanFilter {
            service: uuids::BLOOD_PRESSURE_SERVICE,
            mask: Uuid::from_u128(!(0xFFFF_u128 << 96)),
        };
        assert!(filter.matches(uuids::DEVICE_INFORMATION_SERVICE));
    }
}
