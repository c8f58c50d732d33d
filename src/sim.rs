//! Simulated blood-pressure monitor.
//!
//! Implements the [`Transport`] and [`DeviceLink`] traits over an
//! in-process fake peripheral: one advertised device with the Blood
//! Pressure and Device Information services, honest callback latencies,
//! and knobs to inject the failures a real cuff produces (refused
//! connects, failed descriptor writes, spontaneous link drops).
//!
//! The integration tests and the demo binary both run against this
//! module, so the whole session flow is exercised without a radio.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::BloodPressureMeasurement;
use crate::error::TransportError;
use crate::gatt::bus::EventPublisher;
use crate::gatt::event::{CharacteristicId, DescriptorId, GattEvent, GattStatus, LinkState};
use crate::gatt::transport::{Advertisement, DeviceId, DeviceLink, ScanFilter, Transport};
use crate::gatt::uuids;

/// Delay before a connect or reconnect outcome is reported.
const CONNECT_LATENCY: Duration = Duration::from_millis(10);
/// Delay before discovery, read and write callbacks.
const OPERATION_LATENCY: Duration = Duration::from_millis(5);
/// Interval between repeated advertisements while scanning.
const ADVERTISE_INTERVAL: Duration = Duration::from_millis(40);

/// Android's generic GATT failure code, used for refused connects.
const GATT_ERROR: u8 = 133;
/// ATT "write not permitted".
const WRITE_NOT_PERMITTED: u8 = 0x03;
/// ATT "read not permitted".
const READ_NOT_PERMITTED: u8 = 0x02;

#[derive(Default)]
struct SimState {
    scanning: bool,
    advertiser: Option<JoinHandle<()>>,
    publisher: Option<EventPublisher>,
    connected: bool,
    services_discovered: bool,
    notifications_registered: bool,
    indications_enabled: bool,
    fail_next_connect: bool,
    fail_next_descriptor_write: bool,
}

struct SimShared {
    device: DeviceId,
    local_name: String,
    manufacturer: String,
    adv_tx: broadcast::Sender<Advertisement>,
    state: Mutex<SimState>,
}

impl SimShared {
    fn publisher(&self) -> Option<EventPublisher> {
        self.state.lock().unwrap().publisher.clone()
    }

    /// Reports the pending connect outcome after the usual latency.
    fn schedule_connect_outcome(self: &Arc<Self>) {
        let shared = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CONNECT_LATENCY).await;
            let (publisher, fail) = {
                let mut state = shared.state.lock().unwrap();
                let fail = std::mem::take(&mut state.fail_next_connect);
                if !fail {
                    state.connected = true;
                }
                (state.publisher.clone(), fail)
            };
            let Some(publisher) = publisher else { return };
            if fail {
                publisher.publish(GattEvent::ConnectionStateChanged {
                    status: GattStatus::from(GATT_ERROR),
                    new_state: LinkState::Disconnected,
                });
            } else {
                publisher.publish(GattEvent::ConnectionStateChanged {
                    status: GattStatus::Success,
                    new_state: LinkState::Connected,
                });
            }
        });
    }
}

/// The fake peripheral plus its test controls.
pub struct SimulatedMonitor {
    shared: Arc<SimShared>,
}

impl SimulatedMonitor {
    pub fn new(name: &str) -> Self {
        let (adv_tx, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(SimShared {
                device: DeviceId(format!("sim:{name}")),
                local_name: name.to_string(),
                manufacturer: "Sphygmo Labs".to_string(),
                adv_tx,
                state: Mutex::new(SimState::default()),
            }),
        }
    }

    /// Transport handle to pass into a session.
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(SimulatedTransport {
            shared: self.shared.clone(),
        })
    }

    pub fn device_id(&self) -> DeviceId {
        self.shared.device.clone()
    }

    /// Indicates one reading, encoded exactly as a real cuff would send
    /// it. Dropped with a warning unless the client registered for
    /// notifications and enabled indications.
    pub fn send_measurement(&self, measurement: &BloodPressureMeasurement) {
        self.send_raw(measurement.to_bytes());
    }

    /// Indicates a raw payload on the measurement characteristic.
    pub fn send_raw(&self, value: Vec<u8>) {
        let (deliverable, publisher) = {
            let state = self.shared.state.lock().unwrap();
            (
                state.connected && state.notifications_registered && state.indications_enabled,
                state.publisher.clone(),
            )
        };
        let Some(publisher) = publisher else {
            warn!("no client has ever connected, dropping indication");
            return;
        };
        if !deliverable {
            warn!("indications not enabled, dropping indication");
            return;
        }
        publisher.publish(GattEvent::CharacteristicChanged {
            characteristic: measurement_characteristic(),
            value,
        });
    }

    /// Drops the link from the peripheral side, as a cuff powering down
    /// after a reading does.
    pub fn drop_link(&self) {
        let publisher = {
            let mut state = self.shared.state.lock().unwrap();
            state.connected = false;
            state.services_discovered = false;
            state.notifications_registered = false;
            state.indications_enabled = false;
            state.publisher.clone()
        };
        if let Some(publisher) = publisher {
            publisher.publish(GattEvent::ConnectionStateChanged {
                status: GattStatus::Success,
                new_state: LinkState::Disconnected,
            });
        }
    }

    /// The next connect or reconnect attempt fails with GATT error 133.
    pub fn fail_next_connect(&self) {
        self.shared.state.lock().unwrap().fail_next_connect = true;
    }

    /// The next descriptor write completes with "write not permitted".
    pub fn fail_next_descriptor_write(&self) {
        self.shared.state.lock().unwrap().fail_next_descriptor_write = true;
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.state.lock().unwrap().scanning
    }

    pub fn indications_enabled(&self) -> bool {
        self.shared.state.lock().unwrap().indications_enabled
    }
}

fn measurement_characteristic() -> CharacteristicId {
    CharacteristicId {
        service: uuids::BLOOD_PRESSURE_SERVICE,
        uuid: uuids::BLOOD_PRESSURE_MEASUREMENT,
    }
}

struct SimulatedTransport {
    shared: Arc<SimShared>,
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn start_scan(&self, filter: &ScanFilter) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.scanning {
            return Ok(());
        }
        state.scanning = true;

        // the platform applies the filter; a non-matching device simply
        // never shows up
        if !filter.matches(uuids::BLOOD_PRESSURE_SERVICE) {
            debug!(service = %filter.service, "filter excludes the simulated monitor");
            return Ok(());
        }

        let shared = self.shared.clone();
        state.advertiser = Some(tokio::spawn(async move {
            loop {
                let adv = Advertisement {
                    device: shared.device.clone(),
                    local_name: Some(shared.local_name.clone()),
                    rssi: Some(-58),
                    services: vec![uuids::BLOOD_PRESSURE_SERVICE],
                };
                let _ = shared.adv_tx.send(adv);
                tokio::time::sleep(ADVERTISE_INTERVAL).await;
            }
        }));
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock().unwrap();
        state.scanning = false;
        if let Some(advertiser) = state.advertiser.take() {
            advertiser.abort();
        }
        Ok(())
    }

    fn advertisements(&self) -> broadcast::Receiver<Advertisement> {
        self.shared.adv_tx.subscribe()
    }

    async fn connect(
        &self,
        device: &DeviceId,
        events: EventPublisher,
    ) -> Result<Arc<dyn DeviceLink>, TransportError> {
        if *device != self.shared.device {
            return Err(TransportError::DeviceNotFound(device.to_string()));
        }
        self.shared.state.lock().unwrap().publisher = Some(events);
        self.shared.schedule_connect_outcome();
        Ok(Arc::new(SimulatedLink {
            shared: self.shared.clone(),
        }))
    }

    fn link_state(&self, device: &DeviceId) -> LinkState {
        let state = self.shared.state.lock().unwrap();
        if *device == self.shared.device && state.connected {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        }
    }
}

struct SimulatedLink {
    shared: Arc<SimShared>,
}

#[async_trait]
impl DeviceLink for SimulatedLink {
    async fn reconnect(&self) -> Result<(), TransportError> {
        self.shared.schedule_connect_outcome();
        Ok(())
    }

    async fn discover_services(&self) -> Result<(), TransportError> {
        if !self.shared.state.lock().unwrap().connected {
            return Err(TransportError::NotConnected);
        }
        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(OPERATION_LATENCY).await;
            let publisher = {
                let mut state = shared.state.lock().unwrap();
                state.services_discovered = true;
                state.publisher.clone()
            };
            if let Some(publisher) = publisher {
                publisher.publish(GattEvent::ServicesDiscovered {
                    status: GattStatus::Success,
                });
            }
        });
        Ok(())
    }

    fn find_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Option<CharacteristicId> {
        if !self.shared.state.lock().unwrap().services_discovered {
            return None;
        }
        let known = [
            (uuids::BLOOD_PRESSURE_SERVICE, uuids::BLOOD_PRESSURE_MEASUREMENT),
            (uuids::DEVICE_INFORMATION_SERVICE, uuids::MANUFACTURER_NAME),
        ];
        known
            .contains(&(service, characteristic))
            .then_some(CharacteristicId {
                service,
                uuid: characteristic,
            })
    }

    fn find_descriptor(
        &self,
        characteristic: &CharacteristicId,
        descriptor: Uuid,
    ) -> Option<DescriptorId> {
        (characteristic.uuid == uuids::BLOOD_PRESSURE_MEASUREMENT
            && descriptor == uuids::CLIENT_CHARACTERISTIC_CONFIGURATION)
            .then_some(DescriptorId {
                characteristic: *characteristic,
                uuid: descriptor,
            })
    }

    async fn read_characteristic(
        &self,
        characteristic: &CharacteristicId,
    ) -> Result<(), TransportError> {
        if !self.shared.state.lock().unwrap().connected {
            return Err(TransportError::NotConnected);
        }
        let shared = self.shared.clone();
        let characteristic = *characteristic;
        tokio::spawn(async move {
            tokio::time::sleep(OPERATION_LATENCY).await;
            let Some(publisher) = shared.publisher() else { return };
            if characteristic.uuid == uuids::MANUFACTURER_NAME {
                publisher.publish(GattEvent::CharacteristicRead {
                    characteristic,
                    status: GattStatus::Success,
                    value: shared.manufacturer.clone().into_bytes(),
                });
            } else {
                publisher.publish(GattEvent::CharacteristicRead {
                    characteristic,
                    status: GattStatus::from(READ_NOT_PERMITTED),
                    value: Vec::new(),
                });
            }
        });
        Ok(())
    }

    async fn write_descriptor(
        &self,
        descriptor: &DescriptorId,
        value: &[u8],
    ) -> Result<(), TransportError> {
        if !self.shared.state.lock().unwrap().connected {
            return Err(TransportError::NotConnected);
        }
        let shared = self.shared.clone();
        let descriptor = *descriptor;
        let value = value.to_vec();
        tokio::spawn(async move {
            tokio::time::sleep(OPERATION_LATENCY).await;
            let (publisher, status) = {
                let mut state = shared.state.lock().unwrap();
                if std::mem::take(&mut state.fail_next_descriptor_write) {
                    (state.publisher.clone(), GattStatus::from(WRITE_NOT_PERMITTED))
                } else {
                    if descriptor.uuid == uuids::CLIENT_CHARACTERISTIC_CONFIGURATION {
                        state.indications_enabled = value == uuids::ENABLE_INDICATION;
                    }
                    (state.publisher.clone(), GattStatus::Success)
                }
            };
            if let Some(publisher) = publisher {
                publisher.publish(GattEvent::DescriptorWritten { descriptor, status });
            }
        });
        Ok(())
    }

    fn set_characteristic_notification(
        &self,
        characteristic: &CharacteristicId,
        enable: bool,
    ) -> bool {
        if characteristic.uuid != uuids::BLOOD_PRESSURE_MEASUREMENT {
            return false;
        }
        self.shared.state.lock().unwrap().notifications_registered = enable;
        true
    }

    async fn close(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.connected = false;
        state.services_discovered = false;
        state.notifications_registered = false;
        state.indications_enabled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::bus::EventBus;

    #[tokio::test]
    async fn non_matching_filter_finds_nothing() {
        let monitor = SimulatedMonitor::new("cuff");
        let transport = monitor.transport();
        let mut adverts = transport.advertisements();
        let filter = ScanFilter::for_service(uuids::DEVICE_INFORMATION_SERVICE);
        transport.start_scan(&filter).await.unwrap();
        let result =
            tokio::time::timeout(Duration::from_millis(100), adverts.recv()).await;
        assert!(result.is_err(), "advertisement leaked past the filter");
    }

    #[tokio::test]
    async fn connecting_to_unknown_device_fails() {
        let monitor = SimulatedMonitor::new("cuff");
        let transport = monitor.transport();
        let bus = EventBus::default();
        let result = transport
            .connect(&DeviceId("sim:other".to_string()), bus.publisher())
            .await;
        assert!(matches!(result, Err(TransportError::DeviceNotFound(_))));
    }

    #[tokio::test]
    async fn indications_are_gated_on_subscription() {
        let monitor = SimulatedMonitor::new("cuff");
        let transport = monitor.transport();
        let bus = EventBus::default();
        let mut stream = bus.subscribe();

        let link = transport
            .connect(&monitor.device_id(), bus.publisher())
            .await
            .unwrap();
        stream
            .wait_for(
                |e| matches!(e, GattEvent::ConnectionStateChanged { .. }),
                Duration::from_millis(200),
            )
            .await
            .unwrap();

        // nothing registered yet: the indication is dropped
        monitor.send_raw(vec![0x00]);
        assert!(stream
            .wait_for(
                |e| matches!(e, GattEvent::CharacteristicChanged { .. }),
                Duration::from_millis(50),
            )
            .await
            .is_err());

        link.discover_services().await.unwrap();
        stream
            .wait_for(
                |e| matches!(e, GattEvent::ServicesDiscovered { .. }),
                Duration::from_millis(200),
            )
            .await
            .unwrap();

        let characteristic = measurement_characteristic();
        assert!(link.set_characteristic_notification(&characteristic, true));
        let descriptor = link
            .find_descriptor(&characteristic, uuids::CLIENT_CHARACTERISTIC_CONFIGURATION)
            .unwrap();
        link.write_descriptor(&descriptor, &uuids::ENABLE_INDICATION)
            .await
            .unwrap();
        stream
            .wait_for(
                |e| matches!(e, GattEvent::DescriptorWritten { .. }),
                Duration::from_millis(200),
            )
            .await
            .unwrap();
        assert!(monitor.indications_enabled());

        monitor.send_raw(vec![0x00, 0x78, 0x00, 0x50, 0x00, 0x5D, 0x00]);
        let event = stream
            .wait_for(
                |e| matches!(e, GattEvent::CharacteristicChanged { .. }),
                Duration::from_millis(200),
            )
            .await
            .unwrap();
        assert!(matches!(event, GattEvent::CharacteristicChanged { .. }));
    }
}
