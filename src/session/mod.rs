//! Monitor Session Module
//!
//! Drives one blood-pressure monitor from discovery to a stream of
//! decoded readings: scan, connect, discover services, enable
//! indications, then decode every incoming measurement. A dropped link
//! is re-established automatically until [`MonitorSession::close`] is
//! called.
//!
//! ## Modules
//!
//! - [`state`] - the [`ConnectionState`] lifecycle enum

pub mod state;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::domain::BloodPressureMeasurement;
use crate::error::{CommandError, SessionError, TransportError};
use crate::gatt::bus::{EventBus, EventStream};
use crate::gatt::commands::{CommandContext, CommandRunner};
use crate::gatt::event::{GattEvent, GattStatus, LinkState};
use crate::gatt::transport::{Advertisement, DeviceId, DeviceLink, Transport};
use crate::gatt::uuids;

pub use state::ConnectionState;

/// What the session reports to its consumer.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A monitor matching the scan filter was discovered.
    DeviceFound(Advertisement),
    StateChanged(ConnectionState),
    /// One decoded blood-pressure reading.
    Measurement(BloodPressureMeasurement),
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    seen: HashSet<DeviceId>,
    discovered: Vec<Advertisement>,
    link: Option<Arc<dyn DeviceLink>>,
    current_device: Option<DeviceId>,
    manufacturer: Option<String>,
    scan_watcher: Option<JoinHandle<()>>,
    link_watcher: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    closed: bool,
}

struct Shared {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    bus: EventBus,
    runner: CommandRunner,
    events_tx: mpsc::UnboundedSender<MonitorEvent>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn emit(&self, event: MonitorEvent) {
        // only fails when the consumer dropped its receiver
        let _ = self.events_tx.send(event);
    }

    fn transition(&self, to: ConnectionState) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == to {
            return;
        }
        debug!(from = %inner.state, to = %to, "connection state");
        inner.state = to;
        drop(inner);
        self.emit(MonitorEvent::StateChanged(to));
    }

    fn require_link(&self) -> Result<Arc<dyn DeviceLink>, SessionError> {
        self.inner
            .lock()
            .unwrap()
            .link
            .clone()
            .ok_or(SessionError::LinkInvalid)
    }

    fn store_link(&self, link: Arc<dyn DeviceLink>, device: &DeviceId) {
        let mut inner = self.inner.lock().unwrap();
        inner.link = Some(link);
        inner.current_device = Some(device.clone());
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    fn command(&self, label: &str) -> CommandContext {
        CommandContext::with_timeout(label, self.config.command_timeout())
    }
}

/// Owns the connection to one monitor.
///
/// Created together with the receiver its [`MonitorEvent`]s arrive on.
/// All GATT exchanges run through a single [`CommandRunner`], so the
/// one-outstanding-operation rule of the link is never violated no
/// matter how the public methods interleave.
pub struct MonitorSession {
    shared: Arc<Shared>,
}

impl MonitorSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<MonitorEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            transport,
            bus: EventBus::new(config.event_bus_capacity),
            runner: CommandRunner::new(),
            events_tx,
            config,
            inner: Mutex::new(Inner::default()),
        });
        (Self { shared }, events_rx)
    }

    /// Starts scanning for monitors advertising the configured service.
    ///
    /// Waits the configured settle delay before asking the transport to
    /// scan, then watches advertisements in the background, reporting
    /// each device once as [`MonitorEvent::DeviceFound`]. Only acts from
    /// [`ConnectionState::Idle`] or [`ConnectionState::Disconnected`];
    /// while a link is up or being brought up the request is ignored.
    pub async fn start_scan(&self) -> Result<(), SessionError> {
        {
            let inner = self.shared.inner.lock().unwrap();
            match inner.state {
                ConnectionState::Idle | ConnectionState::Disconnected => {}
                ConnectionState::Scanning => {
                    debug!("scan already running");
                    return Ok(());
                }
                other => {
                    debug!(state = %other, "scan request ignored, session busy");
                    return Ok(());
                }
            }
        }
        self.shared.transition(ConnectionState::Scanning);

        // subscribe before starting so no advertisement can slip past
        let adverts = self.shared.transport.advertisements();
        tokio::time::sleep(self.shared.config.scan_start_delay()).await;

        let filter = self.shared.config.scan_filter();
        if let Err(err) = self.shared.transport.start_scan(&filter).await {
            self.shared.transition(ConnectionState::Idle);
            return Err(err.into());
        }
        info!(service = %filter.service, "scanning for monitors");

        let watcher = tokio::spawn(watch_advertisements(self.shared.clone(), adverts));
        self.shared.inner.lock().unwrap().scan_watcher = Some(watcher);
        Ok(())
    }

    pub async fn stop_scan(&self) -> Result<(), SessionError> {
        if let Some(watcher) = self.shared.inner.lock().unwrap().scan_watcher.take() {
            watcher.abort();
        }
        self.shared.transport.stop_scan().await?;
        if self.shared.inner.lock().unwrap().state == ConnectionState::Scanning {
            self.shared.transition(ConnectionState::Idle);
        }
        Ok(())
    }

    /// Connects to the first discovered monitor and brings the link all
    /// the way up: connect, discover services, enable indications.
    ///
    /// On success the session is [`ConnectionState::Connected`] and
    /// measurements start flowing. On failure the link is closed and the
    /// session falls back to [`ConnectionState::Disconnected`].
    pub async fn connect_device(&self) -> Result<(), SessionError> {
        {
            let inner = self.shared.inner.lock().unwrap();
            match inner.state {
                ConnectionState::Idle
                | ConnectionState::Scanning
                | ConnectionState::Disconnected => {}
                other => {
                    debug!(state = %other, "connect requested while busy");
                    return Ok(());
                }
            }
        }
        let device = {
            let inner = self.shared.inner.lock().unwrap();
            inner
                .discovered
                .first()
                .map(|adv| adv.device.clone())
                .ok_or(SessionError::NoDeviceDiscovered)?
        };

        self.shared.transition(ConnectionState::Connecting);
        let result = establish(&self.shared, &device, false).await;
        if let Err(err) = &result {
            warn!(error = %err, device = %device, "connection failed");
            let link = self.shared.inner.lock().unwrap().link.take();
            if let Some(link) = link {
                link.close().await;
            }
            self.shared.transition(ConnectionState::Disconnected);
        }
        result
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().unwrap().state
    }

    /// Manufacturer name read from the Device Information service, once
    /// known.
    pub fn device_manufacturer(&self) -> Option<String> {
        self.shared.inner.lock().unwrap().manufacturer.clone()
    }

    /// Monitors discovered by the current or a previous scan.
    pub fn discovered_devices(&self) -> Vec<Advertisement> {
        self.shared.inner.lock().unwrap().discovered.clone()
    }

    /// Tears the session down: stops background tasks, closes the link
    /// and returns to [`ConnectionState::Idle`]. Any reconnection in
    /// progress is cancelled.
    pub async fn close(&self) {
        let (link, handles) = {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.closed = true;
            let handles: Vec<_> = [
                inner.scan_watcher.take(),
                inner.link_watcher.take(),
                inner.reconnect.take(),
            ]
            .into_iter()
            .flatten()
            .collect();
            (inner.link.take(), handles)
        };
        for handle in handles {
            handle.abort();
        }
        if let Some(link) = link {
            link.close().await;
        }
        self.shared.transition(ConnectionState::Idle);
        info!("session closed");
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.closed = true;
        for handle in [
            inner.scan_watcher.take(),
            inner.link_watcher.take(),
            inner.reconnect.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

/// Connect (or reconnect) and run the full link setup chain.
async fn establish(
    shared: &Arc<Shared>,
    device: &DeviceId,
    reconnecting: bool,
) -> Result<(), SessionError> {
    if reconnecting {
        let link = shared.require_link()?;
        if shared.transport.link_state(device) == LinkState::Connected {
            debug!(device = %device, "platform link already up, skipping reconnect request");
        } else {
            let (status, new_state) = shared
                .runner
                .run(shared.command("reconnect"), async {
                    let mut stream = shared.bus.subscribe();
                    link.reconnect().await?;
                    await_connection_change(&mut stream).await
                })
                .await?;
            check_status("reconnect", status)?;
            if new_state != LinkState::Connected {
                return Err(SessionError::Disconnected {
                    operation: "reconnect",
                });
            }
        }
    } else {
        let (status, new_state) = shared
            .runner
            .run(shared.command("connect"), async {
                let mut stream = shared.bus.subscribe();
                let link = shared
                    .transport
                    .connect(device, shared.bus.publisher())
                    .await?;
                shared.store_link(link, device);
                await_connection_change(&mut stream).await
            })
            .await?;
        check_status("connect", status)?;
        if new_state != LinkState::Connected {
            return Err(SessionError::Disconnected {
                operation: "connect",
            });
        }
        info!(device = %device, "link established");
    }

    let link = shared.require_link()?;

    shared.transition(ConnectionState::Discovering);
    let status = shared
        .runner
        .run(shared.command("discover services"), async {
            let mut stream = shared.bus.subscribe();
            link.discover_services().await?;
            await_services_discovered(&mut stream).await
        })
        .await?;
    check_status("discover services", status)?;

    read_manufacturer(shared, &link).await;

    shared.transition(ConnectionState::EnablingNotifications);
    // the watcher's stream must exist before indications are switched
    // on, so the first reading (or an instant drop) cannot outrun the
    // subscription
    let watch_stream = shared.bus.subscribe();
    enable_indications(shared, &link).await?;

    shared.transition(ConnectionState::Connected);
    ensure_link_watcher(shared, watch_stream);
    info!("monitor ready, indications enabled");
    Ok(())
}

/// Subscribe the measurement characteristic: register for notification
/// routing, then write ENABLE_INDICATION to its CCC descriptor and await
/// the write callback.
async fn enable_indications(
    shared: &Arc<Shared>,
    link: &Arc<dyn DeviceLink>,
) -> Result<(), SessionError> {
    let service = shared.config.scan_filter().service;
    let characteristic = link
        .find_characteristic(service, uuids::BLOOD_PRESSURE_MEASUREMENT)
        .ok_or(TransportError::CharacteristicNotFound(
            uuids::BLOOD_PRESSURE_MEASUREMENT,
        ))?;
    if !link.set_characteristic_notification(&characteristic, true) {
        return Err(TransportError::Platform(
            "notification registration refused".to_string(),
        )
        .into());
    }
    let descriptor = link
        .find_descriptor(&characteristic, uuids::CLIENT_CHARACTERISTIC_CONFIGURATION)
        .ok_or(TransportError::DescriptorNotFound(
            uuids::CLIENT_CHARACTERISTIC_CONFIGURATION,
        ))?;

    let status = shared
        .runner
        .run(shared.command("enable indications"), async {
            let mut stream = shared.bus.subscribe();
            link.write_descriptor(&descriptor, &uuids::ENABLE_INDICATION)
                .await?;
            await_descriptor_written(&mut stream, descriptor).await
        })
        .await?;
    check_status("enable indications", status)
}

/// Best-effort read of the manufacturer name from the Device Information
/// service. Failure is logged and does not interrupt the setup chain.
async fn read_manufacturer(shared: &Arc<Shared>, link: &Arc<dyn DeviceLink>) {
    let Some(characteristic) =
        link.find_characteristic(uuids::DEVICE_INFORMATION_SERVICE, uuids::MANUFACTURER_NAME)
    else {
        debug!("device information service not present");
        return;
    };
    let result = shared
        .runner
        .run(shared.command("read manufacturer"), async {
            let mut stream = shared.bus.subscribe();
            link.read_characteristic(&characteristic).await?;
            await_characteristic_read(&mut stream, characteristic).await
        })
        .await;
    match result {
        Ok((GattStatus::Success, value)) => {
            let name = String::from_utf8_lossy(&value).into_owned();
            info!(manufacturer = %name, "device identified");
            shared.inner.lock().unwrap().manufacturer = Some(name);
        }
        Ok((status, _)) => warn!(?status, "manufacturer read failed"),
        Err(err) => warn!(error = %err, "manufacturer read failed"),
    }
}

/// Forwards deduplicated scan results as `DeviceFound` events.
async fn watch_advertisements(
    shared: Arc<Shared>,
    mut adverts: tokio::sync::broadcast::Receiver<Advertisement>,
) {
    loop {
        match adverts.recv().await {
            Ok(adv) => {
                let mut inner = shared.inner.lock().unwrap();
                if inner.seen.insert(adv.device.clone()) {
                    info!(device = %adv.device, name = ?adv.local_name, "monitor discovered");
                    inner.discovered.push(adv.clone());
                    drop(inner);
                    shared.emit(MonitorEvent::DeviceFound(adv));
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "advertisement stream lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Spawns the link watcher on first connect. Reconnects reuse the
/// running watcher and drop the fresh stream unused.
fn ensure_link_watcher(shared: &Arc<Shared>, stream: EventStream) {
    let mut inner = shared.inner.lock().unwrap();
    if inner.link_watcher.is_none() {
        inner.link_watcher = Some(tokio::spawn(watch_link(shared.clone(), stream)));
    }
}

/// Long-lived task behind a connected session: decodes measurement
/// indications and reacts to spontaneous link drops. The stream is
/// subscribed by the caller before indications are enabled.
async fn watch_link(shared: Arc<Shared>, mut stream: EventStream) {
    loop {
        match stream.next().await {
            Ok(GattEvent::CharacteristicChanged {
                characteristic,
                value,
            }) if characteristic.uuid == uuids::BLOOD_PRESSURE_MEASUREMENT => {
                match BloodPressureMeasurement::from_bytes(&value) {
                    Ok(measurement) => {
                        info!(
                            systolic = measurement.systolic,
                            diastolic = measurement.diastolic,
                            "measurement received"
                        );
                        shared.emit(MonitorEvent::Measurement(measurement));
                    }
                    // one bad payload is dropped, the session lives on
                    Err(err) => warn!(error = %err, "dropping undecodable measurement"),
                }
            }
            Ok(GattEvent::ConnectionStateChanged {
                new_state: LinkState::Disconnected,
                ..
            }) => {
                let was_connected = {
                    let inner = shared.inner.lock().unwrap();
                    inner.state == ConnectionState::Connected && !inner.closed
                };
                if was_connected {
                    warn!("link dropped, scheduling reconnect");
                    shared.transition(ConnectionState::Disconnected);
                    let handle = tokio::spawn(reconnect_loop(shared.clone()));
                    shared.inner.lock().unwrap().reconnect = Some(handle);
                }
            }
            Ok(_) => {}
            Err(crate::error::WaitError::Lagged { skipped }) => {
                warn!(skipped, "link watcher lagged");
            }
            Err(_) => break,
        }
    }
}

/// Retries the connection until it sticks or the session closes.
async fn reconnect_loop(shared: Arc<Shared>) {
    let device = {
        let inner = shared.inner.lock().unwrap();
        inner.current_device.clone()
    };
    let Some(device) = device else {
        return;
    };
    shared.transition(ConnectionState::Reconnecting);
    loop {
        tokio::time::sleep(shared.config.reconnect_delay()).await;
        if shared.is_closed() {
            return;
        }
        shared.transition(ConnectionState::Connecting);
        match establish(&shared, &device, true).await {
            Ok(()) => return,
            Err(err) => {
                warn!(error = %err, "reconnect attempt failed");
                shared.transition(ConnectionState::Reconnecting);
            }
        }
    }
}

fn check_status(operation: &'static str, status: GattStatus) -> Result<(), SessionError> {
    match status {
        GattStatus::Success => Ok(()),
        GattStatus::Error(code) => Err(SessionError::Gatt { operation, code }),
    }
}

async fn await_connection_change(
    stream: &mut EventStream,
) -> Result<(GattStatus, LinkState), CommandError> {
    let event = stream
        .next_matching(|e| matches!(e, GattEvent::ConnectionStateChanged { .. }))
        .await?;
    match event {
        GattEvent::ConnectionStateChanged { status, new_state } => Ok((status, new_state)),
        _ => unreachable!("predicate admits only connection changes"),
    }
}

async fn await_services_discovered(stream: &mut EventStream) -> Result<GattStatus, CommandError> {
    let event = stream
        .next_matching(|e| matches!(e, GattEvent::ServicesDiscovered { .. }))
        .await?;
    match event {
        GattEvent::ServicesDiscovered { status } => Ok(status),
        _ => unreachable!("predicate admits only discovery results"),
    }
}

async fn await_descriptor_written(
    stream: &mut EventStream,
    descriptor: crate::gatt::event::DescriptorId,
) -> Result<GattStatus, CommandError> {
    let event = stream
        .next_matching(|e| {
            matches!(e, GattEvent::DescriptorWritten { descriptor: d, .. } if *d == descriptor)
        })
        .await?;
    match event {
        GattEvent::DescriptorWritten { status, .. } => Ok(status),
        _ => unreachable!("predicate admits only descriptor writes"),
    }
}

async fn await_characteristic_read(
    stream: &mut EventStream,
    characteristic: crate::gatt::event::CharacteristicId,
) -> Result<(GattStatus, Vec<u8>), CommandError> {
    let event = stream
        .next_matching(|e| {
            matches!(e, GattEvent::CharacteristicRead { characteristic: c, .. } if *c == characteristic)
        })
        .await?;
    match event {
        GattEvent::CharacteristicRead { status, value, .. } => Ok((status, value)),
        _ => unreachable!("predicate admits only characteristic reads"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedMonitor;

    fn quick_config() -> SessionConfig {
        SessionConfig {
            scan_start_delay_ms: 5,
            reconnect_delay_ms: 10,
            command_timeout_ms: 500,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn session_starts_idle() {
        let monitor = SimulatedMonitor::new("sim-cuff");
        let (session, _events) = MonitorSession::new(monitor.transport(), quick_config());
        assert_eq!(session.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn connect_without_discovery_is_an_error() {
        let monitor = SimulatedMonitor::new("sim-cuff");
        let (session, _events) = MonitorSession::new(monitor.transport(), quick_config());
        let err = session.connect_device().await.unwrap_err();
        assert!(matches!(err, SessionError::NoDeviceDiscovered));
    }

    #[tokio::test]
    async fn repeated_advertisements_are_reported_once() {
        let monitor = SimulatedMonitor::new("sim-cuff");
        let (session, mut events) = MonitorSession::new(monitor.transport(), quick_config());
        session.start_scan().await.unwrap();

        // the simulator re-advertises continuously; drain until quiet
        let mut found = 0;
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_millis(150), events.recv()).await
        {
            if let MonitorEvent::DeviceFound(_) = event {
                found += 1;
            }
        }
        assert_eq!(found, 1);
        assert_eq!(session.discovered_devices().len(), 1);
        session.close().await;
    }
}
