//! Demo binary: runs a full session against the simulated monitor.
//!
//! Scans, connects, enables indications, streams a couple of readings,
//! then drops the link from the peripheral side to show the reconnect
//! loop recovering before the session is closed.

use anyhow::Result;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

use sphygmo::domain::{BloodPressureMeasurement, DeviceDateTime, PressureUnit};
use sphygmo::session::{ConnectionState, MonitorEvent, MonitorSession};
use sphygmo::sim::SimulatedMonitor;
use sphygmo::{logging, ConfigService};

#[tokio::main]
async fn main() -> Result<()> {
    let config_service = ConfigService::new()?;
    let config = config_service.get().clone();
    let _guard = logging::init(&config.log_settings)?;

    let monitor = SimulatedMonitor::new("demo-cuff");
    let (session, mut events) = MonitorSession::new(monitor.transport(), config);

    session.start_scan().await?;
    pump_until(&mut events, |e| matches!(e, MonitorEvent::DeviceFound(_))).await;
    session.stop_scan().await?;

    session.connect_device().await?;
    if let Some(manufacturer) = session.device_manufacturer() {
        info!(%manufacturer, "connected");
    }

    monitor.send_measurement(&reading(118.5, 77.0, 90.8, 68.0)?);
    monitor.send_measurement(&reading(121.0, 79.5, 93.3, 71.0)?);
    let mut received = 0;
    pump_until(&mut events, |e| {
        if matches!(e, MonitorEvent::Measurement(_)) {
            received += 1;
        }
        received == 2
    })
    .await;

    // the cuff powers down after its readings; the session reconnects
    monitor.drop_link();
    pump_until(&mut events, |e| {
        matches!(e, MonitorEvent::StateChanged(ConnectionState::Connected))
    })
    .await;
    info!("session recovered after the link dropped");

    monitor.send_measurement(&reading(119.0, 78.0, 91.7, 70.0)?);
    pump_until(&mut events, |e| matches!(e, MonitorEvent::Measurement(_))).await;

    session.close().await;
    Ok(())
}

fn reading(systolic: f32, diastolic: f32, map: f32, pulse: f32) -> Result<BloodPressureMeasurement> {
    Ok(BloodPressureMeasurement {
        systolic,
        diastolic,
        mean_arterial_pressure: map,
        unit: PressureUnit::Mmhg,
        timestamp: Some(DeviceDateTime::new(2026, 8, 22, 9, 30, 0)?),
        pulse_rate: Some(pulse),
        user_id: None,
        status: None,
    })
}

/// Logs every session event until `stop` says we have seen enough.
async fn pump_until(
    events: &mut UnboundedReceiver<MonitorEvent>,
    mut stop: impl FnMut(&MonitorEvent) -> bool,
) {
    while let Some(event) = events.recv().await {
        match &event {
            MonitorEvent::DeviceFound(adv) => {
                info!(device = %adv.device, name = ?adv.local_name, rssi = ?adv.rssi, "found monitor");
            }
            MonitorEvent::StateChanged(state) => info!(%state, "session state"),
            MonitorEvent::Measurement(m) => {
                info!(
                    systolic = m.systolic,
                    diastolic = m.diastolic,
                    pulse = ?m.pulse_rate,
                    "reading"
                );
            }
        }
        if stop(&event) {
            return;
        }
    }
}
