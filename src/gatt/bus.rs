//! Fan-out bus for transport callback events.
//!
//! The transport publishes every callback as a [`GattEvent`]; any number
//! of tasks hold their own [`EventStream`] and wait for the event they
//! care about. Publishing never blocks: the channel is bounded and drops
//! its oldest entries when a subscriber falls behind, which that
//! subscriber then observes as [`WaitError::Lagged`].
//!
//! The idiom used throughout the crate is subscribe-act-wait: open a
//! stream first, fire the side-effecting transport call, then wait. An
//! event published between the subscribe and the wait is buffered, so
//! the completion of a fast operation cannot slip past its waiter.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::error::WaitError;
use crate::gatt::event::GattEvent;

/// Default channel capacity, sized to absorb notification bursts.
pub const DEFAULT_CAPACITY: usize = 64;

/// Broadcast channel of [`GattEvent`]s with bounded, drop-oldest buffering.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<GattEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Handle handed to transport implementations for publishing.
    pub fn publisher(&self) -> EventPublisher {
        EventPublisher {
            tx: self.tx.clone(),
        }
    }

    /// Opens a stream that sees every event published from now on.
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
        }
    }

    pub fn publish(&self, event: GattEvent) {
        trace!(?event, "gatt event");
        // send only fails when nobody is subscribed, which is harmless
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Cloneable publishing side of the bus, given to the transport.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<GattEvent>,
}

impl EventPublisher {
    pub fn publish(&self, event: GattEvent) {
        trace!(?event, "gatt event");
        let _ = self.tx.send(event);
    }
}

/// One subscriber's view of the bus, consumed event by event.
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<GattEvent>,
}

impl EventStream {
    /// Next buffered event. Reports [`WaitError::Lagged`] once when the
    /// bus overran this subscriber, then resumes from the oldest retained
    /// event.
    pub async fn next(&mut self) -> Result<GattEvent, WaitError> {
        match self.rx.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                Err(WaitError::Lagged { skipped })
            }
            Err(broadcast::error::RecvError::Closed) => Err(WaitError::Closed),
        }
    }

    /// Consumes events until `predicate` matches, with no deadline of its
    /// own. Used inside serialized commands, which already run under the
    /// command timeout.
    ///
    /// A lag is logged and skipped over here: the events it dropped can
    /// no longer match, but the one being waited for may still arrive.
    pub async fn next_matching(
        &mut self,
        mut predicate: impl FnMut(&GattEvent) -> bool,
    ) -> Result<GattEvent, WaitError> {
        loop {
            match self.next().await {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) => continue,
                Err(WaitError::Lagged { skipped }) => {
                    warn!(skipped, "event stream lagged while waiting");
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Waits until `predicate` matches an event or `timeout` elapses.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&GattEvent) -> bool,
        timeout: Duration,
    ) -> Result<GattEvent, WaitError> {
        tokio::time::timeout(timeout, self.next_matching(predicate))
            .await
            .unwrap_or(Err(WaitError::Timeout { timeout }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::event::CharacteristicId;
    use crate::gatt::uuids;

    fn changed(marker: u8) -> GattEvent {
        GattEvent::CharacteristicChanged {
            characteristic: CharacteristicId {
                service: uuids::BLOOD_PRESSURE_SERVICE,
                uuid: uuids::BLOOD_PRESSURE_MEASUREMENT,
            },
            value: vec![marker],
        }
    }

    fn marker_of(event: &GattEvent) -> u8 {
        match event {
            GattEvent::CharacteristicChanged { value, .. } => value[0],
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_between_subscribe_and_wait_is_not_lost() {
        let bus = EventBus::default();
        let mut stream = bus.subscribe();
        bus.publish(changed(7));
        let event = stream
            .wait_for(|e| marker_of(e) == 7, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(marker_of(&event), 7);
    }

    #[tokio::test]
    async fn wait_for_skips_non_matching_events() {
        let bus = EventBus::default();
        let mut stream = bus.subscribe();
        bus.publish(changed(1));
        bus.publish(changed(2));
        bus.publish(changed(3));
        let event = stream
            .wait_for(|e| marker_of(e) == 3, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(marker_of(&event), 3);
    }

    #[tokio::test]
    async fn wait_for_reports_timeout() {
        let bus = EventBus::default();
        let mut stream = bus.subscribe();
        let err = stream
            .wait_for(|_| true, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Timeout { .. }));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_reports_lag() {
        let bus = EventBus::new(4);
        let mut stream = bus.subscribe();
        for n in 0..6 {
            bus.publish(changed(n));
        }
        assert_eq!(
            stream.next().await,
            Err(WaitError::Lagged { skipped: 2 })
        );
        // resumes from the oldest event still buffered
        assert_eq!(marker_of(&stream.next().await.unwrap()), 2);
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publisher().publish(changed(9));
        assert_eq!(marker_of(&a.next().await.unwrap()), 9);
        assert_eq!(marker_of(&b.next().await.unwrap()), 9);
    }

    #[tokio::test]
    async fn stream_closes_when_bus_drops() {
        let bus = EventBus::default();
        let mut stream = bus.subscribe();
        drop(bus);
        assert_eq!(stream.next().await, Err(WaitError::Closed));
    }
}
