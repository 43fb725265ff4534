use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for domain events, keyed per business, plus a global
/// firehose for a message-bus bridge.
///
/// Delivery is fire-and-forget: the engine publishes only after the durable
/// commit, and a slow or absent subscriber can never block or fail a booking.
/// Consumers are responsible for idempotent handling (at-least-once).
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
    firehose: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            firehose: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to events for one business. Creates the channel if needed.
    pub fn subscribe(&self, business_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(business_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to every event, regardless of business. This is the hookup
    /// point for an outbound bus bridge.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.firehose.subscribe()
    }

    /// Publish an event. No-op if nobody is listening.
    pub fn send(&self, business_id: Ulid, event: &Event) {
        let _ = self.firehose.send(event.clone());
        if let Some(sender) = self.channels.get(&business_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a business channel (e.g. when a business is offboarded).
    pub fn remove(&self, business_id: &Ulid) {
        self.channels.remove(business_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booking, BookingStatus, Span};

    fn event_for(business_id: Ulid) -> Event {
        Event::Created {
            booking: Booking {
                id: Ulid::new(),
                business_id,
                service_id: Ulid::new(),
                customer_id: Ulid::new(),
                span: Span::new(1000, 2000),
                status: BookingStatus::Confirmed,
                created_at: 0,
                idempotency_key: None,
            },
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let business = Ulid::new();
        let mut rx = hub.subscribe(business);

        let event = event_for(business);
        hub.send(business, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn firehose_sees_every_business() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe_all();

        let a = Ulid::new();
        let b = Ulid::new();
        hub.send(a, &event_for(a));
        hub.send(b, &event_for(b));

        assert_eq!(rx.recv().await.unwrap().booking().business_id, a);
        assert_eq!(rx.recv().await.unwrap().booking().business_id, b);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let business = Ulid::new();
        // No subscriber — should not panic
        hub.send(business, &event_for(business));
    }
}
