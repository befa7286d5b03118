use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::OutboxEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub the publisher delivers into — the stand-in for an external
/// broker. Channels are keyed by topic (the event-type prefix: `booking`,
/// `pricing`, `payment`, `session`).
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<OutboxEvent>>,
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
        }
    }

    /// Subscribe to a topic. Creates the channel if needed.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<OutboxEvent> {
        let sender = self
            .channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Deliver an event to its topic. No-op if nobody is listening.
    pub fn send(&self, event: &OutboxEvent) {
        if let Some(sender) = self.channels.get(event.topic()) {
            let _ = sender.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe("booking");

        let event = OutboxEvent::new("booking.created", serde_json::json!({"slot_id": "S101"}), 0);
        hub.send(&event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber — should not panic
        hub.send(&OutboxEvent::new("pricing.adjusted", serde_json::json!({}), 0));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let hub = NotifyHub::new();
        let mut booking_rx = hub.subscribe("booking");
        let mut pricing_rx = hub.subscribe("pricing");

        hub.send(&OutboxEvent::new("pricing.adjusted", serde_json::json!({}), 0));

        let got = pricing_rx.recv().await.unwrap();
        assert_eq!(got.event_type, "pricing.adjusted");
        assert!(booking_rx.try_recv().is_err());
    }
}
