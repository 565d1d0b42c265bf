//! In-process publish/subscribe for status deltas (C6), built directly
//! on `tokio::sync::broadcast` the way the teacher's WebSocket fan-out
//! does. The channel's own lag behavior — a lagging receiver gets
//! `RecvError::Lagged(n)` instead of its oldest unread messages — is
//! exactly the "drop oldest, synthesize an overflow event" behavior
//! called for in §4.6; [`Subscription::recv`] turns that into a
//! synthesized [`Event`] of kind `overflow` rather than surfacing the
//! channel error directly.
//!
//! The bus is a side channel for liveness, never the authoritative
//! log — that's the events table the repository owns.

use tokio::sync::broadcast;

use crate::domain::{Event, EventSubject};

pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    pub fn publish(&self, event: Event) {
        // No receivers is not an error; observers are optional.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Await the next event, or a synthesized `overflow` event if this
    /// subscriber fell behind and the broadcast channel dropped
    /// messages on its behalf.
    pub async fn recv(&mut self) -> Event {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return event,
                Err(broadcast::error::RecvError::Lagged(dropped)) => {
                    return Event::overflow_for(EventSubject::None, dropped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // The bus itself is gone; nothing more will ever
                    // arrive. Callers loop on `recv` and should treat
                    // this as a signal to stop.
                    return Event::overflow_for(EventSubject::None, 0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventKind;

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe();
        bus.publish(Event::new(
            EventKind::EngineTick,
            EventSubject::None,
            serde_json::json!({}),
        ));
        bus.publish(Event::new(
            EventKind::Progress,
            EventSubject::Task("t1".into()),
            serde_json::json!({"pct": 50}),
        ));

        assert_eq!(sub.recv().await.kind, EventKind::EngineTick);
        assert_eq!(sub.recv().await.kind, EventKind::Progress);
    }

    #[tokio::test]
    async fn overflow_is_synthesized_when_a_subscriber_falls_behind() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for _ in 0..5 {
            bus.publish(Event::new(EventKind::EngineTick, EventSubject::None, serde_json::json!({})));
        }
        let first = sub.recv().await;
        assert_eq!(first.kind, EventKind::Overflow);
    }

    #[tokio::test]
    async fn publishing_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.publish(Event::new(EventKind::EngineTick, EventSubject::None, serde_json::json!({})));
    }
}
