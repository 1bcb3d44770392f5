//! Broadcast bus carrying progress events from orchestrators to displays

use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::types::EventEnvelope;

/// A run emits a few events per iteration; this leaves room for several runs.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of [`EventEnvelope`]s. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Deliver to current subscribers. Returns how many received it; with
    /// nobody listening the event is dropped and 0 is returned.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Raw receiver over every run. Earlier events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Receiver that yields only the events of `run_id`.
    pub fn subscribe_run(&self, run_id: Uuid) -> RunSubscription {
        RunSubscription {
            run_id,
            receiver: self.sender.subscribe(),
            missed: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RunSubscription {
    run_id: Uuid,
    receiver: broadcast::Receiver<EventEnvelope>,
    missed: u64,
}

impl RunSubscription {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Events dropped because this subscriber fell behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Next event of this run, or `None` once every bus handle is dropped.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.event.run_id() == Some(self.run_id) => {
                    return Some(envelope)
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => self.missed += skipped,
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;

    fn started(run_id: Uuid) -> EventEnvelope {
        EventEnvelope::new(Event::RunStarted {
            run_id,
            max_iterations: 3,
        })
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.clone().subscribe();

        let envelope = started(Uuid::new_v4());
        assert_eq!(bus.publish(envelope.clone()), 2);

        assert_eq!(first.recv().await.unwrap().id, envelope.id);
        assert_eq!(second.recv().await.unwrap().id, envelope.id);
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(started(Uuid::new_v4())), 0);
    }

    #[tokio::test]
    async fn run_subscription_skips_other_runs() {
        let bus = EventBus::new();
        let mine = Uuid::new_v4();
        let mut sub = bus.subscribe_run(mine);
        assert_eq!(sub.run_id(), mine);

        bus.publish(started(Uuid::new_v4()));
        bus.publish(EventEnvelope::new(Event::Error {
            message: "unrelated".to_string(),
            context: None,
        }));
        let expected = started(mine);
        bus.publish(expected.clone());

        assert_eq!(sub.next().await.unwrap().id, expected.id);
    }

    #[tokio::test]
    async fn run_subscription_counts_lagged_events() {
        let bus = EventBus::with_capacity(2);
        let run_id = Uuid::new_v4();
        let mut sub = bus.subscribe_run(run_id);

        for _ in 0..5 {
            bus.publish(started(run_id));
        }

        assert!(sub.next().await.is_some());
        assert_eq!(sub.missed(), 3);
    }

    #[tokio::test]
    async fn run_subscription_ends_with_the_bus() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_run(Uuid::new_v4());
        drop(bus);
        assert!(sub.next().await.is_none());
    }

    #[test]
    fn clones_share_one_channel() {
        let bus = EventBus::new();
        let _rx = bus.clone().subscribe();
        assert_eq!(bus.subscriber_count(), 1);
    }
}
