//! Progress events stamped with their position in the stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use events::{Event, EventBus, EventEnvelope};

/// Wraps an [`EventBus`] and stamps every envelope with the next sequence number,
/// so a display can order events (and spot gaps) without trusting timestamps.
#[derive(Clone)]
pub struct OrderedEventEmitter {
    bus: EventBus,
    sequence: Arc<AtomicU64>,
}

impl OrderedEventEmitter {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish `event` and return the sequence number it was given (1-based).
    pub fn emit(&self, event: Event) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.bus.publish(EventEnvelope::sequenced(event, sequence));
        sequence
    }

    /// Number of events emitted so far.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn started() -> Event {
        Event::RunStarted {
            run_id: Uuid::new_v4(),
            max_iterations: 3,
        }
    }

    #[test]
    fn test_sequence_increments() {
        let emitter = OrderedEventEmitter::new(EventBus::new());
        assert_eq!(emitter.current_sequence(), 0);

        assert_eq!(emitter.emit(started()), 1);
        assert_eq!(emitter.emit(started()), 2);
        assert_eq!(emitter.current_sequence(), 2);
    }

    #[test]
    fn test_clone_shares_sequence() {
        let first = OrderedEventEmitter::new(EventBus::new());
        let second = first.clone();

        first.emit(started());
        second.emit(started());

        assert_eq!(first.current_sequence(), 2);
        assert_eq!(second.current_sequence(), 2);
    }

    #[tokio::test]
    async fn test_envelopes_carry_sequence() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let emitter = OrderedEventEmitter::new(bus);

        emitter.emit(started());
        emitter.emit(started());

        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert_eq!(rx.recv().await.unwrap().sequence, 2);
    }
}
