//! Broadcast emitter for `ExecutionEvent`.
//!
//! Built on `tokio::sync::broadcast`: publishing never waits for consumers,
//! and a subscriber that falls more than `capacity` events behind loses the
//! oldest ones. The `EventStream` wrapper turns that lag into a counter plus
//! a warning instead of an error, so consumers only ever see events in order.

use futures_util::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use weft_types::event::ExecutionEvent;

/// Single-producer event sink fed by the scheduler.
///
/// Cloning the emitter clones the sender; all clones feed the same channel.
pub struct EventEmitter {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    /// Create an emitter buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.sender.subscribe())
    }

    /// Publish an event. Dropped silently when nobody is subscribed.
    pub fn emit(&self, event: ExecutionEvent) {
        tracing::trace!(run_id = %event.run_id(), event = %event.label(), "emit");
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventEmitter {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

/// Receiving side of an [`EventEmitter`].
pub struct EventStream {
    receiver: broadcast::Receiver<ExecutionEvent>,
    missed: u64,
}

impl EventStream {
    fn new(receiver: broadcast::Receiver<ExecutionEvent>) -> Self {
        Self {
            receiver,
            missed: 0,
        }
    }

    /// Next event, or `None` once the run is over and the buffer is drained.
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => self.record_lag(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<ExecutionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => self.record_lag(n),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Total events this consumer lost to buffer overflow.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Adapt into a `futures` stream.
    pub fn into_stream(mut self) -> impl Stream<Item = ExecutionEvent> {
        async_stream::stream! {
            while let Some(event) = self.recv().await {
                yield event;
            }
        }
    }

    fn record_lag(&mut self, n: u64) {
        self.missed += n;
        tracing::warn!(missed = n, total_missed = self.missed, "event consumer lagging, oldest events dropped");
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("missed", &self.missed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures_util::StreamExt;
    use uuid::Uuid;

    fn started(step_id: &str) -> ExecutionEvent {
        ExecutionEvent::StepStarted {
            run_id: Uuid::nil(),
            step_id: step_id.to_string(),
            skill: "echo".to_string(),
            batch: 0,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_emit_and_receive_in_order() {
        let emitter = EventEmitter::new(16);
        let mut stream = emitter.subscribe();
        emitter.emit(started("a"));
        emitter.emit(started("b"));

        assert_eq!(stream.recv().await.unwrap().step_id(), Some("a"));
        assert_eq!(stream.recv().await.unwrap().step_id(), Some("b"));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_noop() {
        let emitter = EventEmitter::new(4);
        emitter.emit(started("a"));
        assert_eq!(emitter.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_consumer_drops_oldest() {
        let emitter = EventEmitter::new(4);
        let mut stream = emitter.subscribe();
        for i in 0..10 {
            emitter.emit(started(&format!("s{i}")));
        }
        drop(emitter);

        let mut seen = Vec::new();
        while let Some(event) = stream.recv().await {
            seen.push(event.step_id().unwrap_or_default().to_string());
        }
        assert_eq!(seen, vec!["s6", "s7", "s8", "s9"]);
        assert_eq!(stream.missed(), 6);
    }

    #[tokio::test]
    async fn test_stream_ends_when_emitter_dropped() {
        let emitter = EventEmitter::new(8);
        let stream = emitter.subscribe();
        let clone = emitter.clone();
        clone.emit(started("a"));
        drop(emitter);
        drop(clone);

        let events: Vec<_> = stream.into_stream().collect().await;
        assert_eq!(events.len(), 1);
    }
}
