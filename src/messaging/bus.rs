use anyhow::Result;
use log::debug;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::messaging::event::{EventMessage, EventType};

/// In-process topic bus.
///
/// One broadcast channel carries all topics, which keeps per-subscriber
/// FIFO order across topics. Every subscriber owns a bounded queue; when it
/// overflows, the oldest queued messages are dropped and counted. Delivery
/// is at-most-once.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventMessage>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Succeeds even with no subscribers.
    pub fn publish<T: Serialize>(
        &self,
        event_type: EventType,
        source_id: Option<Uuid>,
        payload: T,
    ) -> Result<()> {
        let event = EventMessage::new(event_type, source_id, payload)?;
        debug!("Publishing event: {} ({})", event.event_type, event.id);
        // A send error only means nobody is listening right now
        let _ = self.tx.send(event);
        Ok(())
    }

    /// Subscribe to all topics.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            dropped: 0,
        }
    }
}

/// A subscriber's end of the bus.
pub struct Subscription {
    rx: broadcast::Receiver<EventMessage>,
    dropped: u64,
}

impl Subscription {
    /// Receive the next message, skipping over dropped ones.
    ///
    /// Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when the queue is empty or closed.
    pub fn try_recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.dropped += n;
                }
                Err(_) => return None,
            }
        }
    }

    /// Messages lost to queue overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
