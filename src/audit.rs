use tokio::sync::broadcast;

use crate::model::Event;

pub const DEFAULT_AUDIT_CAPACITY: usize = 1024;

/// Fire-and-forget broadcast of committed transitions to audit subscribers.
///
/// Publishing never blocks and never fails the caller: with no subscribers the
/// event is dropped, and a subscriber that falls behind loses the oldest
/// events (it sees `RecvError::Lagged`) instead of slowing commits down.
pub struct AuditHub {
    sender: broadcast::Sender<Event>,
}

impl Default for AuditHub {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: &Event) {
        if self.sender.send(event.clone()).is_err() {
            tracing::trace!("no audit subscribers for {}", event.kind());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
