//! Persistence collaborator for the ledgers.
//!
//! Every state transition is appended as an [`Event`] before it is applied in
//! memory, so replaying a journal from the start reproduces the ledgers.

mod wal;

pub use wal::{Wal, WalJournal};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::model::Event;

#[async_trait]
pub trait Journal: Send + Sync {
    /// Durably record one event. `Ok` means the event survives a restart.
    async fn append(&self, event: &Event) -> Result<(), StorageError>;

    /// Replace the journal with a minimal event list recreating current state.
    async fn compact(&self, events: Vec<Event>) -> Result<(), StorageError>;

    async fn appends_since_compact(&self) -> u64;
}

/// Journal kept in process memory. Nothing survives the process, but the
/// recorded events can be replayed into a fresh service.
#[derive(Default)]
pub struct MemoryJournal {
    inner: Mutex<MemoryLog>,
}

#[derive(Default)]
struct MemoryLog {
    events: Vec<Event>,
    appends_since_compact: u64,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.inner.lock().await.events.clone()
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn append(&self, event: &Event) -> Result<(), StorageError> {
        let mut log = self.inner.lock().await;
        log.events.push(event.clone());
        log.appends_since_compact += 1;
        Ok(())
    }

    async fn compact(&self, events: Vec<Event>) -> Result<(), StorageError> {
        let mut log = self.inner.lock().await;
        log.events = events;
        log.appends_since_compact = 0;
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        self.inner.lock().await.appends_since_compact
    }
}

/// Memory journal that stalls every append of one event kind. Lets tests drop
/// a caller while its commit is still in flight.
#[cfg(test)]
pub(crate) struct SlowJournal {
    pub inner: MemoryJournal,
    kind: &'static str,
    delay: std::time::Duration,
}

#[cfg(test)]
impl SlowJournal {
    pub fn new(kind: &'static str, delay: std::time::Duration) -> Self {
        Self {
            inner: MemoryJournal::new(),
            kind,
            delay,
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Journal for SlowJournal {
    async fn append(&self, event: &Event) -> Result<(), StorageError> {
        if event.kind() == self.kind {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.append(event).await
    }

    async fn compact(&self, events: Vec<Event>) -> Result<(), StorageError> {
        self.inner.compact(events).await
    }

    async fn appends_since_compact(&self) -> u64 {
        self.inner.appends_since_compact().await
    }
}
