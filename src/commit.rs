use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::audit::AuditHub;
use crate::error::{CoreError, StorageError};
use crate::journal::Journal;
use crate::model::Event;

/// A held critical section: the shared commit gate plus one key's write lock.
pub struct Locked<T> {
    _permit: OwnedRwLockReadGuard<()>,
    guard: OwnedRwLockWriteGuard<T>,
}

impl<T> Deref for Locked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for Locked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// The single write path shared by the ledgers.
///
/// Lock order is always gate (shared) then key (exclusive). Compaction takes
/// the gate exclusively, so it never observes a journaled-but-unapplied event.
pub struct Committer {
    journal: Arc<dyn Journal>,
    audit: Arc<AuditHub>,
    gate: Arc<RwLock<()>>,
    lock_timeout: Duration,
}

impl Committer {
    pub fn new(journal: Arc<dyn Journal>, audit: Arc<AuditHub>, lock_timeout: Duration) -> Self {
        Self {
            journal,
            audit,
            gate: Arc::new(RwLock::new(())),
            lock_timeout,
        }
    }

    /// Memory journal, default audit hub, two second lock wait.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(crate::journal::MemoryJournal::new()),
            Arc::new(AuditHub::default()),
            Duration::from_secs(2),
        )
    }

    pub fn journal(&self) -> &Arc<dyn Journal> {
        &self.journal
    }

    pub fn audit(&self) -> &Arc<AuditHub> {
        &self.audit
    }

    /// Enter the critical section for `key`, waiting at most `lock_timeout`.
    /// On timeout nothing has been touched and the caller may retry.
    pub async fn lock<T>(&self, key: Ulid, state: Arc<RwLock<T>>) -> Result<Locked<T>, CoreError> {
        let gate = self.gate.clone();
        let acquire = async move {
            let permit = gate.read_owned().await;
            let guard = state.write_owned().await;
            Locked {
                _permit: permit,
                guard,
            }
        };
        match tokio::time::timeout(self.lock_timeout, acquire).await {
            Ok(locked) => Ok(locked),
            Err(_) => {
                metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                tracing::warn!(%key, timeout_ms = self.lock_timeout.as_millis() as u64, "lock wait timed out");
                Err(CoreError::LockTimeout { key })
            }
        }
    }

    /// Journal `event`, apply it to the locked state, publish it to audit.
    ///
    /// Runs as a detached task that owns the lock: if the caller's future is
    /// dropped mid-commit the task still finishes, so an event is either
    /// journaled and applied or neither. A journal failure applies nothing.
    pub async fn commit<T, R, F>(&self, locked: Locked<T>, event: Event, apply: F) -> Result<R, CoreError>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
        F: FnOnce(&mut T, &Event) -> R + Send + 'static,
    {
        let journal = self.journal.clone();
        let audit = self.audit.clone();
        let task = tokio::spawn(async move {
            let mut locked = locked;
            journal.append(&event).await?;
            let out = apply(&mut *locked, &event);
            audit.publish(&event);
            drop(locked);
            Ok::<R, StorageError>(out)
        });

        match task.await {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(e)) => {
                tracing::error!("journal append failed: {e}");
                Err(e.into())
            }
            Err(join) => Err(StorageError::CommitAborted(join.to_string()).into()),
        }
    }

    /// Block every new commit until the returned guard is dropped.
    pub async fn exclusive(&self) -> OwnedRwLockWriteGuard<()> {
        self.gate.clone().write_owned().await
    }
}
