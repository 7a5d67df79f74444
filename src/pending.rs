//! Table of in-flight requests keyed by synchronization id.
//!
//! The caller registers a slot before its frame is handed to the writer and
//! waits on the returned [`Completion`]. The reader task completes slots as
//! replies arrive. Teardown cancels every slot at once and closes the table,
//! so nothing registered afterwards can wait forever.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::reply::Reply;

/// Receiving side of a pending slot.
pub type Completion = oneshot::Receiver<Result<Reply>>;

/// Why a slot could not be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("sync id {0} is already in flight")]
    InUse(u64),
    #[error("request table is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Slots {
    waiting: HashMap<u64, oneshot::Sender<Result<Reply>>>,
    closed: bool,
}

/// Concurrent map from sync id to the waiting caller.
#[derive(Debug, Default)]
pub struct PendingRequests {
    slots: Mutex<Slots>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a slot for `sync`.
    pub fn register(&self, sync: u64) -> std::result::Result<Completion, RegisterError> {
        let mut slots = self.lock();
        if slots.closed {
            return Err(RegisterError::Closed);
        }
        if slots.waiting.contains_key(&sync) {
            return Err(RegisterError::InUse(sync));
        }

        let (tx, rx) = oneshot::channel();
        slots.waiting.insert(sync, tx);
        Ok(rx)
    }

    /// Deliver the outcome for `sync`.
    ///
    /// Returns `false` if no caller is waiting on this id (it was never
    /// registered, already completed, or abandoned).
    pub fn complete(&self, sync: u64, outcome: Result<Reply>) -> bool {
        let Some(tx) = self.lock().waiting.remove(&sync) else {
            return false;
        };
        tx.send(outcome).is_ok()
    }

    /// Fail a single slot.
    pub fn cancel(&self, sync: u64, err: Error) -> bool {
        self.complete(sync, Err(err))
    }

    /// Drop the slot without notifying anyone.
    pub fn remove(&self, sync: u64) -> bool {
        self.lock().waiting.remove(&sync).is_some()
    }

    /// Fail every slot with `err` and refuse further registrations.
    ///
    /// Returns the number of callers that were still waiting.
    pub fn cancel_all(&self, err: Error) -> usize {
        let drained: Vec<_> = {
            let mut slots = self.lock();
            slots.closed = true;
            slots.waiting.drain().map(|(_, tx)| tx).collect()
        };

        drained
            .into_iter()
            .map(|tx| tx.send(Err(err.clone())).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes a slot when the waiting caller goes away early.
///
/// Held by the caller for the duration of the wait. Dropping it (deadline,
/// send failure, future cancelled) clears the slot unless the reply was
/// already taken.
pub(crate) struct PendingGuard<'a> {
    table: &'a PendingRequests,
    sync: u64,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(table: &'a PendingRequests, sync: u64) -> Self {
        Self {
            table,
            sync,
            armed: true,
        }
    }

    /// The reply arrived; the reader already removed the slot.
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.table.remove(self.sync);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply() -> Reply {
        Reply::from_rows(vec![vec![1u64.into()]]).unwrap()
    }

    #[tokio::test]
    async fn test_register_complete() {
        let table = PendingRequests::new();
        let rx = table.register(1).unwrap();
        assert_eq!(table.len(), 1);

        assert!(table.complete(1, Ok(reply())));
        assert!(table.is_empty());
        assert_eq!(rx.await.unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_sync_rejected() {
        let table = PendingRequests::new();
        let _rx = table.register(7).unwrap();
        assert_eq!(table.register(7).unwrap_err(), RegisterError::InUse(7));
    }

    #[test]
    fn test_unknown_sync_not_completed() {
        let table = PendingRequests::new();
        assert!(!table.complete(99, Ok(reply())));
    }

    #[test]
    fn test_complete_after_receiver_dropped() {
        let table = PendingRequests::new();
        drop(table.register(3).unwrap());
        assert!(!table.complete(3, Ok(reply())));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_single() {
        let table = PendingRequests::new();
        let rx = table.register(2).unwrap();
        assert!(table.cancel(2, Error::context("t:1", "deadline exceeded")));

        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Context);
    }

    #[tokio::test]
    async fn test_cancel_all_closes_table() {
        let table = PendingRequests::new();
        let a = table.register(1).unwrap();
        let b = table.register(2).unwrap();

        let cancelled = table.cancel_all(Error::closed("t:1", None));
        assert_eq!(cancelled, 2);
        assert!(table.is_closed());
        assert!(a.await.unwrap().unwrap_err().is_connection());
        assert!(b.await.unwrap().unwrap_err().is_connection());

        assert_eq!(table.register(3).unwrap_err(), RegisterError::Closed);
    }

    #[test]
    fn test_guard_removes_slot() {
        let table = PendingRequests::new();
        let _rx = table.register(5).unwrap();
        {
            let _guard = PendingGuard::new(&table, 5);
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_disarmed_guard_keeps_slot() {
        let table = PendingRequests::new();
        let _rx = table.register(5).unwrap();
        {
            let mut guard = PendingGuard::new(&table, 5);
            guard.disarm();
        }
        assert_eq!(table.len(), 1);
    }
}
