//! Process-wide table of open transactions.
//!
//! The tracker exists to diagnose leaked and stuck transactions: every
//! [`Tx`](crate::Tx) registers on start and deregisters when it commits,
//! rolls back or is dropped. It plays no part in concurrency control.

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{RegistryError, RegistryResult};

/// Handle returned by [`TxTracker::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TxTicket(u64);

struct TxRecord {
    registry: String,
    started: Instant,
    thread: ThreadId,
    backtrace: Backtrace,
}

/// Snapshot of a transaction that has been open too long.
#[derive(Clone, Debug)]
pub struct StuckTx {
    pub ticket: TxTicket,
    pub registry: String,
    pub age: Duration,
    /// Where the transaction was opened. Empty unless backtraces are
    /// enabled (`RUST_BACKTRACE`).
    pub backtrace: String,
}

#[derive(Default)]
pub struct TxTracker {
    active: Mutex<HashMap<TxTicket, TxRecord>>,
    next: AtomicU64,
}

impl TxTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new transaction on the current thread.
    ///
    /// With `forbid_nested`, fails if the thread already has a live
    /// transaction.
    pub fn register(&self, registry: &str, forbid_nested: bool) -> RegistryResult<TxTicket> {
        let thread = thread::current().id();
        let mut active = self.active.lock().expect("lock poisoned");
        if forbid_nested {
            if let Some(open) = active.values().find(|r| r.thread == thread) {
                return Err(RegistryError::invariant(format!(
                    "nested transaction on registry {:?} while one on {:?} is open",
                    registry, open.registry
                )));
            }
        }
        let ticket = TxTicket(self.next.fetch_add(1, Ordering::Relaxed));
        active.insert(
            ticket,
            TxRecord {
                registry: registry.to_string(),
                started: Instant::now(),
                thread,
                backtrace: Backtrace::capture(),
            },
        );
        Ok(ticket)
    }

    /// Forget a transaction. Unknown tickets are ignored.
    pub fn deregister(&self, ticket: TxTicket) {
        self.active.lock().expect("lock poisoned").remove(&ticket);
    }

    /// Number of open transactions.
    pub fn active(&self) -> usize {
        self.active.lock().expect("lock poisoned").len()
    }

    /// Transactions open for at least `max_age`, oldest first. Each is
    /// also logged.
    pub fn stuck(&self, max_age: Duration) -> Vec<StuckTx> {
        let active = self.active.lock().expect("lock poisoned");
        let mut stuck: Vec<StuckTx> = active
            .iter()
            .filter_map(|(ticket, record)| {
                let age = record.started.elapsed();
                (age >= max_age).then(|| StuckTx {
                    ticket: *ticket,
                    registry: record.registry.clone(),
                    age,
                    backtrace: record.backtrace.to_string(),
                })
            })
            .collect();
        stuck.sort_by(|a, b| b.age.cmp(&a.age));
        for tx in &stuck {
            warn!(registry = %tx.registry, age_ms = tx.age.as_millis() as u64, "transaction still open");
        }
        stuck
    }
}

impl std::fmt::Debug for TxTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxTracker")
            .field("active", &self.active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_deregister() {
        let tracker = TxTracker::new();
        let a = tracker.register("r1", false).unwrap();
        let b = tracker.register("r1", false).unwrap();
        assert_ne!(a, b);
        assert_eq!(tracker.active(), 2);
        tracker.deregister(a);
        tracker.deregister(a);
        assert_eq!(tracker.active(), 1);
    }

    #[test]
    fn nested_rejected_on_same_thread() {
        let tracker = TxTracker::new();
        let _t = tracker.register("r1", true).unwrap();
        let err = tracker.register("r2", true).unwrap_err();
        assert!(err.is_invariant());
    }

    #[test]
    fn other_threads_are_independent() {
        let tracker = std::sync::Arc::new(TxTracker::new());
        let _t = tracker.register("r1", true).unwrap();
        let t2 = std::sync::Arc::clone(&tracker);
        std::thread::spawn(move || t2.register("r1", true).map(|_| ()))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(tracker.active(), 2);
    }

    #[test]
    fn stuck_reports_old_transactions() {
        let tracker = TxTracker::new();
        let t = tracker.register("r1", false).unwrap();
        assert!(tracker.stuck(Duration::from_secs(3600)).is_empty());
        let stuck = tracker.stuck(Duration::ZERO);
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].ticket, t);
        assert_eq!(stuck[0].registry, "r1");
    }
}
