//! Per-item lock table.
//!
//! One logical lock per [`ItemKey`], created lazily and never reclaimed.
//! Waiting is bounded: a writer that cannot get the lock within its timeout
//! gets [`LedgerError::Timeout`] back instead of queueing forever behind a
//! stuck peer.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use partsledger_core::{ItemKey, LedgerError, LedgerResult};

#[derive(Debug, Default)]
struct LockState {
    busy: Mutex<bool>,
    wake: Condvar,
}

/// Lock table keyed by stock item.
///
/// Holding a [`KeyGuard`] means no other thread mutates that item through
/// this table until the guard drops. Distinct keys never contend.
#[derive(Debug, Default)]
pub struct KeyedLock {
    locks: Mutex<HashMap<ItemKey, Arc<LockState>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the key is free, up to `timeout`.
    ///
    /// Returns `Timeout` with the actual wait once the deadline passes.
    pub fn acquire(&self, key: &ItemKey, timeout: Duration) -> LedgerResult<KeyGuard> {
        let state = self.state_for(key)?;
        let start = Instant::now();
        let deadline = start + timeout;

        let mut busy = state
            .busy
            .lock()
            .map_err(|_| LedgerError::storage("item lock poisoned"))?;
        while *busy {
            let now = Instant::now();
            if now >= deadline {
                return Err(LedgerError::Timeout {
                    waited: start.elapsed(),
                });
            }
            // Re-checks the flag on every wakeup; spurious wakeups just loop.
            let (reacquired, _) = state
                .wake
                .wait_timeout(busy, deadline - now)
                .map_err(|_| LedgerError::storage("item lock poisoned"))?;
            busy = reacquired;
        }
        *busy = true;
        drop(busy);

        Ok(KeyGuard { state })
    }

    fn state_for(&self, key: &ItemKey) -> LedgerResult<Arc<LockState>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| LedgerError::storage("lock table poisoned"))?;
        Ok(locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(LockState::default()))
            .clone())
    }
}

/// Exclusive hold on one item. Releases and wakes a waiter on drop.
#[derive(Debug)]
pub struct KeyGuard {
    state: Arc<LockState>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        if let Ok(mut busy) = self.state.busy.lock() {
            *busy = false;
            self.state.wake.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partsledger_core::{PartNumber, StoreId};
    use std::sync::mpsc;
    use std::thread;

    fn test_key(part: &str) -> ItemKey {
        ItemKey::new(
            StoreId::new("mjm").unwrap(),
            PartNumber::new(part).unwrap(),
        )
    }

    #[test]
    fn key_is_reusable_after_release() {
        let locks = KeyedLock::new();
        let key = test_key("15400-RAF-T01");

        let guard = locks.acquire(&key, Duration::from_millis(50)).unwrap();
        drop(guard);
        let _again = locks.acquire(&key, Duration::from_millis(50)).unwrap();
    }

    #[test]
    fn held_key_times_out_for_a_second_writer() {
        let locks = Arc::new(KeyedLock::new());
        let key = test_key("15400-RAF-T01");
        let _held = locks.acquire(&key, Duration::from_millis(50)).unwrap();

        let contender = Arc::clone(&locks);
        let contender_key = key.clone();
        let result = thread::spawn(move || {
            contender.acquire(&contender_key, Duration::from_millis(30))
        })
        .join()
        .unwrap();

        match result {
            Err(LedgerError::Timeout { waited }) => {
                assert!(waited >= Duration::from_millis(30));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn distinct_keys_never_contend() {
        let locks = KeyedLock::new();
        let _oil_filter = locks
            .acquire(&test_key("15400-RAF-T01"), Duration::from_millis(50))
            .unwrap();
        let _spark_plug = locks
            .acquire(&test_key("NGK-7090"), Duration::from_millis(50))
            .unwrap();
    }

    #[test]
    fn waiter_wakes_when_the_guard_drops() {
        let locks = Arc::new(KeyedLock::new());
        let key = test_key("15400-RAF-T01");
        let guard = locks.acquire(&key, Duration::from_millis(50)).unwrap();

        let (acquired_tx, acquired_rx) = mpsc::channel();
        let waiter_locks = Arc::clone(&locks);
        let waiter_key = key.clone();
        let waiter = thread::spawn(move || {
            let guard = waiter_locks
                .acquire(&waiter_key, Duration::from_secs(2))
                .unwrap();
            acquired_tx.send(()).unwrap();
            drop(guard);
        });

        thread::sleep(Duration::from_millis(20));
        drop(guard);

        acquired_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("waiter should acquire after release");
        waiter.join().unwrap();
    }
}
