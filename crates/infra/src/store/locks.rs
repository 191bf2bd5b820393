//! Keyed exclusive locks with bounded waits.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use super::{LockKey, StoreError};

/// Table of currently held row locks.
///
/// Ownership is tracked by the caller (a transaction remembers what it took);
/// this table only knows which keys are taken.
#[derive(Debug, Default)]
pub struct KeyLocks {
    held: Mutex<HashSet<LockKey>>,
    released: Condvar,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `key` is free, then take it.
    ///
    /// Fails with `LockTimeout` once `timeout` has elapsed.
    pub fn acquire(&self, key: LockKey, timeout: Duration) -> Result<(), StoreError> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock().map_err(|_| StoreError::Poisoned)?;

        while held.contains(&key) {
            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::LockTimeout(key));
            }

            debug!(%key, "waiting for row lock");
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|_| StoreError::Poisoned)?;
            held = guard;
        }

        held.insert(key);
        Ok(())
    }

    /// Release every key in `keys`. Never fails: a poisoned table is recovered
    /// so that waiters are not stranded.
    pub fn release_all<'a>(&self, keys: impl IntoIterator<Item = &'a LockKey>) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            held.remove(key);
        }
        drop(held);
        self.released.notify_all();
    }

    pub fn is_held(&self, key: &LockKey) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(key))
            .unwrap_or(false)
    }
}
