//! Attempt storage behind the login rate limiter.
//!
//! The limiter only talks to [`AttemptStore`], so a deployment running several
//! gateway instances can swap the in-memory map for a shared keyed store
//! without touching the gating algorithm.

use anyhow::Result;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Attempt bookkeeping for one client identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoginAttempt {
    pub count: u32,
    pub first_attempt: Instant,
    pub last_attempt: Instant,
    pub blocked: bool,
    pub block_expires: Option<Instant>,
}

impl LoginAttempt {
    /// Empty record for a client seen for the first time.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            count: 0,
            first_attempt: now,
            last_attempt: now,
            blocked: false,
            block_expires: None,
        }
    }

    /// Start over after an expired block.
    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }

    /// Whether the sweep may drop this record.
    ///
    /// Unblocked records go after `2 × window` of inactivity; blocked ones once
    /// their block has been over for longer than `window`.
    #[must_use]
    pub fn is_stale(&self, now: Instant, window: Duration) -> bool {
        if self.blocked {
            match self.block_expires {
                Some(expires) => now.saturating_duration_since(expires) > window,
                None => true,
            }
        } else {
            now.saturating_duration_since(self.last_attempt) > window.saturating_mul(2)
        }
    }
}

/// Keyed storage for [`LoginAttempt`] records.
pub trait AttemptStore: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns an error if the backing store cannot be read.
    fn get(&self, client_id: &str) -> Result<Option<LoginAttempt>>;

    /// # Errors
    /// Returns an error if the backing store cannot be written.
    fn set(&self, client_id: &str, attempt: LoginAttempt) -> Result<()>;

    /// # Errors
    /// Returns an error if the backing store cannot be written.
    fn delete(&self, client_id: &str) -> Result<()>;

    /// Read, change and write back one record as a single step.
    ///
    /// `apply` sees the current record (`None` if absent) and edits it in
    /// place; leaving `None` removes the record. No other call for the same
    /// client may interleave between the read and the write.
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be read or written.
    fn update(
        &self,
        client_id: &str,
        apply: &mut dyn FnMut(&mut Option<LoginAttempt>),
    ) -> Result<()>;

    /// Drop every stale record and return how many were removed.
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be scanned.
    fn sweep(&self, now: Instant, window: Duration) -> Result<usize>;
}

/// Process-local store. Limits are per gateway instance.
#[derive(Debug, Default)]
pub struct MemoryAttemptStore {
    entries: Mutex<HashMap<String, LoginAttempt>>,
}

impl MemoryAttemptStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AttemptStore for MemoryAttemptStore {
    fn get(&self, client_id: &str) -> Result<Option<LoginAttempt>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(client_id).copied())
    }

    fn set(&self, client_id: &str, attempt: LoginAttempt) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(client_id.to_string(), attempt);
        Ok(())
    }

    fn delete(&self, client_id: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(client_id);
        Ok(())
    }

    fn update(
        &self,
        client_id: &str,
        apply: &mut dyn FnMut(&mut Option<LoginAttempt>),
    ) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut slot = entries.get(client_id).copied();
        apply(&mut slot);
        match slot {
            Some(attempt) => {
                entries.insert(client_id.to_string(), attempt);
            }
            None => {
                entries.remove(client_id);
            }
        }
        Ok(())
    }

    fn sweep(&self, now: Instant, window: Duration) -> Result<usize> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, attempt| !attempt.is_stale(now, window));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(5 * 60);

    #[test]
    fn idle_unblocked_records_expire_after_two_windows() {
        let start = Instant::now();
        let attempt = LoginAttempt::new(start);
        assert!(!attempt.is_stale(start + WINDOW * 2, WINDOW));
        assert!(attempt.is_stale(start + WINDOW * 2 + Duration::from_secs(1), WINDOW));
    }

    #[test]
    fn blocked_records_expire_one_window_after_block_ends() {
        let start = Instant::now();
        let expires = start + Duration::from_secs(15 * 60);
        let attempt = LoginAttempt {
            count: 6,
            first_attempt: start,
            last_attempt: start,
            blocked: true,
            block_expires: Some(expires),
        };
        // Still blocked: idle time alone must not free it.
        assert!(!attempt.is_stale(start + WINDOW * 3, WINDOW));
        assert!(!attempt.is_stale(expires + WINDOW, WINDOW));
        assert!(attempt.is_stale(expires + WINDOW + Duration::from_secs(1), WINDOW));
    }

    #[test]
    fn memory_store_get_set_delete() -> Result<()> {
        let store = MemoryAttemptStore::new();
        let now = Instant::now();
        assert_eq!(store.get("1.2.3.4")?, None);

        let mut attempt = LoginAttempt::new(now);
        attempt.count = 2;
        store.set("1.2.3.4", attempt)?;
        assert_eq!(store.get("1.2.3.4")?.map(|a| a.count), Some(2));
        assert_eq!(store.len(), 1);

        store.delete("1.2.3.4")?;
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn update_edits_creates_and_removes() -> Result<()> {
        let store = MemoryAttemptStore::new();
        let now = Instant::now();

        store.update("1.2.3.4", &mut |slot| {
            assert!(slot.is_none());
            *slot = Some(LoginAttempt::new(now));
        })?;
        store.update("1.2.3.4", &mut |slot| {
            if let Some(attempt) = slot {
                attempt.count += 3;
            }
        })?;
        assert_eq!(store.get("1.2.3.4")?.map(|a| a.count), Some(3));

        store.update("1.2.3.4", &mut |slot| *slot = None)?;
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn sweep_only_removes_stale_records() -> Result<()> {
        let store = MemoryAttemptStore::new();
        let start = Instant::now();
        store.set("old", LoginAttempt::new(start))?;
        store.set("recent", LoginAttempt::new(start + WINDOW * 2))?;

        let removed = store.sweep(start + WINDOW * 3, WINDOW)?;
        assert_eq!(removed, 1);
        assert_eq!(store.get("old")?, None);
        assert!(store.get("recent")?.is_some());
        Ok(())
    }
}
