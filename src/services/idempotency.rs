//! Process-local suppression of duplicate notifications.
//!
//! State lives for the lifetime of the process only. A restart, or a second
//! instance of the service, will process the same key again. Keys are never
//! evicted.

use crate::models::event::IdempotencyKey;
use std::{
    collections::HashSet,
    sync::{Mutex, PoisonError},
};

#[derive(Debug, Default)]
pub struct IdempotencyGuard {
    seen: Mutex<HashSet<IdempotencyKey>>,
}

impl IdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time `key` is seen and marks it; `false` for
    /// every later call. Check and mark happen under one lock.
    pub fn check_and_mark(&self, key: &IdempotencyKey) -> bool {
        // A panic elsewhere cannot leave the set half-updated, so a poisoned
        // lock is still safe to use.
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.insert(key.clone())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    fn key(generation: i64) -> IdempotencyKey {
        IdempotencyKey::new("b", "x.jpg", generation)
    }

    #[test]
    fn first_call_proceeds_and_later_calls_skip() {
        let guard = IdempotencyGuard::new();
        assert!(guard.check_and_mark(&key(5)));
        for _ in 0..10 {
            assert!(!guard.check_and_mark(&key(5)));
        }
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn new_generation_is_processed_again() {
        let guard = IdempotencyGuard::new();
        assert!(guard.check_and_mark(&key(5)));
        assert!(guard.check_and_mark(&key(6)));
        assert!(!guard.check_and_mark(&key(6)));
    }

    #[test]
    fn concurrent_callers_admit_exactly_one() {
        let guard = Arc::new(IdempotencyGuard::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = Arc::clone(&guard);
                thread::spawn(move || guard.check_and_mark(&key(42)))
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|first| *first)
            .count();
        assert_eq!(admitted, 1);
    }
}
