// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Async mutexes keyed by payment token or device id
//!
//! A slot is created on first use and dropped again by the last guard to
//! release it, so the map only holds keys that are locked or awaited.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Slot = Arc<Mutex<()>>;

pub struct KeyedLocks<K: Eq + Hash> {
    slots: Arc<DashMap<K, Slot>>,
}

impl<K: Eq + Hash> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<K: Eq + Hash> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: K) -> KeyedGuard<K> {
        let slot = self.slots.entry(key.clone()).or_default().value().clone();
        let guard = slot.lock_owned().await;
        KeyedGuard {
            key,
            guard: Some(guard),
            slots: self.slots.clone(),
        }
    }

    /// Lock every key in ascending order. Callers locking overlapping sets
    /// this way cannot deadlock each other.
    pub async fn lock_all(&self, keys: &[K]) -> Vec<KeyedGuard<K>>
    where
        K: Ord,
    {
        let mut ordered = keys.to_vec();
        ordered.sort();
        ordered.dedup();
        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Keys currently locked or awaited
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

pub struct KeyedGuard<K: Eq + Hash> {
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<DashMap<K, Slot>>,
}

impl<K: Eq + Hash> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone of the slot; only the map's is left
        // once nobody is queued.
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn released_keys_are_pruned() {
        let locks: KeyedLocks<&str> = KeyedLocks::new();
        {
            let _a = locks.lock("tok_a").await;
            let _b = locks.lock("tok_b").await;
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks: KeyedLocks<u32> = KeyedLocks::new();
        let held = locks.lock(7).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(7).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert_eq!(locks.len(), 1);

        drop(held);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn lock_all_ignores_order_and_repeats() {
        let locks: KeyedLocks<u32> = KeyedLocks::new();
        let guards = locks.lock_all(&[3, 1, 3, 2]).await;
        assert_eq!(guards.len(), 3);
        assert_eq!(locks.len(), 3);
        drop(guards);
        assert!(locks.is_empty());
    }
}
