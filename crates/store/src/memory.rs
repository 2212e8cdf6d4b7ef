// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory store implementation.
//!
//! The default adapter for single-process deployments and tests. TTL
//! expiry is lazy: expired entries are dropped when read or listed.

use crate::{StateStore, StoreError};
use async_trait::async_trait;
use fm_core::Clock;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

struct Entry {
    value: Vec<u8>,
    expires_at_ms: Option<u64>,
}

impl Entry {
    fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_none_or(|at| now_ms < at)
    }
}

/// String-keyed in-memory store with lazy TTL expiry.
///
/// `BTreeMap` keeps `list_prefix` ordered without a sort per call.
#[derive(Clone)]
pub struct MemoryStore<C: Clock> {
    entries: Arc<Mutex<BTreeMap<String, Entry>>>,
    clock: C,
}

impl<C: Clock> MemoryStore<C> {
    pub fn new(clock: C) -> Self {
        Self { entries: Arc::new(Mutex::new(BTreeMap::new())), clock }
    }

    /// Number of live entries (test/stats helper).
    pub fn len(&self) -> usize {
        let now = self.clock.epoch_ms();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<C: Clock> StateStore for MemoryStore<C> {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at_ms = ttl.map(|t| self.clock.epoch_ms() + t.as_millis() as u64);
        self.entries.lock().insert(key.to_string(), Entry { value, expires_at_ms });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = self.clock.epoch_ms();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let now = self.clock.epoch_ms();
        let entries = self.entries.lock();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect())
    }
}

/// Fault-injection wrapper: fails the next N calls with `Unavailable`.
///
/// Used by engine tests to exercise the store-failure paths without a
/// real flaky backend.
#[cfg(any(test, feature = "test-support"))]
pub struct FlakyStore<S> {
    inner: S,
    failures_left: std::sync::atomic::AtomicU32,
}

#[cfg(any(test, feature = "test-support"))]
impl<S: StateStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, failures_left: std::sync::atomic::AtomicU32::new(0) }
    }

    /// Make the next `n` store calls fail.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        use std::sync::atomic::Ordering;
        let prev = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if prev > 0 {
            Err(StoreError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl<S: StateStore> StateStore for FlakyStore<S> {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        self.check()?;
        self.inner.list_prefix(prefix).await
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
