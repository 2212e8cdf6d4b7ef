// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process bus implementation.

use crate::{topics, Bus, BusError, Record, Subscription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

/// FNV-1a over the record key; stable across processes so the same key
/// always routes to the same partition.
fn partition_for(key: &str, partitions: u32) -> u32 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    (hash % u64::from(partitions.max(1))) as u32
}

struct StoredRecord {
    key: String,
    payload: Vec<u8>,
    headers: HashMap<String, String>,
}

/// Per-partition consumer-group position.
///
/// `delivered` races ahead as records are handed out; `committed` only
/// moves on explicit commit. A nack pulls `delivered` back down to
/// `committed`, which is what makes redelivery work.
#[derive(Clone, Copy, Default)]
struct Cursor {
    delivered: u64,
    committed: u64,
}

struct TopicState {
    partitions: Vec<Vec<StoredRecord>>,
    groups: HashMap<String, Vec<Cursor>>,
}

impl TopicState {
    fn new(partition_count: u32) -> Self {
        Self {
            partitions: (0..partition_count).map(|_| Vec::new()).collect(),
            groups: HashMap::new(),
        }
    }
}

struct Inner {
    topics: Mutex<HashMap<String, TopicState>>,
    notify: Notify,
}

/// Partitioned, ordered-per-partition, at-least-once in-memory log.
///
/// Ships pre-seeded with the standard topics; [`MemoryBus::with_topic`]
/// adds or resizes one (tests use a single partition to pin ordering).
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        let bus = Self { inner: Arc::new(Inner { topics: Mutex::new(HashMap::new()), notify: Notify::new() }) };
        bus.with_topic(topics::TASKS, topics::TASKS_PARTITIONS)
            .with_topic(topics::COMMANDS, topics::COMMANDS_PARTITIONS)
            .with_topic(topics::SERVER_REGISTRY, topics::SERVER_REGISTRY_PARTITIONS)
    }

    /// Declare a topic with an explicit partition count. Re-declaring an
    /// existing topic replaces it only when it is still empty.
    pub fn with_topic(self, name: &str, partitions: u32) -> Self {
        {
            let mut topics = self.inner.topics.lock();
            let replace = match topics.get(name) {
                Some(existing) => existing.partitions.iter().all(Vec::is_empty),
                None => true,
            };
            if replace {
                topics.insert(name.to_string(), TopicState::new(partitions));
            }
        }
        self
    }

    /// Total records ever published to a topic (test helper).
    pub fn depth(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map(|t| t.partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BusError> {
        {
            let mut topics = self.inner.topics.lock();
            let state = topics
                .get_mut(topic)
                .ok_or_else(|| BusError::UnknownTopic(topic.to_string()))?;
            let partition = partition_for(key, state.partitions.len() as u32) as usize;
            state.partitions[partition].push(StoredRecord {
                key: key.to_string(),
                payload,
                headers: HashMap::new(),
            });
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>, BusError> {
        {
            let mut topics = self.inner.topics.lock();
            let state = topics
                .get_mut(topic)
                .ok_or_else(|| BusError::UnknownTopic(topic.to_string()))?;
            let partition_count = state.partitions.len();
            state
                .groups
                .entry(group.to_string())
                .or_insert_with(|| vec![Cursor::default(); partition_count]);
        }
        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            topic: topic.to_string(),
            group: group.to_string(),
        }))
    }

    async fn commit(&self, topic: &str, group: &str, partition: u32, offset: u64) -> Result<(), BusError> {
        let mut topics = self.inner.topics.lock();
        let state = topics
            .get_mut(topic)
            .ok_or_else(|| BusError::UnknownTopic(topic.to_string()))?;
        let Some(cursors) = state.groups.get_mut(group) else {
            return Err(BusError::Transient(format!("group {group} not subscribed to {topic}")));
        };
        let Some(cursor) = cursors.get_mut(partition as usize) else {
            return Err(BusError::Transient(format!("partition {partition} out of range for {topic}")));
        };
        cursor.committed = cursor.committed.max(offset + 1);
        cursor.delivered = cursor.delivered.max(cursor.committed);
        Ok(())
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    topic: String,
    group: String,
}

impl MemorySubscription {
    fn take(&self, max: usize) -> Vec<Record> {
        let mut out = Vec::new();
        let mut topics = self.inner.topics.lock();
        let Some(state) = topics.get_mut(&self.topic) else {
            return out;
        };
        // partitions borrows alongside the group cursors, so split fields
        let TopicState { partitions, groups } = state;
        let Some(cursors) = groups.get_mut(&self.group) else {
            return out;
        };
        for (p, log) in partitions.iter().enumerate() {
            let cursor = &mut cursors[p];
            while (cursor.delivered as usize) < log.len() && out.len() < max {
                let offset = cursor.delivered;
                let stored = &log[offset as usize];
                out.push(Record {
                    topic: self.topic.clone(),
                    partition: p as u32,
                    offset,
                    key: stored.key.clone(),
                    payload: stored.payload.clone(),
                    headers: stored.headers.clone(),
                });
                cursor.delivered += 1;
            }
            if out.len() >= max {
                break;
            }
        }
        out
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn poll(&mut self, max: usize) -> Result<Vec<Record>, BusError> {
        loop {
            // Register for wakeups before checking, so a publish racing
            // the check cannot be missed.
            let notified = self.inner.notify.notified();
            let records = self.take(max);
            if !records.is_empty() {
                return Ok(records);
            }
            notified.await;
        }
    }

    fn nack(&mut self, partition: u32) {
        let mut topics = self.inner.topics.lock();
        if let Some(state) = topics.get_mut(&self.topic) {
            if let Some(cursor) = state
                .groups
                .get_mut(&self.group)
                .and_then(|cursors| cursors.get_mut(partition as usize))
            {
                cursor.delivered = cursor.committed;
            }
        }
        self.inner.notify.notify_waiters();
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
