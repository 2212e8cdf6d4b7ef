// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fm-bus: the message-bus adapter.
//!
//! The contract the daemon consumes: at-least-once delivery, ordering
//! within a partition, keyed routing (same key ⇒ same partition), and
//! per-group offset commits. [`MemoryBus`] is the in-process
//! implementation used by single-node deployments and every test; a
//! broker-backed adapter implements the same two traits.

pub mod topics;
mod memory;

pub use memory::MemoryBus;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Bus failures, classified so callers can decide to retry.
#[derive(Debug, Error)]
pub enum BusError {
    /// Momentary failure; retry with a small backoff is reasonable.
    #[error("bus transient error: {0}")]
    Transient(String),

    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// The bus is shutting down; no further delivery will happen.
    #[error("bus closed")]
    Closed,
}

impl BusError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::Transient(_))
    }
}

/// One delivered message.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

/// Producer/consumer handle onto the bus.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Append a keyed message. Same key always lands on the same
    /// partition of the topic.
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Join `group` on `topic`. Each group sees every record at least
    /// once; delivery resumes from the group's committed offsets.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>, BusError>;

    /// Mark `offset` (and everything before it) on `partition` as
    /// processed for `group`. Uncommitted records are redelivered after
    /// a nack or a re-subscribe.
    async fn commit(&self, topic: &str, group: &str, partition: u32, offset: u64) -> Result<(), BusError>;
}

/// A consumer-group membership. Polling is the only suspension point;
/// not polling is how a paused consumer applies backpressure, leaving
/// broker-side lag to act as the queue.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next undelivered records, up to `max` of them.
    /// Records come back in partition order within each partition.
    async fn poll(&mut self, max: usize) -> Result<Vec<Record>, BusError>;

    /// Rewind delivery for one partition to its committed offset, so
    /// everything uncommitted is redelivered on the next poll.
    fn nack(&mut self, partition: u32);
}
