// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fm-store: the state-store adapter.
//!
//! A narrow string-keyed byte store with optional TTL. Task and worker
//! documents are JSON blobs under the `task:`/`worker:` namespaces;
//! writes are last-writer-wins and serialization per task id is the
//! dispatch engine's job, not the store's.

pub mod docs;
pub mod keys;
mod memory;

pub use memory::MemoryStore;
#[cfg(any(test, feature = "test-support"))]
pub use memory::FlakyStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Store failures, classified for the caller's retry decision.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport-level failure; the caller chooses retry vs. propagate.
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    /// The stored bytes did not decode as the expected document.
    #[error("document decode failed for {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// String-keyed byte store with optional per-key TTL.
///
/// Implementations hide their transport; all calls are suspension
/// points. No compare-and-set is offered: last writer wins.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All live `(key, value)` pairs under `prefix`, sorted by key.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}
