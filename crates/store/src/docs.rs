// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON codecs for the documents kept in the store.
//!
//! Documents are self-describing: the task document is the `Task`
//! struct itself, the worker document the `WorkerRecord`. Encoding
//! never fails for these types; decoding surfaces `StoreError::Codec`
//! with the offending key so operators can find the bad blob.

use crate::StoreError;
use fm_core::{Task, WorkerRecord};

pub fn encode_task(task: &Task) -> Vec<u8> {
    serde_json::to_vec(task).unwrap_or_default()
}

pub fn decode_task(key: &str, bytes: &[u8]) -> Result<Task, StoreError> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Codec { key: key.to_string(), source })
}

pub fn encode_worker(record: &WorkerRecord) -> Vec<u8> {
    serde_json::to_vec(record).unwrap_or_default()
}

pub fn decode_worker(key: &str, bytes: &[u8]) -> Result<WorkerRecord, StoreError> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Codec { key: key.to_string(), source })
}
