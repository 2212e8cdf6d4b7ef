// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control protocol for daemon communication.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload.
//! One request per connection; the daemon answers and closes.

mod request;
mod response;
mod types;
mod wire;

pub use request::Request;
pub use response::Response;
pub use types::{TaskFilter, TaskSummary, WorkerEntry};
pub use wire::{decode, encode, read_message, read_request, write_message, write_response, ProtocolError};
