// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for the control socket.
//!
//! Accepts connections without blocking the engine loops. One request
//! per connection: read, handle, respond, close (the `fm` CLI opens a
//! fresh connection per command).

mod requests;

pub use requests::handle_request;

use crate::engine::Engine;
use crate::env::ipc_timeout;
use crate::protocol::{self, ProtocolError};
use crate::workers::WorkerRegistry;
use fm_bus::Bus;
use fm_core::Clock;
use fm_store::StateStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

/// Shared daemon context for all request handlers.
pub struct ListenCtx<C: Clock> {
    pub engine: Engine<C>,
    pub workers: WorkerRegistry<C>,
    pub bus: Arc<dyn Bus>,
    pub store: Arc<dyn StateStore>,
    pub clock: C,
    pub log_path: PathBuf,
    pub start_time: Instant,
    /// Notified when a client requests shutdown.
    pub shutdown: Arc<Notify>,
}

/// Errors from connection handling.
#[derive(Debug, Error)]
pub(crate) enum ConnectionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Listener task accepting socket connections.
pub struct Listener<C: Clock> {
    unix: UnixListener,
    ctx: Arc<ListenCtx<C>>,
}

impl<C: Clock> Listener<C> {
    pub fn new(unix: UnixListener, ctx: Arc<ListenCtx<C>>) -> Self {
        Self { unix, ctx }
    }

    /// Accept until the task is dropped, spawning per connection.
    pub async fn run(self) {
        loop {
            match self.unix.accept().await {
                Ok((stream, _)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        let (reader, writer) = stream.into_split();
                        if let Err(e) = handle_connection(reader, writer, &ctx).await {
                            log_connection_error(e);
                        }
                    });
                }
                Err(e) => error!("accept error: {}", e),
            }
        }
    }
}

fn log_connection_error(e: ConnectionError) {
    match e {
        ConnectionError::Protocol(ProtocolError::ConnectionClosed) => {
            debug!("client disconnected")
        }
        ConnectionError::Protocol(ProtocolError::Timeout) => warn!("connection timeout"),
        _ => error!("connection error: {}", e),
    }
}

/// Handle one client connection: a single request/response exchange.
async fn handle_connection<C, R, W>(
    mut reader: R,
    mut writer: W,
    ctx: &ListenCtx<C>,
) -> Result<(), ConnectionError>
where
    C: Clock,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request = protocol::read_request(&mut reader, ipc_timeout()).await?;
    let response = handle_request(request, ctx).await;
    protocol::write_response(&mut writer, &response).await?;
    Ok(())
}

#[cfg(test)]
#[path = "requests_tests.rs"]
mod tests;
