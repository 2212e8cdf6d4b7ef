// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket client for the daemon control protocol.

use anyhow::{bail, Context, Result};
use fm_daemon::protocol::{self, Request, Response};
use std::path::PathBuf;
use tokio::net::UnixStream;

/// Resolve the daemon socket path.
pub fn socket_path(state_dir: Option<&PathBuf>) -> Result<PathBuf> {
    let dir = match state_dir {
        Some(dir) => dir.clone(),
        None => fm_daemon::env::state_dir().context("could not determine the state directory")?,
    };
    Ok(fm_daemon::config::socket_path(&dir))
}

/// One request/response exchange over a fresh connection.
pub async fn request(state_dir: Option<&PathBuf>, request: Request) -> Result<Response> {
    let socket = socket_path(state_dir)?;
    let mut stream = UnixStream::connect(&socket)
        .await
        .with_context(|| format!("connecting to {} (is fmd running?)", socket.display()))?;

    let body = protocol::encode(&request)?;
    protocol::write_message(&mut stream, &body).await?;
    let reply = protocol::read_message(&mut stream).await?;
    Ok(protocol::decode(&reply)?)
}

/// Exchange, then surface daemon-side errors as command failures.
pub async fn expect_ok(state_dir: Option<&PathBuf>, req: Request) -> Result<Response> {
    match request(state_dir, req).await? {
        Response::Error { message } => bail!("daemon error: {message}"),
        response => Ok(response),
    }
}
