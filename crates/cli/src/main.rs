// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fm: command-line client for the Foreman daemon.

mod client;
mod output;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use fm_core::{TaskId, TaskState};
use fm_daemon::protocol::{Request, Response, TaskFilter};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fm", version, about = "Client for the Foreman task control plane")]
struct Cli {
    /// Override the daemon state directory
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Submit a task
    Submit {
        /// Handler kind
        #[arg(long)]
        kind: String,
        /// Payload text (use --payload-file for binary data)
        #[arg(long, default_value = "")]
        payload: String,
        /// Read the payload from a file
        #[arg(long, conflicts_with = "payload")]
        payload_file: Option<PathBuf>,
        /// Explicit task id (defaults to a generated one)
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value_t = 0)]
        priority: u8,
        #[arg(long, default_value = "text/plain")]
        content_type: String,
        /// Absolute deadline, epoch milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },

    /// Cancel a task (idempotent)
    Cancel { id: String },

    /// Show one task document
    Status { id: String },

    /// List task documents
    List {
        /// Filter by state (pending, assigned, processing, completed, failed, cancelled)
        #[arg(long)]
        state: Option<String>,
        /// Filter by handler kind
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Pause admission on every engine instance
    Pause,

    /// Resume admission
    Resume,

    /// Engine status and counters
    System,

    /// Update runtime configuration (key=value pairs)
    Config {
        /// e.g. max_concurrent_tasks=4 retry.factor=1.5 paused=true
        #[arg(required = true)]
        changes: Vec<String>,
    },

    /// Discover healthy workers covering a capability set
    Workers {
        /// Required capability (repeatable)
        #[arg(long = "cap")]
        capabilities: Vec<String>,
    },

    /// List every known worker server
    Servers,

    /// Counter snapshot
    Metrics,

    /// Tail the daemon log
    Logs {
        #[arg(long)]
        lines: Option<usize>,
    },

    /// Daemon health summary
    Health,

    /// Delete terminal task documents
    Prune {
        /// Delete regardless of age
        #[arg(long)]
        all: bool,
        /// Preview only
        #[arg(long)]
        dry_run: bool,
    },

    /// Daemon process status
    Daemon {
        #[command(subcommand)]
        command: DaemonCmd,
    },
}

#[derive(Subcommand)]
enum DaemonCmd {
    /// Show daemon status
    Status,
    /// Request a graceful shutdown
    Stop,
    /// Check the daemon answers
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let dir = cli.state_dir.as_ref();

    match cli.command {
        Cmd::Submit { kind, payload, payload_file, id, priority, content_type, deadline_ms } => {
            let payload = match payload_file {
                Some(path) => std::fs::read(&path)?,
                None => payload.into_bytes(),
            };
            let request = Request::Submit {
                id: id.map(TaskId::new),
                kind,
                payload,
                content_type,
                priority,
                deadline_ms,
            };
            match client::expect_ok(dir, request).await? {
                Response::Submitted { id, state } => println!("{id} {state}"),
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Cmd::Cancel { id } => {
            match client::expect_ok(dir, Request::Cancel { id: TaskId::new(id) }).await? {
                Response::Cancelled { id, message } => println!("{id}: {message}"),
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Cmd::Status { id } => {
            match client::expect_ok(dir, Request::GetTaskStatus { id: TaskId::new(&id) }).await? {
                Response::Task { task: Some(task) } => output::print_task(&task),
                Response::Task { task: None } => bail!("task {id} not found"),
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Cmd::List { state, kind, limit } => {
            let state = state.map(|s| parse_state(&s)).transpose()?;
            let request = Request::ListTasks { filter: TaskFilter { state, kind, limit } };
            match client::expect_ok(dir, request).await? {
                Response::Tasks { tasks } => output::print_task_table(&tasks),
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Cmd::Pause => {
            client::expect_ok(dir, Request::Pause).await?;
            println!("paused");
        }

        Cmd::Resume => {
            client::expect_ok(dir, Request::Resume).await?;
            println!("resumed");
        }

        Cmd::System => match client::expect_ok(dir, Request::GetSystemStatus).await? {
            Response::SystemStatus { paused, active_tasks, queued_tasks, stats } => {
                println!("paused:    {paused}");
                println!("active:    {active_tasks}");
                println!("queued:    {queued_tasks}");
                println!("processed: {}", stats.processed);
                println!("failed:    {}", stats.failed);
                println!("retries:   {}", stats.retries);
            }
            other => bail!("unexpected response: {other:?}"),
        },

        Cmd::Config { changes } => {
            let changes = parse_changes(&changes)?;
            client::expect_ok(dir, Request::UpdateConfig { changes }).await?;
            println!("updated");
        }

        Cmd::Workers { capabilities } => {
            match client::expect_ok(dir, Request::DiscoverWorkers { capabilities }).await? {
                Response::Workers { workers } => output::print_worker_table(&workers),
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Cmd::Servers => match client::expect_ok(dir, Request::DiscoverServers).await? {
            Response::Workers { workers } => output::print_worker_table(&workers),
            other => bail!("unexpected response: {other:?}"),
        },

        Cmd::Metrics => match client::expect_ok(dir, Request::GetMetrics).await? {
            Response::Metrics { points } => {
                for point in points {
                    println!("{} {}", point.name, point.value);
                }
            }
            other => bail!("unexpected response: {other:?}"),
        },

        Cmd::Logs { lines } => match client::expect_ok(dir, Request::GetLogs { lines }).await? {
            Response::Logs { content } => println!("{content}"),
            other => bail!("unexpected response: {other:?}"),
        },

        Cmd::Health => match client::expect_ok(dir, Request::CheckHealth).await? {
            Response::Health { status, timestamp_ms, stats, active_tasks } => {
                println!("status:    {status}");
                println!("time:      {timestamp_ms}");
                println!("active:    {active_tasks}");
                println!("processed: {}", stats.processed);
            }
            other => bail!("unexpected response: {other:?}"),
        },

        Cmd::Prune { all, dry_run } => {
            match client::expect_ok(dir, Request::PruneTasks { all, dry_run }).await? {
                Response::TasksPruned { pruned, skipped } => {
                    let verb = if dry_run { "would prune" } else { "pruned" };
                    println!("{verb} {pruned}, kept {skipped}");
                }
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Cmd::Daemon { command } => match command {
            DaemonCmd::Status => match client::expect_ok(dir, Request::Status).await? {
                Response::Status { uptime_secs, version, paused, active_tasks, queued_tasks, workers } => {
                    println!("version: {version}");
                    println!("uptime:  {uptime_secs}s");
                    println!("paused:  {paused}");
                    println!("active:  {active_tasks}");
                    println!("queued:  {queued_tasks}");
                    println!("workers: {workers}");
                }
                other => bail!("unexpected response: {other:?}"),
            },
            DaemonCmd::Stop => {
                match client::expect_ok(dir, Request::Shutdown).await? {
                    Response::ShuttingDown => println!("shutting down"),
                    other => bail!("unexpected response: {other:?}"),
                }
            }
            DaemonCmd::Ping => {
                client::expect_ok(dir, Request::Ping).await?;
                println!("pong");
            }
        },
    }
    Ok(())
}

fn parse_state(s: &str) -> Result<TaskState> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| anyhow::anyhow!("unknown state: {s}"))
}

/// Parse `key=value` pairs into UpdateConfig changes. Values are read
/// as JSON when they parse, strings otherwise.
fn parse_changes(pairs: &[String]) -> Result<HashMap<String, serde_json::Value>> {
    let mut changes = HashMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("expected key=value, got: {pair}");
        };
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        changes.insert(key.to_string(), value);
    }
    Ok(changes)
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
