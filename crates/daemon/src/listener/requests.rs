// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request dispatch for the control surface.

use super::ListenCtx;
use crate::config::ConfigUpdate;
use crate::env::PROTOCOL_VERSION;
use crate::protocol::{Request, Response, TaskFilter, TaskSummary, WorkerEntry};
use fm_bus::topics;
use fm_core::{CapabilitySet, Clock, Command, Event, ServerId, Task, TaskId, TaskPayload};
use fm_store::{docs, keys};
use std::time::Duration;
use tracing::{info, warn};

/// Listing cap when the filter does not set one.
const DEFAULT_LIST_LIMIT: usize = 256;
/// Default log tail length.
const DEFAULT_LOG_LINES: usize = 100;
/// Age before unforced pruning removes a terminal document.
const PRUNE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Answer one request. Never panics; failures become `Response::Error`.
pub async fn handle_request<C: Clock>(request: Request, ctx: &ListenCtx<C>) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::Hello { version } => {
            if version != PROTOCOL_VERSION {
                warn!(client = %version, daemon = PROTOCOL_VERSION, "client version mismatch");
            }
            Response::Hello { version: PROTOCOL_VERSION.to_string() }
        }

        Request::Submit { id, kind, payload, content_type, priority, deadline_ms } => {
            submit(ctx, id, kind, payload, content_type, priority, deadline_ms).await
        }

        Request::Cancel { id } => cancel(ctx, id).await,

        Request::GetTaskStatus { id } => {
            let key = keys::task_key(&id);
            match ctx.store.get(&key).await {
                Ok(Some(bytes)) => match docs::decode_task(&key, &bytes) {
                    Ok(task) => Response::Task { task: Some(Box::new(task)) },
                    Err(err) => Response::Error { message: err.to_string() },
                },
                Ok(None) => Response::Task { task: None },
                Err(err) => Response::Error { message: err.to_string() },
            }
        }

        Request::ListTasks { filter } => list_tasks(ctx, filter).await,

        Request::Pause => publish_command(ctx, Command::Pause).await,

        Request::Resume => publish_command(ctx, Command::Resume).await,

        Request::GetSystemStatus => {
            let status = ctx.engine.status();
            Response::SystemStatus {
                paused: status.paused,
                active_tasks: status.active,
                queued_tasks: status.queued,
                stats: ctx.engine.stats().snapshot(),
            }
        }

        Request::UpdateConfig { changes } => update_config(ctx, &changes).await,

        Request::DiscoverWorkers { capabilities } => {
            let required: CapabilitySet = capabilities.into_iter().collect();
            let workers = ctx.workers.discover(&required);
            Response::Workers { workers: workers.iter().map(WorkerEntry::from).collect() }
        }

        Request::GetMetrics => {
            let now = ctx.clock.epoch_ms();
            let mut points = ctx.engine.stats().snapshot().metric_points(now);
            let status = ctx.engine.status();
            points.push(crate::metrics::MetricPoint {
                name: "active_tasks".to_string(),
                value: status.active as u64,
                at_ms: now,
            });
            points.push(crate::metrics::MetricPoint {
                name: "queued_tasks".to_string(),
                value: status.queued as u64,
                at_ms: now,
            });
            Response::Metrics { points }
        }

        Request::GetLogs { lines } => {
            let limit = lines.unwrap_or(DEFAULT_LOG_LINES);
            match tokio::fs::read_to_string(&ctx.log_path).await {
                Ok(content) => {
                    let tail: Vec<&str> = content.lines().rev().take(limit).collect();
                    let tail: Vec<&str> = tail.into_iter().rev().collect();
                    Response::Logs { content: tail.join("\n") }
                }
                Err(_) => Response::Logs { content: String::new() },
            }
        }

        Request::CheckHealth => Response::Health {
            status: "ok".to_string(),
            timestamp_ms: ctx.clock.epoch_ms(),
            stats: ctx.engine.stats().snapshot(),
            active_tasks: ctx.engine.status().active,
        },

        Request::GetServerDetails { server_id } => {
            let record = ctx.workers.get(&ServerId::new(server_id));
            Response::Server { server: record.as_ref().map(|r| Box::new(WorkerEntry::from(r))) }
        }

        Request::DiscoverServers => {
            let workers = ctx.workers.snapshot();
            Response::Workers { workers: workers.iter().map(WorkerEntry::from).collect() }
        }

        Request::PruneTasks { all, dry_run } => prune_tasks(ctx, all, dry_run).await,

        Request::Status => {
            let status = ctx.engine.status();
            Response::Status {
                uptime_secs: ctx.start_time.elapsed().as_secs(),
                version: PROTOCOL_VERSION.to_string(),
                paused: status.paused,
                active_tasks: status.active,
                queued_tasks: status.queued,
                workers: ctx.workers.snapshot().len(),
            }
        }

        Request::Shutdown => {
            info!("shutdown requested over the control socket");
            ctx.shutdown.notify_one();
            Response::ShuttingDown
        }
    }
}

/// Submit: pending document first, then publish. A document that
/// already exists makes the submit a successful no-op (idempotence);
/// a store failure is the one transient error a client ever sees.
async fn submit<C: Clock>(
    ctx: &ListenCtx<C>,
    id: Option<TaskId>,
    kind: String,
    payload: Vec<u8>,
    content_type: String,
    priority: u8,
    deadline_ms: Option<u64>,
) -> Response {
    let id = id.unwrap_or_else(TaskId::generate);
    let key = keys::task_key(&id);

    match ctx.store.get(&key).await {
        Ok(Some(bytes)) => {
            return match docs::decode_task(&key, &bytes) {
                Ok(existing) => Response::Submitted { id, state: existing.state },
                Err(err) => Response::Error { message: err.to_string() },
            };
        }
        Ok(None) => {}
        Err(err) => return Response::Error { message: err.to_string() },
    }

    let now = ctx.clock.epoch_ms();
    let mut task = Task::new(id.clone(), kind, TaskPayload::new(payload, content_type), priority, now);
    task.deadline_ms = deadline_ms;

    if let Err(err) = ctx.store.put(&key, docs::encode_task(&task), None).await {
        return Response::Error { message: err.to_string() };
    }

    // Keyed by priority + enqueue time; retries re-key by task id.
    let bus_key = format!("{}-{}", task.priority, task.created_at_ms);
    let body = match serde_json::to_vec(&task) {
        Ok(body) => body,
        Err(err) => return Response::Error { message: format!("task encode failed: {err}") },
    };
    if let Err(err) = ctx.bus.publish(topics::TASKS, &bus_key, body).await {
        // The pending document stays; the startup recovery sweep or a
        // client retry will re-publish it.
        warn!(task = %task.id, %err, "task publish failed after accept");
        return Response::Error { message: err.to_string() };
    }

    ctx.engine.events().emit(Event::TaskSubmitted {
        id: task.id.clone(),
        kind: task.kind.clone(),
        priority: task.priority,
    });
    Response::Submitted { id: task.id, state: task.state }
}

/// Cancel locally and broadcast so every engine instance applies it.
async fn cancel<C: Clock>(ctx: &ListenCtx<C>, id: TaskId) -> Response {
    let outcome = ctx.engine.request_cancel(&id).await;
    let command = Command::Cancel { id: id.clone() };
    if let Err(err) = ctx.bus.publish(topics::COMMANDS, id.as_str(), command.encode()).await {
        warn!(task = %id, %err, "cancel command publish failed");
    }
    Response::Cancelled { id, message: outcome.message().to_string() }
}

async fn publish_command<C: Clock>(ctx: &ListenCtx<C>, command: Command) -> Response {
    match ctx.bus.publish(topics::COMMANDS, "control", command.encode()).await {
        Ok(()) => Response::Ok,
        Err(err) => Response::Error { message: err.to_string() },
    }
}

async fn list_tasks<C: Clock>(ctx: &ListenCtx<C>, filter: TaskFilter) -> Response {
    let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let entries = match ctx.store.list_prefix(keys::TASK_PREFIX).await {
        Ok(entries) => entries,
        Err(err) => return Response::Error { message: err.to_string() },
    };
    let mut tasks = Vec::new();
    for (key, bytes) in entries {
        match docs::decode_task(&key, &bytes) {
            Ok(task) if filter.matches(&task) => {
                tasks.push(TaskSummary::from(&task));
                if tasks.len() >= limit {
                    break;
                }
            }
            Ok(_) => {}
            Err(err) => warn!(%key, %err, "skipping undecodable task document"),
        }
    }
    Response::Tasks { tasks }
}

async fn update_config<C: Clock>(
    ctx: &ListenCtx<C>,
    changes: &std::collections::HashMap<String, serde_json::Value>,
) -> Response {
    let update = match ConfigUpdate::parse(changes) {
        Ok(update) => update,
        Err(message) => return Response::Error { message },
    };
    let merged = update.merged(
        ctx.engine.config(),
        ctx.engine.retry_policy(),
        ctx.workers.intervals(),
    );
    let (engine_config, retry, intervals) = match merged {
        Ok(merged) => merged,
        Err(message) => return Response::Error { message },
    };

    ctx.engine.set_config(engine_config);
    ctx.engine.set_retry_policy(retry);
    ctx.workers.set_intervals(intervals);
    match update.paused {
        Some(true) => ctx.engine.pause(),
        Some(false) => ctx.engine.resume().await,
        None => {}
    }
    info!(?changes, "configuration updated");
    Response::Ok
}

async fn prune_tasks<C: Clock>(ctx: &ListenCtx<C>, all: bool, dry_run: bool) -> Response {
    let entries = match ctx.store.list_prefix(keys::TASK_PREFIX).await {
        Ok(entries) => entries,
        Err(err) => return Response::Error { message: err.to_string() },
    };
    let now = ctx.clock.epoch_ms();
    let cutoff = now.saturating_sub(PRUNE_AGE.as_millis() as u64);
    let mut pruned = 0;
    let mut skipped = 0;
    for (key, bytes) in entries {
        let Ok(task) = docs::decode_task(&key, &bytes) else {
            skipped += 1;
            continue;
        };
        let old_enough = all || task.updated_at_ms <= cutoff;
        if task.state.is_terminal() && old_enough {
            if !dry_run {
                if let Err(err) = ctx.store.delete(&key).await {
                    warn!(%key, %err, "prune delete failed");
                    skipped += 1;
                    continue;
                }
            }
            pruned += 1;
        } else {
            skipped += 1;
        }
    }
    Response::TasksPruned { pruned, skipped }
}
