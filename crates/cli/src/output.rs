// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human-readable rendering for protocol responses.

use fm_core::Task;
use fm_daemon::protocol::{TaskSummary, WorkerEntry};

pub fn print_task(task: &Task) {
    println!("id:       {}", task.id);
    println!("kind:     {}", task.kind);
    println!("state:    {}", task.state);
    println!("priority: {}", task.priority);
    println!("attempt:  {}", task.attempt);
    println!("created:  {}", task.created_at_ms);
    println!("updated:  {}", task.updated_at_ms);
    if let Some(worker) = &task.worker_id {
        println!("worker:   {worker}");
    }
    if let Some(deadline) = task.deadline_ms {
        println!("deadline: {deadline}");
    }
    if let Some(error) = &task.last_error {
        println!("error:    {error}");
    }
    if let Some(result) = &task.result {
        match std::str::from_utf8(result) {
            Ok(text) => println!("result:   {text}"),
            Err(_) => println!("result:   {} bytes", result.len()),
        }
    }
}

pub fn print_task_table(tasks: &[TaskSummary]) {
    if tasks.is_empty() {
        println!("no tasks");
        return;
    }
    println!("{:<24} {:<12} {:<12} {:>3} {:>7}", "ID", "KIND", "STATE", "PRI", "ATTEMPT");
    for task in tasks {
        println!(
            "{:<24} {:<12} {:<12} {:>3} {:>7}",
            task.id, task.kind, task.state, task.priority, task.attempt
        );
    }
}

pub fn print_worker_table(workers: &[WorkerEntry]) {
    if workers.is_empty() {
        println!("no workers");
        return;
    }
    println!("{:<16} {:<16} {:<12} {:<12} CAPABILITIES", "SERVER", "NAME", "VERSION", "HEALTH");
    for worker in workers {
        println!(
            "{:<16} {:<16} {:<12} {:<12} {}",
            worker.server_id,
            worker.name,
            worker.version,
            worker.health,
            worker.capabilities.join(",")
        );
    }
}
