// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod store;

use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::cli::{CliArgs, CliCommand};
use crate::config::ConfigFile;
use crate::engine::progress;
use crate::engine::{ConsoleProgress, Scheduler, SchedulerOptions};
use crate::errors::QrunError;
use crate::store::{Status, TaskStore};

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = match &args.config {
        Some(path) => config::load_from_path(path)?,
        None => config::load_default()?,
    };
    let file = args.file.clone().unwrap_or_else(|| cfg.store.file.clone());

    match args.command {
        CliCommand::Run { progress } => run_batch(&args, &cfg, &file, progress).await,
        CliCommand::Add { ref fields } => add_task(&file, fields),
        CliCommand::List { ref status } => list_tasks(&file, status.as_deref()),
    }
}

async fn run_batch(args: &CliArgs, cfg: &ConfigFile, file: &str, progress: bool) -> Result<()> {
    let store = TaskStore::open(file)?;
    info!(file, tasks = store.len(), "tasks file loaded");

    let options = SchedulerOptions {
        max_tasks: args.max_tasks.unwrap_or(cfg.runner.max_tasks),
        timeout: nonzero_secs(cfg.runner.timeout_secs),
        kill_timeout: nonzero_secs(cfg.runner.kill_timeout_secs),
    };
    let mut scheduler = Scheduler::new(store, options)?;
    if progress {
        scheduler.set_progress_sink(progress::shared(ConsoleProgress));
    }

    scheduler.run().await?;
    if !scheduler.is_done() {
        return Err(QrunError::Consistency(
            "the run completed but some tasks are still active".into(),
        )
        .into());
    }
    Ok(())
}

fn add_task(file: &str, fields: &[String]) -> Result<()> {
    let mut pairs = Vec::with_capacity(fields.len());
    for field in fields {
        let (name, value) = field.split_once('=').ok_or_else(|| {
            QrunError::Config(format!("`{field}` is not a FIELD=VALUE pair"))
        })?;
        pairs.push((name, value));
    }
    if !pairs.iter().any(|(name, _)| *name == "status") {
        pairs.push(("status", Status::New.as_str()));
    }

    let mut store = TaskStore::open(file)?;
    let rownum = store.add_task(&pairs)?;
    store.persist()?;
    info!(file, rownum, "task added");
    Ok(())
}

fn list_tasks(file: &str, status: Option<&str>) -> Result<()> {
    let store = TaskStore::open(file)?;
    let filter = status.map(str::parse::<Status>).transpose()?;
    for rownum in 0..store.len() {
        let Some(task) = store.get(rownum) else { break };
        if filter.is_none_or(|s| task.status == s) {
            print!("{}", store.serialize_row(task)?);
        }
    }
    Ok(())
}

fn nonzero_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}
