//! `taskmesh run`: submit a batch of tasks and drive them to completion.

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::{load_registry, registry_path};
use crate::application::{Scheduler, SchedulerStats};
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::{Config, TaskPriority, TaskSnapshot, TaskSubmission};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML file with a top-level `tasks` list
    #[arg(short, long)]
    pub tasks: PathBuf,

    /// Registry file (overrides scheduler.registry_path)
    #[arg(short, long)]
    pub registry: Option<PathBuf>,

    /// Seconds to wait for every task to settle
    #[arg(long, default_value = "60")]
    pub timeout: u64,
}

#[derive(Debug, Deserialize)]
struct TaskFile {
    #[serde(default)]
    tasks: Vec<TaskEntry>,
}

#[derive(Debug, Deserialize)]
struct TaskEntry {
    #[serde(default)]
    payload: Value,
    required_tags: Vec<String>,
    #[serde(default)]
    priority: Option<PriorityField>,
    #[serde(default)]
    max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PriorityField {
    Ordinal(u8),
    Name(String),
}

impl TaskEntry {
    fn into_submission(self) -> Result<TaskSubmission> {
        let priority = match self.priority {
            None => TaskPriority::default(),
            Some(PriorityField::Ordinal(n)) => TaskPriority::from_ordinal(n)?,
            Some(PriorityField::Name(name)) => TaskPriority::parse(&name)?,
        };
        let mut submission =
            TaskSubmission::new(self.payload, self.required_tags).with_priority(priority);
        if let Some(max_attempts) = self.max_attempts {
            submission = submission.with_max_attempts(max_attempts);
        }
        Ok(submission)
    }
}

fn read_task_file(path: &Path) -> Result<Vec<TaskSubmission>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task file {}", path.display()))?;
    let file: TaskFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse task file {}", path.display()))?;

    file.tasks
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            entry
                .into_submission()
                .with_context(|| format!("Invalid task #{}", i + 1))
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub settled: bool,
    pub tasks: Vec<TaskSnapshot>,
    pub stats: SchedulerStats,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let t = &self.stats.tasks;
        let mut lines = vec![TableFormatter::new().format_tasks(&self.tasks)];
        lines.push(format!(
            "{} succeeded, {} failed, {} cancelled, {} unsettled ({} retries)",
            t.succeeded,
            t.failed,
            t.cancelled,
            t.active(),
            self.stats.retried
        ));
        if !self.settled {
            lines.push("Timed out before every task settled".to_string());
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: RunArgs, config: &Config, json_mode: bool) -> Result<()> {
    let submissions = read_task_file(&args.tasks)?;
    let registry = load_registry(&registry_path(config, args.registry.as_deref()))?;
    let scheduler = Scheduler::new(registry, config);

    scheduler.start().await?;
    for submission in submissions {
        scheduler.submit(submission)?;
    }
    info!(tasks = scheduler.list_tasks(None).len(), "tasks submitted");

    let settled = scheduler
        .wait_until_settled(Duration::from_secs(args.timeout))
        .await;
    if !settled {
        warn!(timeout_secs = args.timeout, "tasks did not settle before timeout");
    }
    scheduler.stop().await?;

    let result = RunOutput {
        settled,
        tasks: scheduler.list_tasks(None),
        stats: scheduler.stats().await,
    };
    output(&result, json_mode);
    Ok(())
}
