//! `taskmesh validate`: check configuration and the agent registry.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use super::{load_registry, registry_path};
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Registry file (overrides scheduler.registry_path)
    #[arg(short, long)]
    pub registry: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct ValidateOutput {
    pub success: bool,
    pub registry: String,
    pub agents: usize,
    pub fallback: Option<String>,
    pub default_max_attempts: u32,
    pub task_timeout_secs: u64,
}

impl CommandOutput for ValidateOutput {
    fn to_human(&self) -> String {
        let fallback = self.fallback.as_deref().unwrap_or("none");
        format!(
            "Configuration OK\nRegistry OK: {} ({} agent(s), fallback: {})\nTasks: {} attempt(s), {}s timeout",
            self.registry, self.agents, fallback, self.default_max_attempts, self.task_timeout_secs
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: ValidateArgs, config: &Config, json_mode: bool) -> Result<()> {
    ConfigLoader::validate(config).context("Configuration is invalid")?;

    let path = registry_path(config, args.registry.as_deref());
    let registry = load_registry(&path)
        .with_context(|| format!("Registry {} is invalid", path.display()))?;

    let result = ValidateOutput {
        success: true,
        registry: path.display().to_string(),
        agents: registry.len(),
        fallback: registry.fallback_agent().map(|a| a.id.clone()),
        default_max_attempts: config.scheduler.default_max_attempts,
        task_timeout_secs: config.scheduler.task_timeout_secs,
    };
    output(&result, json_mode);
    Ok(())
}
