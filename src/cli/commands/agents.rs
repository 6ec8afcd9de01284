//! `taskmesh agents`: show the agent registry.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use super::{load_registry, registry_path};
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::{AgentDescriptor, Config};

#[derive(Args, Debug)]
pub struct AgentsArgs {
    /// Registry file (overrides scheduler.registry_path)
    #[arg(short, long)]
    pub registry: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct AgentEntryOutput {
    pub id: String,
    pub capability_tags: BTreeSet<String>,
    pub max_concurrency: usize,
    pub priority_class: i32,
    pub fallback: bool,
    pub kind: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AgentListOutput {
    pub registry: String,
    pub agents: Vec<AgentEntryOutput>,
    pub total: usize,
    #[serde(skip)]
    descriptors: Vec<AgentDescriptor>,
}

impl CommandOutput for AgentListOutput {
    fn to_human(&self) -> String {
        let kinds: HashMap<String, &'static str> = self
            .agents
            .iter()
            .map(|a| (a.id.clone(), a.kind))
            .collect();
        format!(
            "{} agent(s) in {}\n{}",
            self.total,
            self.registry,
            TableFormatter::new().format_agents(&self.descriptors, &HashMap::new(), &kinds)
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: AgentsArgs, config: &Config, json_mode: bool) -> Result<()> {
    let path = registry_path(config, args.registry.as_deref());
    let registry = load_registry(&path)?;

    let agents = registry
        .descriptors()
        .iter()
        .map(|agent| AgentEntryOutput {
            id: agent.id.clone(),
            capability_tags: agent.capability_tags.clone(),
            max_concurrency: agent.max_concurrency,
            priority_class: agent.priority_class,
            fallback: agent.fallback,
            kind: registry.handle(&agent.id).map_or("-", |h| h.kind()),
        })
        .collect::<Vec<_>>();

    let result = AgentListOutput {
        registry: path.display().to_string(),
        total: agents.len(),
        agents,
        descriptors: registry.descriptors().to_vec(),
    };
    output(&result, json_mode);
    Ok(())
}
