//! CLI command implementations.

pub mod agents;
pub mod run;
pub mod validate;

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::adapters::agents::BuiltinAgentFactory;
use crate::domain::models::Config;
use crate::services::AgentRegistry;

/// Registry path from the command line, else from configuration.
pub(crate) fn registry_path(config: &Config, override_path: Option<&Path>) -> PathBuf {
    override_path.map_or_else(
        || PathBuf::from(&config.scheduler.registry_path),
        Path::to_path_buf,
    )
}

pub(crate) fn load_registry(path: &Path) -> Result<AgentRegistry> {
    Ok(AgentRegistry::load_from_file(path, &BuiltinAgentFactory)?)
}
