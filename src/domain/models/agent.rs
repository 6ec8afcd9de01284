//! Agent descriptors and the registry source document.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::domain::errors::ConfigError;

/// Static description of a worker, fixed for the lifetime of the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentDescriptor {
    /// Unique agent identifier
    pub id: String,
    /// Categories of work this agent can perform (never empty)
    pub capability_tags: BTreeSet<String>,
    /// Maximum tasks in flight on this agent
    pub max_concurrency: usize,
    /// Tie-breaker between equally loaded agents (higher wins)
    pub priority_class: i32,
    /// Generalist used when no agent covers a task's tags
    pub fallback: bool,
    /// Opaque behavior reference, interpreted by the agent factory
    pub behavior: Value,
}

impl AgentDescriptor {
    /// Create a descriptor, validating tags and concurrency.
    pub fn new<I, S>(id: impl Into<String>, tags: I, max_concurrency: usize) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let id = id.into();
        let concurrency = i64::try_from(max_concurrency).unwrap_or(i64::MAX);
        AgentEntry {
            id,
            capability_tags: tags.into_iter().map(|t| t.as_ref().to_string()).collect(),
            max_concurrency: concurrency,
            priority_class: 0,
            fallback: false,
            behavior: Value::Null,
        }
        .try_into()
    }

    #[must_use]
    pub fn with_priority_class(mut self, priority_class: i32) -> Self {
        self.priority_class = priority_class;
        self
    }

    #[must_use]
    pub fn as_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    #[must_use]
    pub fn with_behavior(mut self, behavior: Value) -> Self {
        self.behavior = behavior;
        self
    }

    /// Whether this agent's tag set is a superset of `tags`.
    pub fn covers(&self, tags: &BTreeSet<String>) -> bool {
        tags.is_subset(&self.capability_tags)
    }
}

/// Registry source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
}

/// One agent as written in the registry source.
///
/// `max_concurrency` is signed so a negative value is reported as a
/// configuration error rather than a parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub id: String,
    #[serde(default)]
    pub capability_tags: Vec<String>,
    pub max_concurrency: i64,
    #[serde(default)]
    pub priority_class: i32,
    #[serde(default)]
    pub fallback: bool,
    #[serde(default)]
    pub behavior: Value,
}

impl TryFrom<AgentEntry> for AgentDescriptor {
    type Error = ConfigError;

    fn try_from(entry: AgentEntry) -> Result<Self, Self::Error> {
        let id = entry.id.trim().to_string();
        if id.is_empty() {
            return Err(ConfigError::EmptyAgentId(entry.id));
        }

        let mut capability_tags = BTreeSet::new();
        for tag in &entry.capability_tags {
            let tag = tag.trim();
            if tag.is_empty() {
                return Err(ConfigError::BlankCapability(id));
            }
            capability_tags.insert(tag.to_string());
        }
        if capability_tags.is_empty() {
            return Err(ConfigError::EmptyCapabilities(id));
        }

        let max_concurrency = match usize::try_from(entry.max_concurrency) {
            Ok(value) if value > 0 => value,
            _ => {
                return Err(ConfigError::InvalidConcurrency {
                    agent_id: id,
                    value: entry.max_concurrency,
                })
            }
        };

        Ok(Self {
            id,
            capability_tags,
            max_concurrency,
            priority_class: entry.priority_class,
            fallback: entry.fallback,
            behavior: entry.behavior,
        })
    }
}

/// Current and maximum in-flight tasks for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AgentLoad {
    pub current: usize,
    pub max: usize,
}
