//! Agent registry.
//!
//! Loads the static worker configuration once at startup, validates it, and
//! resolves every behavior reference into a typed agent handle. The registry
//! is immutable afterwards; changing agents means restarting the scheduler.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::errors::ConfigError;
use crate::domain::models::{AgentDescriptor, RegistryDocument};
use crate::domain::ports::{Agent, AgentFactory};

/// Immutable set of agents, kept sorted by priority class (descending) then
/// id (ascending) so every lookup is deterministic.
pub struct AgentRegistry {
    agents: Vec<AgentDescriptor>,
    handles: HashMap<String, Arc<dyn Agent>>,
    fallback: Option<usize>,
}

impl AgentRegistry {
    /// Parse a YAML registry document and resolve its behaviors.
    pub fn load(source: &str, factory: &dyn AgentFactory) -> Result<Self, ConfigError> {
        let document: RegistryDocument =
            serde_yaml::from_str(source).map_err(|e| ConfigError::Malformed(e.to_string()))?;

        let mut entries = Vec::with_capacity(document.agents.len());
        for entry in document.agents {
            let descriptor = AgentDescriptor::try_from(entry)?;
            let handle = factory.create(&descriptor)?;
            entries.push((descriptor, handle));
        }

        Self::from_agents(entries)
    }

    /// Load a registry document from disk.
    pub fn load_from_file(
        path: impl AsRef<Path>,
        factory: &dyn AgentFactory,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let registry = Self::load(&source, factory)?;
        info!(
            path = %path.display(),
            agents = registry.len(),
            fallback = registry.fallback_agent().map(|a| a.id.as_str()),
            "agent registry loaded"
        );
        Ok(registry)
    }

    /// Build a registry from already-resolved agents.
    pub fn from_agents(
        entries: Vec<(AgentDescriptor, Arc<dyn Agent>)>,
    ) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::NoAgents);
        }

        let mut seen = HashSet::new();
        let mut agents = Vec::with_capacity(entries.len());
        let mut handles = HashMap::with_capacity(entries.len());
        for (descriptor, handle) in entries {
            if !seen.insert(descriptor.id.clone()) {
                return Err(ConfigError::DuplicateAgent(descriptor.id));
            }
            debug!(
                agent_id = %descriptor.id,
                kind = handle.kind(),
                tags = ?descriptor.capability_tags,
                max_concurrency = descriptor.max_concurrency,
                "registered agent"
            );
            handles.insert(descriptor.id.clone(), handle);
            agents.push(descriptor);
        }

        agents.sort_by(|a, b| {
            b.priority_class
                .cmp(&a.priority_class)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut fallback: Option<usize> = None;
        for (index, agent) in agents.iter().enumerate() {
            if !agent.fallback {
                continue;
            }
            if let Some(existing) = fallback {
                return Err(ConfigError::MultipleFallbacks(
                    agents[existing].id.clone(),
                    agent.id.clone(),
                ));
            }
            fallback = Some(index);
        }

        Ok(Self {
            agents,
            handles,
            fallback,
        })
    }

    /// Every agent whose capability tags are a superset of `tags`, in
    /// priority-class-descending, id-ascending order.
    pub fn lookup_by_tags(&self, tags: &BTreeSet<String>) -> Vec<&AgentDescriptor> {
        self.agents.iter().filter(|a| a.covers(tags)).collect()
    }

    /// The configured generalist, if any.
    pub fn fallback_agent(&self) -> Option<&AgentDescriptor> {
        self.fallback.map(|index| &self.agents[index])
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|a| a.id == agent_id)
    }

    /// Execution handle resolved for an agent at load time.
    pub fn handle(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.handles.get(agent_id).cloned()
    }

    /// All descriptors in lookup order.
    pub fn descriptors(&self) -> &[AgentDescriptor] {
        &self.agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents)
            .field("fallback", &self.fallback_agent().map(|a| &a.id))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::agents::BuiltinAgentFactory;
    use crate::domain::models::normalize_tags;

    const REGISTRY: &str = r"
agents:
  - id: searcher
    capability_tags: [search]
    max_concurrency: 2
    priority_class: 1
  - id: analyst
    capability_tags: [search, revenue]
    max_concurrency: 1
    priority_class: 1
  - id: generalist
    capability_tags: [general]
    max_concurrency: 4
    fallback: true
    behavior: echo
";

    fn tags(values: &[&str]) -> BTreeSet<String> {
        normalize_tags(values.iter().copied()).unwrap()
    }

    #[test]
    fn test_load_sorts_deterministically() {
        let registry = AgentRegistry::load(REGISTRY, &BuiltinAgentFactory).unwrap();
        let ids: Vec<_> = registry.descriptors().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["analyst", "searcher", "generalist"]);
        assert_eq!(registry.fallback_agent().unwrap().id, "generalist");
        assert!(registry.handle("searcher").is_some());
    }

    #[test]
    fn test_lookup_by_tags_requires_full_coverage() {
        let registry = AgentRegistry::load(REGISTRY, &BuiltinAgentFactory).unwrap();

        let search: Vec<_> = registry
            .lookup_by_tags(&tags(&["search"]))
            .into_iter()
            .map(|a| a.id.clone())
            .collect();
        assert_eq!(search, vec!["analyst", "searcher"]);

        let both = registry.lookup_by_tags(&tags(&["search", "revenue"]));
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].id, "analyst");

        assert!(registry.lookup_by_tags(&tags(&["unknown"])).is_empty());
    }

    #[test]
    fn test_malformed_yaml() {
        let err = AgentRegistry::load("agents: [", &BuiltinAgentFactory).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
    }

    #[test]
    fn test_rejects_empty_tags_and_bad_concurrency() {
        let empty_tags = "agents:\n  - id: a\n    capability_tags: []\n    max_concurrency: 1\n";
        assert!(matches!(
            AgentRegistry::load(empty_tags, &BuiltinAgentFactory),
            Err(ConfigError::EmptyCapabilities(_))
        ));

        let zero = "agents:\n  - id: a\n    capability_tags: [x]\n    max_concurrency: 0\n";
        assert!(matches!(
            AgentRegistry::load(zero, &BuiltinAgentFactory),
            Err(ConfigError::InvalidConcurrency { value: 0, .. })
        ));
    }

    #[test]
    fn test_rejects_duplicates_and_multiple_fallbacks() {
        let dup = "agents:\n  - {id: a, capability_tags: [x], max_concurrency: 1}\n  - {id: a, capability_tags: [y], max_concurrency: 1}\n";
        assert!(matches!(
            AgentRegistry::load(dup, &BuiltinAgentFactory),
            Err(ConfigError::DuplicateAgent(id)) if id == "a"
        ));

        let two = "agents:\n  - {id: a, capability_tags: [x], max_concurrency: 1, fallback: true}\n  - {id: b, capability_tags: [y], max_concurrency: 1, fallback: true}\n";
        assert!(matches!(
            AgentRegistry::load(two, &BuiltinAgentFactory),
            Err(ConfigError::MultipleFallbacks(_, _))
        ));

        assert!(matches!(
            AgentRegistry::load("agents: []", &BuiltinAgentFactory),
            Err(ConfigError::NoAgents)
        ));
    }

    #[test]
    fn test_overlapping_tags_allowed() {
        let overlap = "agents:\n  - {id: a, capability_tags: [search], max_concurrency: 1}\n  - {id: b, capability_tags: [search], max_concurrency: 1}\n";
        let registry = AgentRegistry::load(overlap, &BuiltinAgentFactory).unwrap();
        assert_eq!(registry.lookup_by_tags(&tags(&["search"])).len(), 2);
        assert!(registry.fallback_agent().is_none());
    }

    #[test]
    fn test_unsupported_behavior() {
        let bad = "agents:\n  - id: a\n    capability_tags: [x]\n    max_concurrency: 1\n    behavior: {kind: teleport}\n";
        assert!(matches!(
            AgentRegistry::load(bad, &BuiltinAgentFactory),
            Err(ConfigError::UnsupportedBehavior { .. })
        ));
    }

    #[test]
    fn test_load_from_missing_file() {
        let err =
            AgentRegistry::load_from_file("/nonexistent/agents.yaml", &BuiltinAgentFactory)
                .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
