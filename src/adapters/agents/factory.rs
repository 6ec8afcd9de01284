//! Resolves registry behavior references into built-in agents.
//!
//! A behavior is either omitted (echo), a bare kind name (`behavior: echo`),
//! or a tagged map:
//!
//! ```yaml
//! behavior:
//!   kind: command
//!   program: ./bin/summarize
//!   args: ["--fast"]
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::command::{CommandAgent, CommandConfig};
use super::echo::EchoAgent;
use super::mock::MockAgent;
use crate::domain::errors::ConfigError;
use crate::domain::models::AgentDescriptor;
use crate::domain::ports::{Agent, AgentFactory};

/// Parsed behavior reference.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BehaviorSpec {
    Echo,
    Command {
        #[serde(flatten)]
        config: CommandConfig,
    },
    Mock {
        #[serde(default)]
        fail_first: usize,
        #[serde(default)]
        delay_ms: u64,
    },
}

impl BehaviorSpec {
    pub fn parse(behavior: &Value) -> Result<Self, String> {
        match behavior {
            Value::Null => Ok(Self::Echo),
            Value::String(kind) => {
                serde_json::from_value(serde_json::json!({ "kind": kind })).map_err(|e| e.to_string())
            }
            other => serde_json::from_value(other.clone()).map_err(|e| e.to_string()),
        }
    }
}

/// Factory for the agents shipped with taskmesh.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinAgentFactory;

impl AgentFactory for BuiltinAgentFactory {
    fn create(&self, descriptor: &AgentDescriptor) -> Result<Arc<dyn Agent>, ConfigError> {
        let spec = BehaviorSpec::parse(&descriptor.behavior).map_err(|reason| {
            ConfigError::UnsupportedBehavior {
                agent_id: descriptor.id.clone(),
                reason,
            }
        })?;

        let agent: Arc<dyn Agent> = match spec {
            BehaviorSpec::Echo => Arc::new(EchoAgent),
            BehaviorSpec::Command { config } => {
                if config.program.trim().is_empty() {
                    return Err(ConfigError::UnsupportedBehavior {
                        agent_id: descriptor.id.clone(),
                        reason: "command program is empty".to_string(),
                    });
                }
                Arc::new(CommandAgent::new(config))
            }
            BehaviorSpec::Mock {
                fail_first,
                delay_ms,
            } => Arc::new(
                MockAgent::flaky(fail_first).with_delay(Duration::from_millis(delay_ms)),
            ),
        };
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_behaviors() {
        assert_eq!(BehaviorSpec::parse(&Value::Null).unwrap(), BehaviorSpec::Echo);
        assert_eq!(BehaviorSpec::parse(&json!("echo")).unwrap(), BehaviorSpec::Echo);
        assert_eq!(
            BehaviorSpec::parse(&json!({"kind": "mock", "fail_first": 2})).unwrap(),
            BehaviorSpec::Mock {
                fail_first: 2,
                delay_ms: 0
            }
        );

        let command = BehaviorSpec::parse(&json!({
            "kind": "command",
            "program": "summarize",
            "args": ["--fast"]
        }))
        .unwrap();
        assert_eq!(
            command,
            BehaviorSpec::Command {
                config: CommandConfig::new("summarize").with_args(["--fast"])
            }
        );

        assert!(BehaviorSpec::parse(&json!("teleport")).is_err());
        assert!(BehaviorSpec::parse(&json!({"kind": "command"})).is_err());
    }

    #[test]
    fn test_factory_creates_kinds() {
        let echo = AgentDescriptor::new("a", ["x"], 1).unwrap();
        assert_eq!(BuiltinAgentFactory.create(&echo).unwrap().kind(), "echo");

        let command = echo
            .clone()
            .with_behavior(json!({"kind": "command", "program": "cat"}));
        assert_eq!(BuiltinAgentFactory.create(&command).unwrap().kind(), "command");

        let blank = echo.with_behavior(json!({"kind": "command", "program": " "}));
        assert!(matches!(
            BuiltinAgentFactory.create(&blank),
            Err(ConfigError::UnsupportedBehavior { .. })
        ));
    }
}
