//! Port trait definitions (Hexagonal Architecture)
//!
//! - Agent: the execution contract workers implement
//! - AgentFactory: resolves registry behavior references into agents

pub mod agent;

pub use agent::{Agent, AgentError, AgentFactory};
