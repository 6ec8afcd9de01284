//! Built-in agent implementations.

pub mod command;
pub mod echo;
pub mod factory;
pub mod mock;

pub use command::{CommandAgent, CommandConfig};
pub use echo::EchoAgent;
pub use factory::{BehaviorSpec, BuiltinAgentFactory};
pub use mock::MockAgent;
