//! Agent port - the execution contract every worker implements.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::ConfigError;
use crate::domain::models::AgentDescriptor;

/// Errors a worker may return from `execute`.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent execution failed: {0}")]
    Failed(String),

    #[error("Agent observed cancellation")]
    Cancelled,

    #[error("Agent process exited with {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Agent produced invalid output: {0}")]
    InvalidOutput(String),

    #[error("Agent I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A worker that can execute task payloads.
///
/// Implementations may call out to language models, browsers, analytics
/// pipelines or anything else; the scheduler only sees this contract.
/// `cancel` is a cooperative signal: an implementation that ignores it runs
/// to completion and its result is discarded.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Short name of the behavior kind, used in logs.
    fn kind(&self) -> &'static str;

    /// Execute one payload.
    async fn execute(&self, payload: Value, cancel: CancellationToken) -> Result<Value, AgentError>;
}

/// Resolves a descriptor's behavior reference into an agent handle.
///
/// Called once per agent when the registry is loaded.
pub trait AgentFactory: Send + Sync {
    fn create(&self, descriptor: &AgentDescriptor) -> Result<Arc<dyn Agent>, ConfigError>;
}
