//! Echo agent: returns its payload unchanged.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::ports::{Agent, AgentError};

/// Default behavior for agents without an explicit one.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    fn kind(&self) -> &'static str {
        "echo"
    }

    async fn execute(&self, payload: Value, cancel: CancellationToken) -> Result<Value, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_returns_payload() {
        let out = EchoAgent
            .execute(json!({"q": "rust"}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, json!({"q": "rust"}));
    }

    #[tokio::test]
    async fn test_echo_observes_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            EchoAgent.execute(json!(1), token).await,
            Err(AgentError::Cancelled)
        ));
    }
}
