//! Command agent.
//!
//! Spawns an external program per task. The payload is written to the child's
//! stdin as JSON; whatever it prints on stdout becomes the result (parsed as
//! JSON when possible, otherwise kept as a string). A non-zero exit status is
//! a failed attempt. Cancellation kills the child.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::ports::{Agent, AgentError};

/// How to launch the program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Program to execute
    pub program: String,
    /// Arguments passed verbatim
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory (inherits the scheduler's when unset)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl CommandConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone)]
pub struct CommandAgent {
    config: CommandConfig,
}

impl CommandAgent {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

fn parse_output(stdout: &[u8]) -> Result<Value, AgentError> {
    let text = std::str::from_utf8(stdout)
        .map_err(|e| AgentError::InvalidOutput(e.to_string()))?
        .trim();
    if text.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

#[async_trait]
impl Agent for CommandAgent {
    fn kind(&self) -> &'static str {
        "command"
    }

    async fn execute(&self, payload: Value, cancel: CancellationToken) -> Result<Value, AgentError> {
        let input = serde_json::to_vec(&payload)
            .map_err(|e| AgentError::InvalidOutput(format!("payload not serializable: {e}")))?;

        let mut child = self.build_command().spawn()?;
        debug!(program = %self.config.program, pid = child.id(), "spawned agent process");

        if let Some(mut stdin) = child.stdin.take() {
            // A child that never reads stdin closes the pipe early; that is not an error.
            if let Err(e) = stdin.write_all(&input).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }

        // Dropping the wait future on cancellation drops the child, which kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            () = cancel.cancelled() => return Err(AgentError::Cancelled),
        };

        if !output.status.success() {
            return Err(AgentError::NonZeroExit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_output(&output.stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn sh(script: &str) -> CommandAgent {
        CommandAgent::new(CommandConfig::new("sh").with_args(["-c", script]))
    }

    #[test]
    fn test_parse_output() {
        assert_eq!(parse_output(b" {\"a\": 1}\n").unwrap(), json!({"a": 1}));
        assert_eq!(parse_output(b"plain text\n").unwrap(), json!("plain text"));
        assert_eq!(parse_output(b"").unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_round_trips_payload_through_stdin() {
        let out = sh("cat")
            .execute(json!({"query": "rust"}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, json!({"query": "rust"}));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let err = sh("echo oops >&2; exit 3")
            .execute(json!(null), CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            AgentError::NonZeroExit { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let err = sh("sleep 30").execute(json!(null), token).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let agent = CommandAgent::new(CommandConfig::new("/nonexistent/taskmesh-agent"));
        let err = agent
            .execute(json!(null), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Io(_)));
    }
}
