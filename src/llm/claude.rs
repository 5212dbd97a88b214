//! Claude CLI transport for the chat boundary.

use async_trait::async_trait;
use futures::StreamExt;

use super::{ChatClient, ChatError, ChatRequest, ChunkStream};
use crate::subprocess::{ProcessCommandBuilder, ProcessError, SubprocessManager};

/// Sends chat requests through the `claude` CLI, streaming stdout lines
/// back as chunks. The user content is fed over stdin so large diffs
/// never hit argv limits.
pub struct ClaudeCliClient {
    subprocess: SubprocessManager,
}

impl ClaudeCliClient {
    pub fn new(subprocess: SubprocessManager) -> Self {
        Self { subprocess }
    }

    pub async fn check_availability(&self) -> Result<bool, ProcessError> {
        let result = self
            .subprocess
            .runner()
            .run(
                ProcessCommandBuilder::new("claude")
                    .args(["--version"])
                    .build(),
            )
            .await;

        match result {
            Ok(output) => Ok(output.status.success()),
            Err(ProcessError::CommandNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ChatClient for ClaudeCliClient {
    async fn send(&self, request: ChatRequest) -> Result<ChunkStream, ChatError> {
        let mut builder = ProcessCommandBuilder::new("claude")
            .arg("--print")
            .args(["--output-format", "text"]);

        if !request.system.is_empty() {
            builder = builder
                .arg("--append-system-prompt")
                .arg(request.system.as_str());
        }
        if let Some(model) = &request.model_hint {
            builder = builder.arg("--model").arg(model);
        }

        let command = builder.stdin(request.user).build();

        let stream = self
            .subprocess
            .runner()
            .run_streaming(command)
            .await
            .map_err(|e| match e {
                ProcessError::CommandNotFound(_) => ChatError::NoModelAvailable,
                other => ChatError::Transport(other.to_string()),
            })?;

        Ok(Box::pin(stream.stdout.map(|item| {
            item.map(|line| format!("{line}\n"))
                .map_err(|e| ChatError::Transport(e.to_string()))
        })))
    }
}
