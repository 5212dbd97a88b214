use async_trait::async_trait;
use futures::stream::Stream;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::{Duration, Instant};

use super::error::ProcessError;

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub stdin: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
        }
    }
}

pub type ProcessStreamItem = Result<String, ProcessError>;
pub type ProcessStreamFut = Pin<Box<dyn Stream<Item = ProcessStreamItem> + Send>>;

/// Line-oriented view of a running process. `stdout` yields one item per
/// line with the trailing newline removed; `status` resolves once the
/// process exits.
pub struct ProcessStream {
    pub stdout: ProcessStreamFut,
    pub stderr: ProcessStreamFut,
    pub status: Pin<Box<dyn futures::Future<Output = Result<ExitStatus, ProcessError>> + Send>>,
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
    async fn run_streaming(&self, command: ProcessCommand) -> Result<ProcessStream, ProcessError>;
}

pub struct TokioProcessRunner;

impl TokioProcessRunner {
    fn normalize_line(mut line: String) -> String {
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        line
    }

    fn create_line_stream<R>(reader: tokio::io::BufReader<R>) -> ProcessStreamFut
    where
        R: tokio::io::AsyncRead + Send + Unpin + 'static,
    {
        use tokio::io::AsyncBufReadExt;

        Box::pin(futures::stream::unfold(reader, |mut reader| async move {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => None,
                Ok(_) => Some((Ok(Self::normalize_line(line)), reader)),
                Err(e) => Some((Err(ProcessError::Io(e)), reader)),
            }
        })) as ProcessStreamFut
    }

    fn convert_exit_status(status: std::process::ExitStatus) -> ExitStatus {
        if status.success() {
            ExitStatus::Success
        } else {
            ExitStatus::Error(status.code().unwrap_or(-1))
        }
    }

    fn configure_command(command: &ProcessCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args);

        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(if command.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.kill_on_drop(true);
        cmd
    }

    fn map_spawn_error(err: std::io::Error, program: &str) -> ProcessError {
        if err.kind() == std::io::ErrorKind::NotFound {
            ProcessError::CommandNotFound(program.to_string())
        } else {
            ProcessError::Io(err)
        }
    }

    async fn feed_stdin(
        child: &mut tokio::process::Child,
        input: Option<&String>,
    ) -> Result<(), ProcessError> {
        use tokio::io::AsyncWriteExt;

        if let Some(input) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
                stdin.shutdown().await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        tracing::debug!(
            "Executing subprocess: {} {}",
            command.program,
            command.args.join(" ")
        );

        let start = Instant::now();
        let mut cmd = Self::configure_command(&command);
        let mut child = cmd
            .spawn()
            .map_err(|e| Self::map_spawn_error(e, &command.program))?;

        Self::feed_stdin(&mut child, command.stdin.as_ref()).await?;

        let output_fut = child.wait_with_output();
        let output = match command.timeout {
            Some(limit) => match tokio::time::timeout(limit, output_fut).await {
                Ok(result) => result?,
                Err(_) => return Err(ProcessError::Timeout(limit)),
            },
            None => output_fut.await?,
        };

        Ok(ProcessOutput {
            status: Self::convert_exit_status(output.status),
            stdout: String::from_utf8(output.stdout)?,
            stderr: String::from_utf8(output.stderr)?,
            duration: start.elapsed(),
        })
    }

    async fn run_streaming(&self, command: ProcessCommand) -> Result<ProcessStream, ProcessError> {
        tracing::debug!(
            "Streaming subprocess: {} {}",
            command.program,
            command.args.join(" ")
        );

        let mut cmd = Self::configure_command(&command);
        let mut child = cmd
            .spawn()
            .map_err(|e| Self::map_spawn_error(e, &command.program))?;

        Self::feed_stdin(&mut child, command.stdin.as_ref()).await?;

        let stdout = child
            .stdout
            .take()
            .map(tokio::io::BufReader::new)
            .map(Self::create_line_stream)
            .unwrap_or_else(|| Box::pin(futures::stream::empty()));
        let stderr = child
            .stderr
            .take()
            .map(tokio::io::BufReader::new)
            .map(Self::create_line_stream)
            .unwrap_or_else(|| Box::pin(futures::stream::empty()));

        let status = Box::pin(async move {
            match child.wait().await {
                Ok(status) => Ok(Self::convert_exit_status(status)),
                Err(e) => Err(ProcessError::Io(e)),
            }
        });

        Ok(ProcessStream {
            stdout,
            stderr,
            status,
        })
    }
}
