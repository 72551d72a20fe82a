//! Running external programs (container engines, scheduler CLIs).

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use linker_types::Result;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Captured result of one external command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Best description of a failed command: stderr, then stdout, then the exit code.
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        if self.timed_out {
            format!("timed out after {}ms", self.duration_ms)
        } else {
            format!("exited with code {}", self.exit_code)
        }
    }
}

/// Spawns a program and waits for it. A non-zero exit is reported through
/// [`CommandOutput`]; only a failure to spawn is an `Err`.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<CommandOutput>;
}

/// Runs commands on the local host with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct LocalCommandExecutor {
    timeout: Option<Duration>,
}

impl LocalCommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill commands that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).to_string()
}

#[async_trait]
impl CommandExecutor for LocalCommandExecutor {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<CommandOutput> {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(program, args = ?args, "spawning command");
        let start = tokio::time::Instant::now();
        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Drain both pipes while waiting so a chatty child cannot block on a full pipe.
        let finished = async {
            let (stdout, stderr, status) =
                tokio::join!(read_all(stdout), read_all(stderr), child.wait());
            status.map(|status| (stdout, stderr, status))
        };

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, finished).await.ok(),
            None => Some(finished.await),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Some(result) => {
                let (stdout, stderr, status) = result?;
                Ok(CommandOutput {
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                    timed_out: false,
                    duration_ms,
                })
            }
            None => {
                let _ = child.kill().await;
                tracing::warn!(program, duration_ms, "command timed out");
                Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: format!("Command timed out after {duration_ms}ms"),
                    exit_code: -1,
                    timed_out: true,
                    duration_ms,
                })
            }
        }
    }
}
