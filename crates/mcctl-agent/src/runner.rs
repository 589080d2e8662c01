use crate::error::RunError;
use crate::publish::Publisher;
use mcctl_core::EnvConfig;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);
pub const READER_JOIN_WAIT: Duration = Duration::from_secs(5);
const LIVE_PREFIX: &str = "[server.sh] ";
const LIVE_ERROR_PREFIX: &str = "[server.sh] E: ";
/// Progress chatter kept out of the live stream; still captured.
const QUIET_PREFIXES: [&str; 2] = ["Copying:", "Adding:"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct CapturedLine {
    stream: StreamKind,
    text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn success_output(&self) -> String {
        self.stdout_lines.join("\n")
    }

    pub fn error_output(&self) -> String {
        self.stderr_lines.join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub script: PathBuf,
    pub working_dir: PathBuf,
    pub env_config: PathBuf,
    pub timeout: Duration,
    pub join_wait: Duration,
}

/// Runs the lifecycle script, streaming its output live while capturing it.
pub struct ProcessRunner {
    config: RunnerConfig,
    env: Mutex<EnvConfig>,
    publisher: Publisher,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig, env: EnvConfig, publisher: Publisher) -> Self {
        Self {
            config,
            env: Mutex::new(env),
            publisher,
        }
    }

    pub fn env_snapshot(&self) -> EnvConfig {
        match self.env.lock() {
            Ok(env) => env.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Re-reads the env config file; on failure the previous values stay.
    pub fn reload_env(&self) -> EnvConfig {
        match EnvConfig::load(&self.config.env_config) {
            Ok(fresh) => {
                let mut env = match self.env.lock() {
                    Ok(env) => env,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *env = fresh.clone();
                fresh
            }
            Err(err) => {
                warn!(event = "env_reload_failed", error = %err);
                self.env_snapshot()
            }
        }
    }

    pub async fn run(&self, command: &str, args: &[String]) -> Result<String, RunError> {
        self.run_with_timeout(command, args, self.config.timeout).await
    }

    /// Ok carries the joined stdout of a zero exit.
    pub async fn run_with_timeout(
        &self,
        command: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<String, RunError> {
        let result = self.execute(command, args, timeout).await?;
        if result.timed_out {
            return Err(RunError::Timeout {
                command: command.to_string(),
                seconds: timeout.as_secs(),
            });
        }
        if result.exit_code != 0 {
            return Err(RunError::Failed {
                command: command.to_string(),
                stderr: result.error_output(),
            });
        }
        info!(
            event = "run_succeeded",
            command,
            stdout_lines = result.stdout_lines.len()
        );
        Ok(result.success_output())
    }

    pub async fn execute(
        &self,
        command: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ExecutionResult, RunError> {
        let env = self.reload_env();
        info!(event = "run_start", script = %self.config.script.display(), command, args = ?args);

        let mut cmd = Command::new(&self.config.script);
        cmd.arg(command)
            .args(args)
            .current_dir(&self.config.working_dir)
            .envs(env.vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|err| self.launch_failure(command, err.to_string()))?;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<CapturedLine>();
        let stdout_task = child.stdout.take().map(|stdout| {
            tokio::spawn(read_stream(
                stdout,
                StreamKind::Stdout,
                line_tx.clone(),
                self.publisher.clone(),
            ))
        });
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(read_stream(
                stderr,
                StreamKind::Stderr,
                line_tx.clone(),
                self.publisher.clone(),
            ))
        });
        drop(line_tx);

        let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => (status.code().unwrap_or(-1), false),
            Ok(Err(err)) => {
                let _ = child.start_kill();
                abort_reader(stdout_task);
                abort_reader(stderr_task);
                return Err(self.launch_failure(command, err.to_string()));
            }
            Err(_) => {
                warn!(event = "run_timeout", command, timeout_secs = timeout.as_secs());
                if let Err(err) = child.kill().await {
                    warn!(event = "run_kill_failed", command, error = %err);
                }
                (-1, true)
            }
        };

        join_reader(stdout_task, self.config.join_wait, "stdout").await;
        join_reader(stderr_task, self.config.join_wait, "stderr").await;

        let mut result = ExecutionResult {
            exit_code,
            timed_out,
            ..ExecutionResult::default()
        };
        while let Ok(line) = line_rx.try_recv() {
            match line.stream {
                StreamKind::Stdout => result.stdout_lines.push(line.text),
                StreamKind::Stderr => result.stderr_lines.push(line.text),
            }
        }
        debug!(event = "run_finished", command, exit_code, timed_out);
        Ok(result)
    }

    fn launch_failure(&self, command: &str, reason: String) -> RunError {
        let err = RunError::Launch {
            command: command.to_string(),
            reason,
        };
        self.publisher.terminal(format!("{LIVE_PREFIX}EXCEPTION: {err}"));
        err
    }
}

fn is_quiet(line: &str) -> bool {
    QUIET_PREFIXES.iter().any(|prefix| line.starts_with(prefix))
}

async fn read_stream<R>(
    reader: R,
    stream: StreamKind,
    lines: mpsc::UnboundedSender<CapturedLine>,
    publisher: Publisher,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(event = "run_read_error", stream = ?stream, error = %err);
                break;
            }
        }
        let text = String::from_utf8_lossy(&buf).trim().to_string();
        if text.is_empty() {
            continue;
        }
        match stream {
            StreamKind::Stdout if is_quiet(&text) => {}
            StreamKind::Stdout => publisher.terminal(format!("{LIVE_PREFIX}{text}")),
            StreamKind::Stderr => publisher.terminal(format!("{LIVE_ERROR_PREFIX}{text}")),
        }
        if lines.send(CapturedLine { stream, text }).is_err() {
            break;
        }
    }
}

async fn join_reader(task: Option<JoinHandle<()>>, wait: Duration, name: &str) {
    let Some(mut task) = task else {
        return;
    };
    if tokio::time::timeout(wait, &mut task).await.is_err() {
        warn!(event = "run_reader_stuck", stream = name, wait_ms = wait.as_millis() as u64);
        task.abort();
    }
}

fn abort_reader(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        task.abort();
    }
}
