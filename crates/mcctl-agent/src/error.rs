use mcctl_core::ConfigError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failures of a collaborator call (tmux, tailscale, pgrep, status query).
#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} timed out after {}ms", .timeout.as_millis())]
    Timeout { program: String, timeout: Duration },
    #[error("{program} exited with code {code}: {stderr}")]
    Exit {
        program: String,
        code: i32,
        stderr: String,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Lifecycle-script failures; the Display text is what subscribers see.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Command '{command}' timed out after {seconds} seconds")]
    Timeout { command: String, seconds: u64 },
    #[error("Command '{command}' failed: {stderr}")]
    Failed { command: String, stderr: String },
    #[error("Failed to execute command '{command}': {reason}")]
    Launch { command: String, reason: String },
}

/// Everything a command handler can fail with. The dispatch boundary turns
/// each one into exactly one error-channel message.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("{0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("{context}: {source}")]
    External {
        context: &'static str,
        #[source]
        source: ExternalError,
    },
    #[error("Error fetching logs: {0}")]
    Logs(String),
    #[error("Error saving environment: {0}")]
    Config(#[from] ConfigError),
}

impl DispatchError {
    pub fn external(context: &'static str) -> impl FnOnce(ExternalError) -> Self {
        move |source| DispatchError::External { context, source }
    }
}
