use crate::error::DispatchError;
use crate::external::{Multiplexer, ProcessTable};
use crate::monitor::TerminalMonitor;
use crate::probe::StatusProbe;
use crate::publish::Publisher;
use crate::runner::ProcessRunner;
use crate::server_logs::{find_log_file, tail_lines, DEFAULT_TAIL_LINES};
use futures_util::FutureExt;
use mcctl_core::{ControlCommand, EnvConfig};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const EXTERNAL_SERVER_PATTERN: &str = "java.*minecraft";
const EXTERNAL_SERVER_WARNING: &str = "Warning: Detected possible external Minecraft server running";

/// What the control loop should do once a command has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub server_dir: PathBuf,
    pub env_config: PathBuf,
    pub session: String,
}

/// Single entry point for control commands. Handlers run one at a time and
/// every failure, panics included, ends up as one error-channel message.
pub struct Dispatcher {
    runner: Arc<ProcessRunner>,
    probe: StatusProbe,
    monitor: TerminalMonitor,
    processes: Arc<dyn ProcessTable>,
    mux: Arc<dyn Multiplexer>,
    publisher: Publisher,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        runner: Arc<ProcessRunner>,
        probe: StatusProbe,
        monitor: TerminalMonitor,
        processes: Arc<dyn ProcessTable>,
        mux: Arc<dyn Multiplexer>,
        publisher: Publisher,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            runner,
            probe,
            monitor,
            processes,
            mux,
            publisher,
            settings,
        }
    }

    pub fn runner(&self) -> &Arc<ProcessRunner> {
        &self.runner
    }

    pub fn probe(&self) -> &StatusProbe {
        &self.probe
    }

    pub fn monitor_mut(&mut self) -> &mut TerminalMonitor {
        &mut self.monitor
    }

    pub fn monitor_active(&self) -> bool {
        self.monitor.is_active()
    }

    pub async fn dispatch(&mut self, command: ControlCommand) -> Flow {
        info!(event = "dispatch", command = %command.name, args = ?command.args);
        let name = command.name.clone();
        let outcome = AssertUnwindSafe(self.handle(&command)).catch_unwind().await;
        match outcome {
            Ok(Ok(flow)) => flow,
            Ok(Err(err)) => {
                self.publisher.error(err.to_string());
                Flow::Continue
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(event = "dispatch_panic", command = %name, reason = %reason);
                self.publisher
                    .error(format!("Error handling command '{name}': {reason}"));
                Flow::Continue
            }
        }
    }

    async fn handle(&mut self, command: &ControlCommand) -> Result<Flow, DispatchError> {
        match command.name.as_str() {
            "start" => self.start().await?,
            "stop" => self.stop().await?,
            "restart" => self.restart().await?,
            "status" => self.status().await,
            "logs" => self.logs(command).await?,
            "tailscale_ip" => self.tailscale_ip().await?,
            "minecraft_command" => self.minecraft_command(command).await?,
            "check_running_server" => self.check_running_server().await?,
            "set_environment" => return Ok(self.set_environment(command)),
            other => return Err(DispatchError::UnknownCommand(other.to_string())),
        }
        Ok(Flow::Continue)
    }

    async fn start(&mut self) -> Result<(), DispatchError> {
        self.publisher
            .status("Starting server... (Can take up to 10 minutes with many mods)");
        self.runner.run("start", &[]).await?;
        self.monitor.start();
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DispatchError> {
        self.publisher
            .status("Stopping server... (Can take up to 10 minutes to safely save world data)");
        self.monitor.stop().await;
        self.runner.run("stop", &[]).await?;
        Ok(())
    }

    async fn restart(&mut self) -> Result<(), DispatchError> {
        self.publisher.status("Restarting server...");
        self.monitor.stop().await;
        self.runner.run("restart", &[]).await?;
        self.monitor.start();
        Ok(())
    }

    async fn status(&self) {
        let snapshot = self.probe.probe().await;
        info!(event = "status_probed", class = %snapshot.class);
        self.publisher.status(snapshot.status_line());
        self.publisher.details(snapshot.details_line());
    }

    async fn logs(&self, command: &ControlCommand) -> Result<(), DispatchError> {
        let count = tail_count(command.arg("lines"))?;
        let root = self.settings.server_dir.clone();
        let lines = tokio::task::spawn_blocking(move || {
            find_log_file(&root)
                .map(|path| tail_lines(&path, count).map(|lines| (path, lines)))
                .transpose()
        })
        .await
        .map_err(|err| DispatchError::Logs(err.to_string()))?
        .map_err(|err| DispatchError::Logs(err.to_string()))?;

        match lines {
            Some((path, lines)) => {
                info!(event = "logs_read", path = %path.display(), lines = lines.len());
                for line in lines {
                    self.publisher.log(line.trim());
                }
            }
            None => self.publisher.log("No server log files found"),
        }
        Ok(())
    }

    async fn tailscale_ip(&self) -> Result<(), DispatchError> {
        let address = self
            .probe
            .vpn()
            .address()
            .await
            .map_err(DispatchError::external("Error getting Tailscale IP"))?
            .ok_or_else(|| DispatchError::Rejected("Failed to get Tailscale IP".to_string()))?;
        let port = self.probe.game_port();
        self.publisher.status(format!(
            "Tailscale IP: {address}, Connect to Minecraft at {address}:{port}"
        ));
        Ok(())
    }

    async fn minecraft_command(&self, command: &ControlCommand) -> Result<(), DispatchError> {
        let text = command
            .arg_str("text")
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| DispatchError::InvalidArguments("No command text provided".to_string()))?;
        if !self.probe.server_running().await {
            return Err(DispatchError::Rejected(
                "Cannot send command: Server is not running".to_string(),
            ));
        }
        self.mux
            .send_literal(&self.settings.session, text)
            .await
            .map_err(DispatchError::external("Failed to send command"))?;
        self.publisher.log(format!("Sent command to Minecraft: {text}"));
        Ok(())
    }

    async fn check_running_server(&self) -> Result<(), DispatchError> {
        let context = "Error checking for external servers";
        let pids = self
            .processes
            .find(EXTERNAL_SERVER_PATTERN)
            .await
            .map_err(DispatchError::external(context))?;
        if pids.is_empty() {
            return Ok(());
        }
        let managed = self
            .mux
            .has_session(&self.settings.session)
            .await
            .map_err(DispatchError::external(context))?;
        info!(event = "external_server_check", pids = ?pids, managed);
        if !managed {
            self.publisher.external_server(EXTERNAL_SERVER_WARNING);
        }
        Ok(())
    }

    /// Always ends the controller; a supervisor restarts it with the new
    /// environment. `variables` is merged over the stored config, so keys it
    /// does not name are kept.
    fn set_environment(&self, command: &ControlCommand) -> Flow {
        if let Some(Value::Object(vars)) = command.arg("variables") {
            let saved = EnvConfig::from_map(vars.clone()).and_then(|updates| {
                let mut env = self.runner.reload_env();
                for (key, value) in updates.vars() {
                    env.insert(key, value);
                }
                env.save(&self.settings.env_config).map(|()| env.len())
            });
            match saved {
                Ok(count) => info!(
                    event = "environment_saved",
                    path = %self.settings.env_config.display(),
                    count
                ),
                Err(err) => self.publisher.error(DispatchError::from(err).to_string()),
            }
        }
        info!(event = "set_environment_shutdown");
        Flow::Shutdown
    }
}

fn tail_count(value: Option<&Value>) -> Result<usize, DispatchError> {
    let invalid = || DispatchError::InvalidArguments("Invalid 'lines' argument".to_string());
    let count = match value {
        None => Ok(DEFAULT_TAIL_LINES),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(invalid),
        Some(Value::String(s)) => s.trim().parse::<usize>().map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }?;
    if count == 0 {
        return Err(invalid());
    }
    Ok(count)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "handler panicked".to_string()
}
