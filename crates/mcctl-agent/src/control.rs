use crate::dispatch::{Dispatcher, Flow};
use crate::external::VpnCredentials;
use crate::publish::Publisher;
use mcctl_core::{ControlCommand, ControlMessage};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Signal,
    /// A handler asked for a restart by the external supervisor.
    RestartRequested,
    BusClosed,
}

impl ExitReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitReason::Signal | ExitReason::RestartRequested => 0,
            ExitReason::BusClosed => 1,
        }
    }
}

/// Startup sequencing plus the serialized dispatch loop.
pub struct ControlLoop {
    dispatcher: Dispatcher,
    publisher: Publisher,
    vpn_state_files: Vec<String>,
}

impl ControlLoop {
    pub fn new(dispatcher: Dispatcher, publisher: Publisher, vpn_state_files: Vec<String>) -> Self {
        Self {
            dispatcher,
            publisher,
            vpn_state_files,
        }
    }

    /// Best-effort steps that follow the (fatal) env config load.
    pub async fn startup(&mut self) {
        if !self.restore_vpn_state().await {
            warn!(event = "vpn_state_restore_incomplete");
        }
        self.bring_up_vpn().await;
        self.dispatcher.monitor_mut().start();
    }

    async fn restore_vpn_state(&self) -> bool {
        let runner = self.dispatcher.runner();
        let mut restored = true;
        for file in &self.vpn_state_files {
            match runner.run("get_file", std::slice::from_ref(file)).await {
                Ok(_) => info!(event = "vpn_state_restored", file = %file),
                Err(err) => {
                    self.publisher.error(format!("Failed to download {file}: {err}"));
                    restored = false;
                }
            }
        }
        if restored {
            runner.reload_env();
        }
        restored
    }

    async fn bring_up_vpn(&self) {
        let env = self.dispatcher.runner().env_snapshot();
        let creds = match VpnCredentials::from_env(&env) {
            Ok(creds) => creds,
            Err(missing) => {
                self.publisher.error(format!(
                    "Missing required environment variables for Tailscale: {}",
                    missing.join(", ")
                ));
                return;
            }
        };
        match self.dispatcher.probe().vpn().up(&creds).await {
            Ok(()) => info!(event = "vpn_up", hostname = %creds.hostname),
            Err(err) => self.publisher.error(format!("Failed to start tailscale: {err}")),
        }
    }

    /// Probes once for a baseline, then dispatches inbound messages one at a
    /// time until a signal, a restart request or the bus going away. A command
    /// still running when the signal lands is abandoned, not awaited.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) -> ExitReason {
        self.dispatcher.dispatch(ControlCommand::new("status")).await;

        let reason = loop {
            let raw = tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break ExitReason::Signal,
                msg = inbound.recv() => match msg {
                    Some(raw) => raw,
                    None => break ExitReason::BusClosed,
                },
            };
            info!(event = "control_received", data = %raw);
            let command = ControlMessage::decode(&raw).into_command();
            let flow = tokio::select! {
                flow = self.dispatcher.dispatch(command) => flow,
                _ = wait_for_shutdown(&mut shutdown) => break ExitReason::Signal,
            };
            if flow == Flow::Shutdown {
                break ExitReason::RestartRequested;
            }
        };

        match reason {
            ExitReason::BusClosed => warn!(event = "control_bus_closed"),
            _ => info!(
                event = "control_shutdown",
                reason = ?reason,
                monitor_active = self.dispatcher.monitor_active()
            ),
        }
        self.dispatcher.monitor_mut().stop().await;
        reason
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
