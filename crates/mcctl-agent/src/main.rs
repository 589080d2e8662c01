mod config;
mod control;
mod dispatch;
mod error;
mod external;
mod hub;
mod logging;
mod monitor;
mod probe;
mod publish;
mod runner;
mod server_logs;
mod slp;
mod tailscale;
#[cfg(test)]
mod testing;
mod tmux;

use anyhow::{Context, Result};
use clap::Parser;
use config::{load_settings, Args, Settings};
use control::{ControlLoop, ExitReason};
use dispatch::{DispatchSettings, Dispatcher};
use external::{Multiplexer, Pgrep, ProcessTable, ServerQuery, VpnClient};
use hub::{hub_loop, HubConfig};
use logging::init_logging;
use mcctl_core::EnvConfig;
use monitor::TerminalMonitor;
use probe::StatusProbe;
use publish::Publisher;
use runner::{ProcessRunner, RunnerConfig, READER_JOIN_WAIT};
use slp::SlpClient;
use std::{sync::Arc, time::Duration};
use tailscale::Tailscale;
use tmux::Tmux;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

const OUTBOUND_QUEUE: usize = 1024;
const INBOUND_QUEUE: usize = 64;
const HUB_DRAIN_WAIT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let settings = match load_settings(args) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("config_error: {err:#}");
            std::process::exit(1);
        }
    };
    init_logging(&settings);

    let code = match run(settings).await {
        Ok(reason) => reason.exit_code(),
        Err(err) => {
            error!(event = "startup_failed", error = %format!("{err:#}"));
            1
        }
    };
    std::process::exit(code);
}

async fn run(settings: Settings) -> Result<ExitReason> {
    let env = EnvConfig::load(&settings.env_config)
        .with_context(|| format!("loading {}", settings.env_config.display()))?;
    info!(
        event = "env_loaded",
        path = %settings.env_config.display(),
        vars = env.len()
    );

    let (publisher, outbound_rx) = Publisher::channel(OUTBOUND_QUEUE);
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(INBOUND_QUEUE);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let hub_cfg = HubConfig {
        url: settings.hub_url.clone(),
        channel_prefix: settings.channel_prefix.clone(),
        sender_id: format!("mcctl-agent-{}", std::process::id()),
    };
    let hub_task = tokio::spawn(hub_loop(hub_cfg, outbound_rx, inbound_tx, shutdown_rx.clone()));
    let signal_task = tokio::spawn(watch_signals(shutdown_tx.clone()));

    let mux: Arc<dyn Multiplexer> = Arc::new(Tmux::default());
    let vpn: Arc<dyn VpnClient> = Arc::new(Tailscale::new(mux.clone()));
    let query: Arc<dyn ServerQuery> = Arc::new(SlpClient::new(settings.probe_timeout));
    let processes: Arc<dyn ProcessTable> = Arc::new(Pgrep::default());

    let runner = Arc::new(ProcessRunner::new(
        RunnerConfig {
            script: settings.server_script.clone(),
            working_dir: settings.server_dir.clone(),
            env_config: settings.env_config.clone(),
            timeout: settings.command_timeout,
            join_wait: READER_JOIN_WAIT,
        },
        env,
        publisher.clone(),
    ));
    let probe = StatusProbe::new(vpn, mux.clone(), query, settings.session.clone())
        .with_port(settings.game_port)
        .with_connect_timeout(settings.probe_timeout);
    let monitor = TerminalMonitor::new(mux.clone(), publisher.clone(), settings.session.clone());
    let dispatcher = Dispatcher::new(
        runner,
        probe,
        monitor,
        processes,
        mux,
        publisher.clone(),
        DispatchSettings {
            server_dir: settings.server_dir.clone(),
            env_config: settings.env_config.clone(),
            session: settings.session.clone(),
        },
    );
    let mut control = ControlLoop::new(dispatcher, publisher, settings.vpn_state_files.clone());

    info!(event = "startup", hub = %settings.hub_url, session = %settings.session);
    let mut startup_shutdown = shutdown_rx.clone();
    let interrupted = tokio::select! {
        _ = control.startup() => false,
        _ = startup_shutdown.wait_for(|stop| *stop) => true,
    };
    let reason = if interrupted {
        warn!(event = "startup_interrupted");
        ExitReason::Signal
    } else {
        control.run(inbound_rx, shutdown_rx).await
    };

    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(HUB_DRAIN_WAIT, hub_task).await.is_err() {
        warn!(event = "hub_drain_timeout");
    }
    signal_task.abort();
    info!(event = "exit", reason = ?reason, code = reason.exit_code());
    Ok(reason)
}

async fn watch_signals(shutdown: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!(event = "signal", kind = "interrupt"),
                    _ = term.recv() => info!(event = "signal", kind = "terminate"),
                }
            }
            Err(err) => {
                warn!(event = "signal_install_failed", error = %err);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "signal", kind = "interrupt");
    }
    let _ = shutdown.send(true);
}
