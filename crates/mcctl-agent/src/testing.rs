//! In-process stand-ins for the external collaborators.

use crate::error::ExternalError;
use crate::external::{Multiplexer, ProcessTable, ServerInfo, ServerQuery, VpnClient, VpnCredentials};
use crate::publish::Outbound;
use futures_util::future::BoxFuture;
use mcctl_core::bus::Channel;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};
use tokio::sync::mpsc;

pub fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

/// A loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    port
}

pub fn on(outbound: &[Outbound], channel: Channel) -> Vec<String> {
    outbound
        .iter()
        .filter(|msg| msg.channel == channel)
        .map(|msg| msg.data.clone())
        .collect()
}

#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}

#[derive(Default)]
pub struct FakeMux {
    pub session_exists: Mutex<bool>,
    pub captures: Mutex<VecDeque<Result<String, String>>>,
    pub capture_calls: AtomicUsize,
    pub sent: Mutex<Vec<(String, String)>>,
    pub spawned: Mutex<Vec<(String, String)>>,
}

impl FakeMux {
    pub fn with_session(exists: bool) -> Self {
        let mux = Self::default();
        *mux.session_exists.lock().expect("lock") = exists;
        mux
    }

    pub fn push_capture(&self, capture: Result<&str, &str>) {
        self.captures
            .lock()
            .expect("lock")
            .push_back(capture.map(str::to_string).map_err(str::to_string));
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("lock").clone()
    }
}

impl Multiplexer for FakeMux {
    fn capture<'a>(&'a self, _session: &'a str) -> BoxFuture<'a, Result<String, ExternalError>> {
        Box::pin(async move {
            self.capture_calls.fetch_add(1, Ordering::SeqCst);
            let mut captures = self.captures.lock().expect("lock");
            let next = if captures.len() > 1 {
                captures.pop_front()
            } else {
                captures.front().cloned()
            };
            match next {
                Some(Ok(raw)) => Ok(raw),
                Some(Err(reason)) => Err(ExternalError::Protocol(reason)),
                None => Ok(String::new()),
            }
        })
    }

    fn has_session<'a>(&'a self, _session: &'a str) -> BoxFuture<'a, Result<bool, ExternalError>> {
        Box::pin(async move { Ok(*self.session_exists.lock().expect("lock")) })
    }

    fn send_literal<'a>(
        &'a self,
        session: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), ExternalError>> {
        Box::pin(async move {
            self.sent
                .lock()
                .expect("lock")
                .push((session.to_string(), text.to_string()));
            Ok(())
        })
    }

    fn spawn_detached<'a>(
        &'a self,
        session: &'a str,
        command: &'a str,
    ) -> BoxFuture<'a, Result<(), ExternalError>> {
        Box::pin(async move {
            self.spawned
                .lock()
                .expect("lock")
                .push((session.to_string(), command.to_string()));
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct FakeVpn {
    pub address: Mutex<Option<String>>,
    pub fail_up: bool,
    pub up_calls: Mutex<Vec<VpnCredentials>>,
}

impl FakeVpn {
    pub fn with_address(address: Option<&str>) -> Self {
        Self {
            address: Mutex::new(address.map(str::to_string)),
            ..Self::default()
        }
    }
}

impl VpnClient for FakeVpn {
    fn address(&self) -> BoxFuture<'_, Result<Option<String>, ExternalError>> {
        Box::pin(async move { Ok(self.address.lock().expect("lock").clone()) })
    }

    fn up<'a>(&'a self, creds: &'a VpnCredentials) -> BoxFuture<'a, Result<(), ExternalError>> {
        Box::pin(async move {
            self.up_calls.lock().expect("lock").push(creds.clone());
            if self.fail_up {
                return Err(ExternalError::Protocol("login refused".to_string()));
            }
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct FakeProcesses {
    pub pids: Vec<u32>,
    pub panics: bool,
}

impl ProcessTable for FakeProcesses {
    fn find<'a>(&'a self, _pattern: &'a str) -> BoxFuture<'a, Result<Vec<u32>, ExternalError>> {
        Box::pin(async move {
            if self.panics {
                panic!("process table exploded");
            }
            Ok(self.pids.clone())
        })
    }
}

#[derive(Default)]
pub struct FakeQuery {
    pub info: Option<ServerInfo>,
    pub calls: AtomicUsize,
}

impl ServerQuery for FakeQuery {
    fn query<'a>(&'a self, _host: &'a str, _port: u16) -> BoxFuture<'a, Result<ServerInfo, ExternalError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.info
                .clone()
                .ok_or_else(|| ExternalError::Protocol("no status".to_string()))
        })
    }
}

/// Dispatcher wired to fakes and a generated lifecycle script.
#[cfg(unix)]
pub struct Rig {
    pub dispatcher: crate::dispatch::Dispatcher,
    pub publisher: crate::publish::Publisher,
    pub rx: mpsc::Receiver<Outbound>,
    pub mux: std::sync::Arc<FakeMux>,
    pub vpn: std::sync::Arc<FakeVpn>,
    pub dir: tempfile::TempDir,
}

#[cfg(unix)]
pub struct RigSetup {
    pub script: &'static str,
    pub env_json: &'static str,
    pub address: Option<&'static str>,
    pub vpn_fails: bool,
    pub session: bool,
    pub port: u16,
    pub processes: FakeProcesses,
}

#[cfg(unix)]
impl Default for RigSetup {
    fn default() -> Self {
        Self {
            script: "echo ok\n",
            env_json: "{}",
            address: None,
            vpn_fails: false,
            session: false,
            port: 25565,
            processes: FakeProcesses::default(),
        }
    }
}

#[cfg(unix)]
pub fn rig(setup: RigSetup) -> Rig {
    use crate::dispatch::{DispatchSettings, Dispatcher};
    use crate::monitor::{MonitorTiming, TerminalMonitor};
    use crate::probe::StatusProbe;
    use crate::publish::Publisher;
    use crate::runner::{ProcessRunner, RunnerConfig, READER_JOIN_WAIT};
    use mcctl_core::EnvConfig;
    use std::sync::Arc;
    use std::time::Duration;

    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_script(dir.path(), "server.sh", setup.script);
    let env_config = dir.path().join("env_config.json");
    std::fs::write(&env_config, setup.env_json).expect("env config");
    let env = EnvConfig::load(&env_config).expect("valid env config");
    let (publisher, rx) = Publisher::channel(1024);
    let mux = Arc::new(FakeMux::with_session(setup.session));
    let vpn = Arc::new(FakeVpn {
        address: Mutex::new(setup.address.map(str::to_string)),
        fail_up: setup.vpn_fails,
        ..FakeVpn::default()
    });

    let runner = Arc::new(ProcessRunner::new(
        RunnerConfig {
            script,
            working_dir: dir.path().to_path_buf(),
            env_config: env_config.clone(),
            timeout: Duration::from_secs(10),
            join_wait: READER_JOIN_WAIT,
        },
        env,
        publisher.clone(),
    ));
    let probe = StatusProbe::new(vpn.clone(), mux.clone(), Arc::new(FakeQuery::default()), "gameserver")
        .with_port(setup.port)
        .with_connect_timeout(Duration::from_millis(300));
    let monitor = TerminalMonitor::new(mux.clone(), publisher.clone(), "gameserver").with_timing(MonitorTiming {
        tick: Duration::from_millis(20),
        backoff: Duration::from_millis(50),
        stop_wait: Duration::from_secs(1),
    });
    let dispatcher = Dispatcher::new(
        runner,
        probe,
        monitor,
        Arc::new(setup.processes),
        mux.clone(),
        publisher.clone(),
        DispatchSettings {
            server_dir: dir.path().to_path_buf(),
            env_config,
            session: "gameserver".to_string(),
        },
    );
    Rig {
        dispatcher,
        publisher,
        rx,
        mux,
        vpn,
        dir,
    }
}
