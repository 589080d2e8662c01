//! Narrow interfaces onto the processes and services the controller drives
//! but does not own: the terminal multiplexer, the VPN client, the host
//! process table and the game server's status protocol.

use crate::error::ExternalError;
use futures_util::future::BoxFuture;
use mcctl_core::EnvConfig;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

pub const TOOL_TIMEOUT: Duration = Duration::from_secs(5);

pub trait Multiplexer: Send + Sync {
    /// Rendered buffer of `session`, formatting markup included.
    fn capture<'a>(&'a self, session: &'a str) -> BoxFuture<'a, Result<String, ExternalError>>;
    fn has_session<'a>(&'a self, session: &'a str) -> BoxFuture<'a, Result<bool, ExternalError>>;
    /// Types `text` into `session` verbatim, then presses Enter.
    fn send_literal<'a>(
        &'a self,
        session: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), ExternalError>>;
    fn spawn_detached<'a>(
        &'a self,
        session: &'a str,
        command: &'a str,
    ) -> BoxFuture<'a, Result<(), ExternalError>>;
}

pub trait VpnClient: Send + Sync {
    /// Overlay address, `None` while the client has none assigned.
    fn address(&self) -> BoxFuture<'_, Result<Option<String>, ExternalError>>;
    fn up<'a>(&'a self, creds: &'a VpnCredentials) -> BoxFuture<'a, Result<(), ExternalError>>;
}

pub trait ProcessTable: Send + Sync {
    /// Pids whose full command line matches `pattern`.
    fn find<'a>(&'a self, pattern: &'a str) -> BoxFuture<'a, Result<Vec<u32>, ExternalError>>;
}

pub trait ServerQuery: Send + Sync {
    fn query<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<ServerInfo, ExternalError>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub version: String,
    pub players_online: i64,
    pub players_max: i64,
    pub latency: Duration,
    pub motd: String,
}

impl ServerInfo {
    pub fn detail_line(&self) -> String {
        let mut line = format!(
            "Version: {} | Players: {}/{} | Ping: {:.1}ms",
            self.version,
            self.players_online,
            self.players_max,
            self.latency.as_secs_f64() * 1000.0
        );
        if !self.motd.is_empty() {
            line.push_str(" | MOTD: ");
            line.push_str(&self.motd);
        }
        line
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpnCredentials {
    pub state_dir: String,
    pub auth_key: String,
    pub hostname: String,
}

impl VpnCredentials {
    pub const REQUIRED: [&'static str; 3] = ["TS_STATE_DIR", "TS_AUTHKEY", "TS_HOSTNAME"];

    /// Err lists every required key that is missing.
    pub fn from_env(env: &EnvConfig) -> Result<Self, Vec<&'static str>> {
        let missing = missing_keys(env, &Self::REQUIRED);
        if !missing.is_empty() {
            return Err(missing);
        }
        Ok(Self {
            state_dir: env.get("TS_STATE_DIR").unwrap_or_default(),
            auth_key: env.get("TS_AUTHKEY").unwrap_or_default(),
            hostname: env.get("TS_HOSTNAME").unwrap_or_default(),
        })
    }
}

fn missing_keys(env: &EnvConfig, required: &[&'static str]) -> Vec<&'static str> {
    required
        .iter()
        .copied()
        .filter(|key| env.get(key).is_none())
        .collect()
}

pub async fn run_tool(program: &str, args: &[&str], timeout: Duration) -> Result<Output, ExternalError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| ExternalError::Timeout {
            program: program.to_string(),
            timeout,
        })?
        .map_err(|source| ExternalError::Spawn {
            program: program.to_string(),
            source,
        })?;
    Ok(output)
}

pub fn require_success(program: &str, output: Output) -> Result<String, ExternalError> {
    if !output.status.success() {
        return Err(ExternalError::Exit {
            program: program.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[derive(Debug, Clone)]
pub struct Pgrep {
    program: String,
}

impl Default for Pgrep {
    fn default() -> Self {
        Self {
            program: "pgrep".to_string(),
        }
    }
}

impl ProcessTable for Pgrep {
    fn find<'a>(&'a self, pattern: &'a str) -> BoxFuture<'a, Result<Vec<u32>, ExternalError>> {
        Box::pin(async move {
            let output = run_tool(&self.program, &["-f", pattern], TOOL_TIMEOUT).await?;
            // pgrep exits 1 when nothing matched.
            if output.status.code() == Some(1) {
                return Ok(Vec::new());
            }
            let stdout = require_success(&self.program, output)?;
            Ok(stdout
                .lines()
                .filter_map(|line| line.trim().parse::<u32>().ok())
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_line_includes_motd_when_present() {
        let mut info = ServerInfo {
            version: "1.20.1".to_string(),
            players_online: 2,
            players_max: 20,
            latency: Duration::from_micros(12_340),
            motd: "A Minecraft Server".to_string(),
        };
        assert_eq!(
            info.detail_line(),
            "Version: 1.20.1 | Players: 2/20 | Ping: 12.3ms | MOTD: A Minecraft Server"
        );
        info.motd.clear();
        assert_eq!(info.detail_line(), "Version: 1.20.1 | Players: 2/20 | Ping: 12.3ms");
    }

    #[test]
    fn missing_keys_lists_every_absent_key_in_order() {
        let mut env = EnvConfig::default();
        env.insert("MCCTL_TEST_PRESENT", "yes");
        let missing = missing_keys(
            &env,
            &["MCCTL_TEST_ABSENT_ONE", "MCCTL_TEST_PRESENT", "MCCTL_TEST_ABSENT_TWO"],
        );
        assert_eq!(missing, vec!["MCCTL_TEST_ABSENT_ONE", "MCCTL_TEST_ABSENT_TWO"]);
    }

    #[test]
    fn credentials_resolve_from_config() {
        let mut env = EnvConfig::default();
        env.insert("TS_STATE_DIR", "/var/lib/tailscale");
        env.insert("TS_AUTHKEY", "tskey-123");
        env.insert("TS_HOSTNAME", "mc-box");
        let creds = VpnCredentials::from_env(&env).expect("credentials");
        assert_eq!(creds.hostname, "mc-box");
        assert_eq!(creds.state_dir, "/var/lib/tailscale");
    }

    #[tokio::test]
    async fn run_tool_reports_missing_binary() {
        let err = run_tool("mcctl-definitely-missing-binary", &[], TOOL_TIMEOUT)
            .await
            .expect_err("spawn failure");
        assert!(matches!(err, ExternalError::Spawn { .. }));
    }
}
