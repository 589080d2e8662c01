use crate::error::ExternalError;
use crate::external::{require_success, run_tool, Multiplexer, VpnClient, VpnCredentials, TOOL_TIMEOUT};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DAEMON_SESSION: &str = "tailscale";
const DAEMON_SETTLE: Duration = Duration::from_secs(2);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Drives the `tailscale` CLI; the daemon itself lives in its own detached
/// multiplexer session so it outlives any single command.
pub struct Tailscale {
    cli: String,
    daemon: String,
    mux: Arc<dyn Multiplexer>,
}

impl Tailscale {
    pub fn new(mux: Arc<dyn Multiplexer>) -> Self {
        Self {
            cli: "tailscale".to_string(),
            daemon: "tailscaled".to_string(),
            mux,
        }
    }

    async fn cli(&self, args: &[&str], timeout: Duration) -> Result<String, ExternalError> {
        let output = run_tool(&self.cli, args, timeout).await?;
        require_success(&self.cli, output)
    }
}

impl VpnClient for Tailscale {
    fn address(&self) -> BoxFuture<'_, Result<Option<String>, ExternalError>> {
        Box::pin(async move {
            let output = run_tool(&self.cli, &["ip", "-4"], TOOL_TIMEOUT).await?;
            if !output.status.success() {
                return Ok(None);
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(stdout
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string))
        })
    }

    fn up<'a>(&'a self, creds: &'a VpnCredentials) -> BoxFuture<'a, Result<(), ExternalError>> {
        Box::pin(async move {
            let daemon = format!("{} --statedir={}", self.daemon, creds.state_dir);
            self.mux.spawn_detached(DAEMON_SESSION, &daemon).await?;
            info!(event = "tailscaled_started", session = DAEMON_SESSION);
            tokio::time::sleep(DAEMON_SETTLE).await;

            let auth = format!("--auth-key={}", creds.auth_key);
            self.cli(&["login", &auth], LOGIN_TIMEOUT).await?;
            info!(event = "tailscale_logged_in");

            let hostname = format!("--hostname={}", creds.hostname);
            self.cli(&["set", &hostname], TOOL_TIMEOUT).await?;
            info!(event = "tailscale_hostname_set", hostname = %creds.hostname);
            Ok(())
        })
    }
}
