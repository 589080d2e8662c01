use crate::external::{Multiplexer, ServerQuery, VpnClient};
use mcctl_core::StatusSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

pub const DEFAULT_GAME_PORT: u16 = 25565;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Infers server state from VPN address, port liveness and session
/// existence, consulted strictly in that order.
pub struct StatusProbe {
    vpn: Arc<dyn VpnClient>,
    mux: Arc<dyn Multiplexer>,
    query: Arc<dyn ServerQuery>,
    session: String,
    game_port: u16,
    connect_timeout: Duration,
}

impl StatusProbe {
    pub fn new(
        vpn: Arc<dyn VpnClient>,
        mux: Arc<dyn Multiplexer>,
        query: Arc<dyn ServerQuery>,
        session: impl Into<String>,
    ) -> Self {
        Self {
            vpn,
            mux,
            query,
            session: session.into(),
            game_port: DEFAULT_GAME_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_port(mut self, game_port: u16) -> Self {
        self.game_port = game_port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn game_port(&self) -> u16 {
        self.game_port
    }

    pub fn vpn(&self) -> &Arc<dyn VpnClient> {
        &self.vpn
    }

    pub async fn probe(&self) -> StatusSnapshot {
        let Some(address) = self.overlay_address().await else {
            return StatusSnapshot::tailscale_disconnected();
        };
        let address_port = format!("{address}:{}", self.game_port);

        if self.port_open(&address).await {
            let detail = self.enrich(&address).await;
            return StatusSnapshot::running(address_port, detail);
        }

        match self.mux.has_session(&self.session).await {
            Ok(true) => StatusSnapshot::starting(address_port),
            Ok(false) => StatusSnapshot::stopped(address_port),
            Err(err) => {
                warn!(event = "probe_session_error", session = %self.session, error = %err);
                StatusSnapshot::unknown()
            }
        }
    }

    /// Lookup failures count as "no address".
    pub async fn overlay_address(&self) -> Option<String> {
        match self.vpn.address().await {
            Ok(address) => address,
            Err(err) => {
                warn!(event = "probe_vpn_error", error = %err);
                None
            }
        }
    }

    /// Port liveness only; used to gate keystroke injection.
    pub async fn server_running(&self) -> bool {
        match self.overlay_address().await {
            Some(address) => self.port_open(&address).await,
            None => false,
        }
    }

    pub async fn port_open(&self, address: &str) -> bool {
        let connect = TcpStream::connect((address, self.game_port));
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(_)) => true,
            Ok(Err(err)) => {
                debug!(event = "probe_port_closed", address, port = self.game_port, error = %err);
                false
            }
            Err(_) => {
                debug!(event = "probe_port_timeout", address, port = self.game_port);
                false
            }
        }
    }

    async fn enrich(&self, address: &str) -> Option<String> {
        match self.query.query(address, self.game_port).await {
            Ok(info) => Some(info.detail_line()),
            Err(err) => {
                debug!(event = "probe_enrich_failed", address, error = %err);
                None
            }
        }
    }
}
