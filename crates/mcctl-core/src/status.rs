use serde::{Deserialize, Serialize};
use std::fmt;

/// Published on the details channel when a snapshot has no detail line.
pub const DETAILS_ABSENT: &str = "absent";

pub const ONLINE_DETAIL: &str = "Server is online and operational";
pub const BOOTING_DETAIL: &str = "Server is booting up. Please wait...";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    #[default]
    Unknown,
    TailscaleDisconnected,
    Stopped,
    Starting,
    Running,
}

impl StatusClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusClass::Unknown => "unknown",
            StatusClass::TailscaleDisconnected => "tailscale_disconnected",
            StatusClass::Stopped => "stopped",
            StatusClass::Starting => "starting",
            StatusClass::Running => "running",
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub class: StatusClass,
    #[serde(default)]
    pub address_port: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl StatusSnapshot {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn tailscale_disconnected() -> Self {
        Self {
            class: StatusClass::TailscaleDisconnected,
            address_port: None,
            detail: None,
        }
    }

    pub fn stopped(address_port: impl Into<String>) -> Self {
        Self {
            class: StatusClass::Stopped,
            address_port: Some(address_port.into()),
            detail: None,
        }
    }

    pub fn starting(address_port: impl Into<String>) -> Self {
        Self {
            class: StatusClass::Starting,
            address_port: Some(address_port.into()),
            detail: Some(BOOTING_DETAIL.to_string()),
        }
    }

    /// A missing enrichment falls back to the generic online line.
    pub fn running(address_port: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            class: StatusClass::Running,
            address_port: Some(address_port.into()),
            detail: Some(detail.unwrap_or_else(|| ONLINE_DETAIL.to_string())),
        }
    }

    pub fn status_line(&self) -> String {
        let address = self.address_port.as_deref().unwrap_or("unknown address");
        match self.class {
            StatusClass::Running => format!("Server running (accessible at {address})"),
            StatusClass::Starting => {
                format!("Server is starting (will be accessible at {address})")
            }
            StatusClass::Stopped => "Stopped (ready to run)".to_string(),
            StatusClass::TailscaleDisconnected => "Tailscale not connected".to_string(),
            StatusClass::Unknown => "Status unknown".to_string(),
        }
    }

    pub fn details_line(&self) -> String {
        self.detail
            .clone()
            .unwrap_or_else(|| DETAILS_ABSENT.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_has_no_detail() {
        let snapshot = StatusSnapshot::stopped("100.64.0.7:25565");
        assert_eq!(snapshot.status_line(), "Stopped (ready to run)");
        assert_eq!(snapshot.details_line(), DETAILS_ABSENT);
    }

    #[test]
    fn running_without_enrichment_reports_online() {
        let snapshot = StatusSnapshot::running("100.64.0.7:25565", None);
        assert_eq!(
            snapshot.status_line(),
            "Server running (accessible at 100.64.0.7:25565)"
        );
        assert_eq!(snapshot.details_line(), ONLINE_DETAIL);
    }

    #[test]
    fn starting_mentions_future_address() {
        let snapshot = StatusSnapshot::starting("100.64.0.7:25565");
        assert_eq!(
            snapshot.status_line(),
            "Server is starting (will be accessible at 100.64.0.7:25565)"
        );
        assert_eq!(snapshot.details_line(), BOOTING_DETAIL);
    }

    #[test]
    fn disconnected_and_unknown_lines() {
        assert_eq!(
            StatusSnapshot::tailscale_disconnected().status_line(),
            "Tailscale not connected"
        );
        assert_eq!(StatusSnapshot::unknown().status_line(), "Status unknown");
        assert_eq!(StatusSnapshot::unknown().details_line(), DETAILS_ABSENT);
    }
}
