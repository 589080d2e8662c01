use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const PROTOCOL_VERSION: &str = "1";
pub const DEFAULT_CHANNEL_PREFIX: &str = "minecraft";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Control,
    Status,
    Details,
    Logs,
    Terminal,
    Error,
    ExternalServer,
}

impl Channel {
    pub fn suffix(&self) -> &'static str {
        match self {
            Channel::Control => "control",
            Channel::Status => "status",
            Channel::Details => "details",
            Channel::Logs => "logs",
            Channel::Terminal => "xterm",
            Channel::Error => "error",
            Channel::ExternalServer => "external_server",
        }
    }

    pub fn topic(&self, prefix: &str) -> String {
        format!("{prefix}:{}", self.suffix())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusEnvelope {
    pub version: String,
    pub sender_id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub msg: BusMsg,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BusMsg {
    Subscribe(SubscribePayload),
    Publish(PublishPayload),
    Message(PublishPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribePayload {
    #[serde(default)]
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishPayload {
    pub channel: String,
    pub data: String,
}

impl BusEnvelope {
    pub fn new(sender_id: &str, msg: BusMsg) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            sender_id: sender_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            msg,
        }
    }

    pub fn subscribe(sender_id: &str, channels: Vec<String>) -> Self {
        Self::new(sender_id, BusMsg::Subscribe(SubscribePayload { channels }))
    }

    pub fn publish(sender_id: &str, channel: String, data: String) -> Self {
        Self::new(sender_id, BusMsg::Publish(PublishPayload { channel, data }))
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn decode(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Data delivered on `channel`, if this envelope is such a delivery.
    pub fn delivery_on(&self, channel: &str) -> Option<&str> {
        match &self.msg {
            BusMsg::Message(payload) if payload.channel == channel => Some(&payload.data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_use_prefix() {
        assert_eq!(Channel::Control.topic("minecraft"), "minecraft:control");
        assert_eq!(Channel::Terminal.topic("minecraft"), "minecraft:xterm");
        assert_eq!(
            Channel::ExternalServer.topic("mc"),
            "mc:external_server"
        );
    }

    #[test]
    fn publish_envelope_wire_shape() {
        let envelope = BusEnvelope::publish(
            "mcctl",
            "minecraft:status".to_string(),
            "Stopped (ready to run)".to_string(),
        );
        let value: serde_json::Value =
            serde_json::from_str(&envelope.encode()).expect("json");
        assert_eq!(value["type"], "publish");
        assert_eq!(value["payload"]["channel"], "minecraft:status");
        assert_eq!(value["payload"]["data"], "Stopped (ready to run)");
        assert_eq!(value["version"], PROTOCOL_VERSION);
    }

    #[test]
    fn delivery_matches_channel_only() {
        let raw = r#"{"version":"1","sender_id":"hub","timestamp":"t","type":"message","payload":{"channel":"minecraft:control","data":"status"}}"#;
        let envelope = BusEnvelope::decode(raw).expect("decode");
        assert_eq!(envelope.delivery_on("minecraft:control"), Some("status"));
        assert_eq!(envelope.delivery_on("minecraft:status"), None);
    }
}
