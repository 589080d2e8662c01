use mcctl_core::bus::Channel;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub channel: Channel,
    pub data: String,
}

/// Fire-and-forget handle onto the outbound bus queue. Publishing never waits:
/// when the queue is full the message is dropped, matching the bus's
/// at-most-once delivery.
#[derive(Clone, Debug)]
pub struct Publisher {
    tx: mpsc::Sender<Outbound>,
}

impl Publisher {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn publish(&self, channel: Channel, data: impl Into<String>) {
        let data = data.into();
        match self.tx.try_send(Outbound { channel, data }) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                warn!(event = "publish_dropped", channel = %msg.channel, bytes = msg.data.len());
            }
            Err(TrySendError::Closed(msg)) => {
                debug!(event = "publish_closed", channel = %msg.channel);
            }
        }
    }

    pub fn status(&self, line: impl Into<String>) {
        let line = line.into();
        info!(event = "publish_status", status = %line);
        self.publish(Channel::Status, line);
    }

    pub fn details(&self, line: impl Into<String>) {
        self.publish(Channel::Details, line);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(event = "publish_error", error = %message);
        self.publish(Channel::Error, message);
    }

    pub fn log(&self, line: impl Into<String>) {
        self.publish(Channel::Logs, line);
    }

    pub fn terminal(&self, text: impl Into<String>) {
        let text = text.into();
        trace!(event = "publish_terminal", bytes = text.len());
        self.publish(Channel::Terminal, text);
    }

    pub fn external_server(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(event = "publish_external_server", message = %message);
        self.publish(Channel::ExternalServer, message);
    }
}
