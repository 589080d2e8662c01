use crate::publish::Outbound;
use futures_util::{SinkExt, StreamExt};
use mcctl_core::bus::{BusEnvelope, Channel};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    watch,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub url: Url,
    pub channel_prefix: String,
    pub sender_id: String,
}

enum Session {
    Reconnect,
    Finished,
}

/// Keeps one bus connection alive: subscribes to the control channel on
/// every connect, forwards control deliveries inbound and drains the
/// outbound queue as publish envelopes. Returns once `shutdown` flips or the
/// outbound queue closes.
pub async fn hub_loop(
    config: HubConfig,
    mut outbound: mpsc::Receiver<Outbound>,
    inbound: mpsc::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Duration::from_secs(1);
    loop {
        if *shutdown.borrow() {
            return;
        }
        let connect = tokio::select! {
            result = connect_async(config.url.clone()) => result,
            _ = shutdown.changed() => return,
        };
        let (ws, _) = match connect {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "hub_connect_error", url = %config.url, error = %err);
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => return,
                }
                backoff = next_backoff(backoff);
                continue;
            }
        };
        backoff = Duration::from_secs(1);
        info!(event = "hub_connected", url = %config.url);

        match run_session(&config, ws, &mut outbound, &inbound, &mut shutdown).await {
            Session::Finished => return,
            Session::Reconnect => {
                warn!(event = "hub_disconnected", url = %config.url);
            }
        }
    }
}

async fn run_session(
    config: &HubConfig,
    mut ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outbound: &mut mpsc::Receiver<Outbound>,
    inbound: &mpsc::Sender<String>,
    shutdown: &mut watch::Receiver<bool>,
) -> Session {
    let control = Channel::Control.topic(&config.channel_prefix);
    let subscribe = BusEnvelope::subscribe(&config.sender_id, vec![control.clone()]);
    if ws.send(Message::Text(subscribe.encode())).await.is_err() {
        warn!(event = "hub_subscribe_error", channel = %control);
        let _ = ws.close(None).await;
        return Session::Reconnect;
    }
    debug!(event = "hub_subscribed", channel = %control);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                while let Ok(msg) = outbound.try_recv() {
                    let _ = ws.send(publish_message(config, msg)).await;
                }
                let _ = ws.close(None).await;
                return Session::Finished;
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Some(envelope) = BusEnvelope::decode(&text) else {
                        debug!(event = "hub_unparsed_frame", bytes = text.len());
                        continue;
                    };
                    let Some(data) = envelope.delivery_on(&control) else {
                        continue;
                    };
                    match inbound.try_send(data.to_string()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(dropped)) => {
                            warn!(event = "hub_inbound_dropped", data = %dropped);
                        }
                        Err(TrySendError::Closed(_)) => {
                            let _ = ws.close(None).await;
                            return Session::Finished;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Session::Reconnect,
                Some(Ok(_)) => {}
            },
            msg = outbound.recv() => match msg {
                Some(msg) => {
                    if ws.send(publish_message(config, msg)).await.is_err() {
                        return Session::Reconnect;
                    }
                }
                None => {
                    let _ = ws.close(None).await;
                    return Session::Finished;
                }
            },
        }
    }
}

fn publish_message(config: &HubConfig, msg: Outbound) -> Message {
    let envelope = BusEnvelope::publish(
        &config.sender_id,
        msg.channel.topic(&config.channel_prefix),
        msg.data,
    );
    Message::Text(envelope.encode())
}

fn next_backoff(current: Duration) -> Duration {
    let next = current + current;
    if next > Duration::from_secs(10) {
        Duration::from_secs(10)
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcctl_core::bus::BusMsg;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn backoff_doubles_up_to_ten_seconds() {
        assert_eq!(next_backoff(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(next_backoff(Duration::from_secs(8)), Duration::from_secs(10));
        assert_eq!(next_backoff(Duration::from_secs(10)), Duration::from_secs(10));
    }

    async fn next_envelope<S>(ws: &mut S) -> BusEnvelope
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match ws.next().await.expect("frame").expect("ws ok") {
                Message::Text(text) => return BusEnvelope::decode(&text).expect("envelope"),
                _ => continue,
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn subscribes_forwards_control_and_publishes_outbound() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let config = HubConfig {
            url: Url::parse(&format!("ws://{addr}/ws")).expect("url"),
            channel_prefix: "minecraft".to_string(),
            sender_id: "mcctl-test".to_string(),
        };
        let (out_tx, out_rx) = mpsc::channel(16);
        let (in_tx, mut in_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = tokio::spawn(hub_loop(config, out_rx, in_tx, shutdown_rx));

        let (socket, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(socket).await.expect("handshake");

        let subscribe = next_envelope(&mut ws).await;
        assert_eq!(subscribe.sender_id, "mcctl-test");
        match subscribe.msg {
            BusMsg::Subscribe(payload) => {
                assert_eq!(payload.channels, vec!["minecraft:control".to_string()]);
            }
            other => panic!("expected subscribe, got {other:?}"),
        }

        let ignored = BusEnvelope::new(
            "hub",
            BusMsg::Message(mcctl_core::bus::PublishPayload {
                channel: "minecraft:status".to_string(),
                data: "not for us".to_string(),
            }),
        );
        ws.send(Message::Text(ignored.encode())).await.expect("send");
        let delivery = BusEnvelope::new(
            "hub",
            BusMsg::Message(mcctl_core::bus::PublishPayload {
                channel: "minecraft:control".to_string(),
                data: r#"{"command":"status"}"#.to_string(),
            }),
        );
        ws.send(Message::Text(delivery.encode())).await.expect("send");
        let received = tokio::time::timeout(Duration::from_secs(2), in_rx.recv())
            .await
            .expect("inbound in time")
            .expect("inbound");
        assert_eq!(received, r#"{"command":"status"}"#);

        out_tx
            .send(Outbound {
                channel: Channel::Status,
                data: "Stopped (ready to run)".to_string(),
            })
            .await
            .expect("queue");
        let published = next_envelope(&mut ws).await;
        match published.msg {
            BusMsg::Publish(payload) => {
                assert_eq!(payload.channel, "minecraft:status");
                assert_eq!(payload.data, "Stopped (ready to run)");
            }
            other => panic!("expected publish, got {other:?}"),
        }

        shutdown_tx.send(true).expect("shutdown");
        tokio::time::timeout(Duration::from_secs(2), client)
            .await
            .expect("client exits")
            .expect("join");
        assert!(in_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_interrupts_reconnect_backoff() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let config = HubConfig {
            url: Url::parse(&format!("ws://{addr}/ws")).expect("url"),
            channel_prefix: "minecraft".to_string(),
            sender_id: "mcctl-test".to_string(),
        };
        let (_out_tx, out_rx) = mpsc::channel(4);
        let (in_tx, _in_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = tokio::spawn(hub_loop(config, out_rx, in_tx, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).expect("shutdown");
        tokio::time::timeout(Duration::from_secs(2), client)
            .await
            .expect("client exits")
            .expect("join");
    }
}
