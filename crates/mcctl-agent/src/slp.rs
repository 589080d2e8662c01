//! Minimal Server List Ping client: handshake, status request, one JSON
//! status response. Only the fields the details line needs are decoded.

use crate::error::ExternalError;
use crate::external::{ServerInfo, ServerQuery};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const HANDSHAKE_PROTOCOL: i32 = 47;
const NEXT_STATE_STATUS: i32 = 1;
const MAX_PACKET_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SlpClient {
    timeout: Duration,
}

impl SlpClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ServerQuery for SlpClient {
    fn query<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<ServerInfo, ExternalError>> {
        Box::pin(async move {
            tokio::time::timeout(self.timeout, query_status(host, port))
                .await
                .map_err(|_| ExternalError::Timeout {
                    program: "server list ping".to_string(),
                    timeout: self.timeout,
                })?
        })
    }
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    version: VersionInfo,
    #[serde(default)]
    players: Option<PlayersInfo>,
    #[serde(default)]
    description: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PlayersInfo {
    online: i64,
    max: i64,
}

async fn query_status(host: &str, port: u16) -> Result<ServerInfo, ExternalError> {
    let mut stream = TcpStream::connect((host, port)).await?;

    let mut handshake = Vec::new();
    write_varint(&mut handshake, 0x00);
    write_varint(&mut handshake, HANDSHAKE_PROTOCOL);
    write_string(&mut handshake, host);
    handshake.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut handshake, NEXT_STATE_STATUS);
    write_packet(&mut stream, &handshake).await?;

    let started = Instant::now();
    write_packet(&mut stream, &[0x00]).await?;
    let packet = read_packet(&mut stream).await?;
    let latency = started.elapsed();

    let mut cursor = packet.as_slice();
    let packet_id = read_varint_slice(&mut cursor)?;
    if packet_id != 0x00 {
        return Err(ExternalError::Protocol(format!(
            "unexpected status packet id {packet_id}"
        )));
    }
    let json = read_string_slice(&mut cursor)?;
    parse_status(&json, latency)
}

fn parse_status(json: &str, latency: Duration) -> Result<ServerInfo, ExternalError> {
    let response: StatusResponse =
        serde_json::from_str(json).map_err(|err| ExternalError::Protocol(err.to_string()))?;
    let (online, max) = response
        .players
        .map(|players| (players.online, players.max))
        .unwrap_or((0, 0));
    let motd = response
        .description
        .as_ref()
        .map(|description| strip_formatting(&flatten_chat(description)))
        .unwrap_or_default();
    Ok(ServerInfo {
        version: response.version.name,
        players_online: online,
        players_max: max,
        latency,
        motd: motd.trim().to_string(),
    })
}

/// Plain text of a chat component (string, `{text, extra}` object or array).
fn flatten_chat(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts.iter().map(flatten_chat).collect(),
        Value::Object(map) => {
            let mut text = map
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if let Some(Value::Array(extra)) = map.get("extra") {
                for part in extra {
                    text.push_str(&flatten_chat(part));
                }
            }
            text
        }
        _ => String::new(),
    }
}

/// Drops legacy `§x` formatting codes.
fn strip_formatting(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch == '\u{00A7}' {
            chars.next();
            continue;
        }
        out.push(ch);
    }
    out
}

fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
}

fn write_string(buf: &mut Vec<u8>, text: &str) {
    write_varint(buf, text.len() as i32);
    buf.extend_from_slice(text.as_bytes());
}

async fn write_packet(stream: &mut TcpStream, body: &[u8]) -> Result<(), ExternalError> {
    let mut frame = Vec::with_capacity(body.len() + 5);
    write_varint(&mut frame, body.len() as i32);
    frame.extend_from_slice(body);
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32, ExternalError> {
    let mut result: u32 = 0;
    for shift in (0..35).step_by(7) {
        let byte = reader.read_u8().await?;
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Ok(result as i32);
        }
    }
    Err(ExternalError::Protocol("varint too long".to_string()))
}

async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ExternalError> {
    let len = read_varint(reader).await?;
    let len = usize::try_from(len)
        .ok()
        .filter(|len| *len <= MAX_PACKET_BYTES)
        .ok_or_else(|| ExternalError::Protocol(format!("invalid packet length {len}")))?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

fn read_varint_slice(cursor: &mut &[u8]) -> Result<i32, ExternalError> {
    let mut result: u32 = 0;
    for shift in (0..35).step_by(7) {
        let (&byte, rest) = cursor
            .split_first()
            .ok_or_else(|| ExternalError::Protocol("truncated varint".to_string()))?;
        *cursor = rest;
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Ok(result as i32);
        }
    }
    Err(ExternalError::Protocol("varint too long".to_string()))
}

fn read_string_slice(cursor: &mut &[u8]) -> Result<String, ExternalError> {
    let len = read_varint_slice(cursor)?;
    let len = usize::try_from(len)
        .ok()
        .filter(|len| *len <= cursor.len())
        .ok_or_else(|| ExternalError::Protocol(format!("invalid string length {len}")))?;
    let (raw, rest) = cursor.split_at(len);
    *cursor = rest;
    String::from_utf8(raw.to_vec()).map_err(|err| ExternalError::Protocol(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn serve_status_once(listener: TcpListener, body: String) {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let handshake = read_packet(&mut socket).await.expect("handshake");
        let mut cursor = handshake.as_slice();
        assert_eq!(read_varint_slice(&mut cursor).expect("id"), 0x00);
        let request = read_packet(&mut socket).await.expect("request");
        assert_eq!(request, vec![0x00]);

        let mut response = Vec::new();
        write_varint(&mut response, 0x00);
        write_string(&mut response, &body);
        write_packet(&mut socket, &response).await.expect("response");
    }

    #[test]
    fn varint_matches_reference_encoding() {
        let cases: [(i32, &[u8]); 5] = [
            (0, &[0x00]),
            (1, &[0x01]),
            (300, &[0xac, 0x02]),
            (25565, &[0xdd, 0xc7, 0x01]),
            (-1, &[0xff, 0xff, 0xff, 0xff, 0x0f]),
        ];
        for (value, expected) in cases {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            assert_eq!(buf, expected, "encode {value}");
            let mut cursor = buf.as_slice();
            assert_eq!(read_varint_slice(&mut cursor).expect("decode"), value);
        }
    }

    #[test]
    fn chat_components_flatten_to_plain_text() {
        let description = json!({
            "text": "",
            "extra": [
                {"text": "\u{00A7}aWelcome ", "bold": true},
                {"text": "to ", "extra": ["the ", {"text": "server"}]}
            ]
        });
        assert_eq!(
            strip_formatting(&flatten_chat(&description)),
            "Welcome to the server"
        );
    }

    #[test]
    fn status_without_players_defaults_to_zero() {
        let info = parse_status(
            r#"{"version":{"name":"Paper 1.20.4","protocol":765},"description":"hi"}"#,
            Duration::from_millis(3),
        )
        .expect("parse");
        assert_eq!(info.players_online, 0);
        assert_eq!(info.players_max, 0);
        assert_eq!(info.motd, "hi");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn query_reads_status_from_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let body = json!({
            "version": {"name": "1.20.1", "protocol": 763},
            "players": {"online": 3, "max": 20},
            "description": {"text": "Survival"}
        })
        .to_string();
        let server = tokio::spawn(serve_status_once(listener, body));

        let client = SlpClient::new(Duration::from_secs(2));
        let info = client.query("127.0.0.1", port).await.expect("query");
        server.await.expect("server task");

        assert_eq!(info.version, "1.20.1");
        assert_eq!(info.players_online, 3);
        assert_eq!(info.players_max, 20);
        assert_eq!(info.motd, "Survival");
    }

    #[tokio::test]
    async fn query_fails_on_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let client = SlpClient::new(Duration::from_secs(2));
        assert!(client.query("127.0.0.1", port).await.is_err());
    }
}
