use anyhow::{Context, Result};
use clap::Parser;
use crate::probe::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_GAME_PORT};
use crate::runner::DEFAULT_COMMAND_TIMEOUT;
use mcctl_core::bus::DEFAULT_CHANNEL_PREFIX;
use std::{env, path::PathBuf, time::Duration};
use url::Url;

const DEFAULT_HUB_URL: &str = "ws://127.0.0.1:6380/ws";
const DEFAULT_SERVER_SCRIPT: &str = "/usr/local/bin/server.sh";
const DEFAULT_SERVER_DIR: &str = "/minecraft";
const DEFAULT_SESSION: &str = "gameserver";
const DEFAULT_VPN_STATE_FILE: &str = "ts-authkey-test/state/tailscaled.state";

#[derive(Parser, Debug)]
#[command(name = "mcctl-agent", about = "Supervisory control loop for a Minecraft server")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub hub_url: String,
    #[arg(long, default_value = "")]
    pub channel_prefix: String,
    #[arg(long, default_value = "")]
    pub server_script: String,
    #[arg(long, default_value = "")]
    pub server_dir: String,
    #[arg(long, default_value = "")]
    pub env_config: String,
    #[arg(long, default_value = "")]
    pub session: String,
    #[arg(long, default_value_t = DEFAULT_GAME_PORT)]
    pub game_port: u16,
    /// Lifecycle script timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_COMMAND_TIMEOUT.as_secs())]
    pub command_timeout: u64,
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_millis() as u64)]
    pub probe_timeout_ms: u64,
    /// VPN state files restored through `get_file` at startup.
    #[arg(long = "vpn-state-file")]
    pub vpn_state_files: Vec<String>,
    #[arg(long, default_value = "")]
    pub log_dir: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub hub_url: Url,
    pub channel_prefix: String,
    pub server_script: PathBuf,
    pub server_dir: PathBuf,
    pub env_config: PathBuf,
    pub session: String,
    pub game_port: u16,
    pub command_timeout: Duration,
    pub probe_timeout: Duration,
    pub vpn_state_files: Vec<String>,
    pub log_dir: String,
    pub log_stdout: bool,
}

pub fn load_settings(args: Args) -> Result<Settings> {
    let hub_url = resolve_hub_url(&args.hub_url)?;
    let server_dir = PathBuf::from(resolve("MCCTL_SERVER_DIR", &args.server_dir, DEFAULT_SERVER_DIR));
    let env_config = resolve_env_config(&args.env_config, &server_dir);
    let vpn_state_files = if args.vpn_state_files.is_empty() {
        vec![DEFAULT_VPN_STATE_FILE.to_string()]
    } else {
        args.vpn_state_files
    };
    Ok(Settings {
        hub_url,
        channel_prefix: resolve("MCCTL_CHANNEL_PREFIX", &args.channel_prefix, DEFAULT_CHANNEL_PREFIX),
        server_script: PathBuf::from(resolve(
            "MCCTL_SERVER_SCRIPT",
            &args.server_script,
            DEFAULT_SERVER_SCRIPT,
        )),
        server_dir,
        env_config,
        session: resolve("MCCTL_SESSION", &args.session, DEFAULT_SESSION),
        game_port: args.game_port,
        command_timeout: Duration::from_secs(args.command_timeout),
        probe_timeout: Duration::from_millis(args.probe_timeout_ms),
        vpn_state_files,
        log_dir: resolve("MCCTL_LOG_DIR", &args.log_dir, ""),
        log_stdout: resolve_log_stdout(),
    })
}

/// Flag, then environment variable, then `default`.
fn resolve(var: &str, flag: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = env::var(var) {
        if !value.trim().is_empty() {
            return value;
        }
    }
    default.to_string()
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" | "off" | "OFF" => Some(false),
        _ => None,
    }
}

fn resolve_log_stdout() -> bool {
    env::var("MCCTL_LOG_STDOUT")
        .ok()
        .and_then(|value| parse_bool_env(&value))
        .unwrap_or(true)
}

fn resolve_hub_url(flag: &str) -> Result<Url> {
    let raw = resolve("MCCTL_HUB_URL", flag, DEFAULT_HUB_URL);
    Url::parse(&raw).with_context(|| format!("invalid hub url: {raw}"))
}

fn resolve_env_config(flag: &str, server_dir: &std::path::Path) -> PathBuf {
    let value = resolve("MCCTL_ENV_CONFIG", flag, "");
    if value.is_empty() {
        server_dir.join("env_config.json")
    } else {
        PathBuf::from(value)
    }
}
