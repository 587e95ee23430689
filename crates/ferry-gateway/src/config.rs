use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use ferry_agent::BackendConfig;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub enabled: bool,
    pub health_bind: String,
    pub mode: TransportMode,
    pub request_timeout: Duration,
    pub access_token: Option<String>,
    pub backend: BackendConfig,
    pub channels: Vec<GatewayChannelConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Sync,
    Streaming,
}

impl TransportMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportMode::Sync => "sync",
            TransportMode::Streaming => "streaming",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayChannelConfig {
    Telegram(TelegramChannelConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramChannelConfig {
    pub name: String,
    pub bot_token: String,
    pub proxy_url: Option<String>,
    pub poll_interval: Duration,
    pub update_limit: u8,
    pub allowed_user_ids: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FerryTomlFile {
    #[serde(default)]
    backend: FerryTomlBackend,
    #[serde(default)]
    gateway: FerryTomlGateway,
    #[serde(default)]
    env: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Default)]
struct FerryTomlBackend {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    app_id: Option<String>,
    #[serde(default)]
    deployment_id: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    request_timeout_ms: Option<u64>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    rest_base: Option<String>,
    #[serde(default)]
    stream_endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FerryTomlGateway {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    bind: Option<String>,
    #[serde(default)]
    channels: Vec<FerryTomlGatewayChannel>,
}

#[derive(Debug, Deserialize, Default)]
struct FerryTomlGatewayChannel {
    name: String,
    kind: String,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    bot_token: Option<String>,
    #[serde(default)]
    proxy_url: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    update_limit: Option<u8>,
    #[serde(default)]
    allowed_user_ids: Vec<String>,
}

const DEFAULT_CONF_DIR_NAME: &str = ".ferry";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
static CONF_DIR: OnceLock<PathBuf> = OnceLock::new();

pub fn init_conf_dir(conf_dir: Option<PathBuf>) {
    let resolved = conf_dir
        .as_deref()
        .map(resolve_conf_dir_arg)
        .unwrap_or_else(default_conf_dir);
    let _ = CONF_DIR.set(resolved);
}

pub(crate) fn current_conf_dir() -> PathBuf {
    CONF_DIR.get().cloned().unwrap_or_else(default_conf_dir)
}

fn default_conf_dir() -> PathBuf {
    home_dir().join(DEFAULT_CONF_DIR_NAME)
}

fn resolve_conf_dir_arg(path: &Path) -> PathBuf {
    let expanded = expand_path_with_home(path);
    if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(expanded)
    }
}

fn expand_path_with_home(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw == "~" {
        return home_dir();
    }
    if let Some(suffix) = raw.strip_prefix("~/") {
        return home_dir().join(suffix);
    }
    path.to_path_buf()
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn default_ferry_config_path() -> PathBuf {
    current_conf_dir().join("ferry.toml")
}

pub fn load_gateway_config(path: &Path) -> Result<GatewayConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|error| format!("read {} failed: {error}", path.display()))?;
    parse_gateway_config(&content)
}

pub(crate) fn parse_gateway_config(content: &str) -> Result<GatewayConfig, String> {
    let parsed: FerryTomlFile =
        toml::from_str(content).map_err(|error| format!("parse ferry.toml failed: {error}"))?;
    let backend = resolve_backend_config(&parsed.backend, &parsed.env)?;
    let mode = resolve_transport_mode(parsed.backend.mode.as_deref())?;
    let access_token = parsed
        .backend
        .access_token
        .as_deref()
        .and_then(|value| resolve_config_value(value, &parsed.env));
    let channels = resolve_gateway_channels(&parsed.gateway.channels, &parsed.env)?;
    let request_timeout = Duration::from_millis(
        parsed
            .backend
            .request_timeout_ms
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
    );
    let health_bind = parsed
        .gateway
        .bind
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("0.0.0.0:8080")
        .to_string();

    Ok(GatewayConfig {
        enabled: parsed.gateway.enabled.unwrap_or(false),
        health_bind,
        mode,
        request_timeout,
        access_token,
        backend,
        channels,
    })
}

fn resolve_backend_config(
    backend: &FerryTomlBackend,
    env_map: &HashMap<String, String>,
) -> Result<BackendConfig, String> {
    let project_id = backend
        .project_id
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map))
        .ok_or_else(|| "backend section is missing project_id".to_string())?;
    let region = backend
        .region
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map))
        .unwrap_or_else(|| "us".to_string());
    let app_id = backend
        .app_id
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map))
        .ok_or_else(|| "backend section is missing app_id".to_string())?;
    let deployment_id = backend
        .deployment_id
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map));

    let mut config = BackendConfig::new(project_id, region, app_id, deployment_id);
    if let Some(rest_base) = backend
        .rest_base
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map))
    {
        config = config.with_rest_base(rest_base);
    }
    if let Some(stream_endpoint) = backend
        .stream_endpoint
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map))
    {
        config = config.with_stream_endpoint(stream_endpoint);
    }
    Ok(config)
}

fn resolve_transport_mode(mode: Option<&str>) -> Result<TransportMode, String> {
    let mode = mode.map(str::trim).filter(|value| !value.is_empty());
    match mode {
        None => Ok(TransportMode::Sync),
        Some(value) if value.eq_ignore_ascii_case("sync") => Ok(TransportMode::Sync),
        Some(value) if value.eq_ignore_ascii_case("streaming") => Ok(TransportMode::Streaming),
        Some(other) => Err(format!(
            "backend mode '{other}' is not supported, use 'sync' or 'streaming'"
        )),
    }
}

fn resolve_gateway_channels(
    channels: &[FerryTomlGatewayChannel],
    env_map: &HashMap<String, String>,
) -> Result<Vec<GatewayChannelConfig>, String> {
    let mut resolved = Vec::new();
    for channel in channels {
        if channel.enabled == Some(false) {
            continue;
        }
        let channel_name = channel.name.trim();
        if channel_name.is_empty() {
            continue;
        }
        let kind = channel.kind.trim().to_ascii_lowercase();
        match kind.as_str() {
            "telegram" => {
                let mode = channel
                    .mode
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .unwrap_or("polling");
                if !mode.eq_ignore_ascii_case("polling") {
                    return Err(format!(
                        "telegram channel '{}' only supports polling mode",
                        channel_name
                    ));
                }
                let bot_token = channel
                    .bot_token
                    .as_deref()
                    .and_then(|value| resolve_config_value(value, env_map))
                    .ok_or_else(|| {
                        format!("telegram channel '{}' is missing bot_token", channel_name)
                    })?;
                let proxy_url = channel
                    .proxy_url
                    .as_deref()
                    .and_then(|value| resolve_config_value(value, env_map));
                let allowed_user_ids = normalize_allowed_user_ids(&channel.allowed_user_ids);
                let update_limit = channel.update_limit.unwrap_or(50);
                if update_limit == 0 {
                    return Err(format!(
                        "telegram channel '{}' update_limit must be greater than 0",
                        channel_name
                    ));
                }
                resolved.push(GatewayChannelConfig::Telegram(TelegramChannelConfig {
                    name: channel_name.to_string(),
                    bot_token,
                    proxy_url,
                    poll_interval: Duration::from_millis(channel.poll_interval_ms.unwrap_or(1_500)),
                    update_limit,
                    allowed_user_ids,
                }));
            }
            other => {
                return Err(format!(
                    "gateway channel '{}' has unsupported kind '{}'",
                    channel_name, other
                ));
            }
        }
    }
    Ok(resolved)
}

fn normalize_allowed_user_ids(values: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for value in values {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            continue;
        }
        if out.iter().any(|existing: &String| existing == trimmed) {
            continue;
        }
        out.push(trimmed.to_string());
    }
    out
}

pub(crate) fn resolve_config_value(
    value: &str,
    env_map: &HashMap<String, String>,
) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(env_key) = trimmed.strip_prefix('$') {
        return env_map
            .get(env_key)
            .cloned()
            .or_else(|| std::env::var(env_key).ok())
            .filter(|resolved| !resolved.trim().is_empty());
    }
    Some(trimmed.to_string())
}
