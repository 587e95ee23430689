use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use ferry_agent::{
    AgentSessionBridge, MetadataTokenProvider, SessionRegistry, StaticTokenProvider,
    StreamingAgentClient, SyncAgentClient, TokenProvider, Transport,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::channels::telegram::TelegramChannel;
use crate::channels::{Channel, DispatchFuture, SessionDispatcher};
use crate::config::{GatewayChannelConfig, GatewayConfig, TransportMode};

const WELCOME_REPLY: &str = "Hello! I'm connected to the agent backend. Send me a message and I'll reply.\n\nCommands:\n/start - Show this welcome message\n/help - Get help information\n/reset - Reset your conversation session";
const HELP_REPLY: &str = "Simply send me a message and I'll respond using the remote agent.\n\nAvailable commands:\n/start - Show welcome message\n/help - Show this help message\n/reset - Reset your conversation session\n\nYour conversation history is kept within a session. Use /reset to start a fresh conversation.";
const RESET_COMMAND_REPLY: &str =
    "Your conversation session has been reset. You can now start a fresh conversation!";

pub struct BridgeRouter {
    bridge: AgentSessionBridge,
}

impl BridgeRouter {
    pub fn new(bridge: AgentSessionBridge) -> Self {
        Self { bridge }
    }

    pub async fn handle_text(&self, channel_name: &str, user_id: &str, text: &str) -> String {
        if is_command(text, "start") {
            return WELCOME_REPLY.to_string();
        }
        if is_command(text, "help") {
            return HELP_REPLY.to_string();
        }
        let key = session_key(channel_name, user_id);
        if is_command(text, "reset") {
            let session_id = self.bridge.reset(&key);
            tracing::debug!(%key, %session_id, "conversation session reset");
            return RESET_COMMAND_REPLY.to_string();
        }
        self.bridge.deliver(&key, text.trim()).await
    }
}

impl SessionDispatcher for BridgeRouter {
    fn dispatch_text<'a>(
        &'a mut self,
        channel_name: &'a str,
        user_id: &'a str,
        text: &'a str,
    ) -> DispatchFuture<'a> {
        Box::pin(async move { Ok(self.handle_text(channel_name, user_id, text).await) })
    }
}

pub async fn serve_gateway(config: GatewayConfig) -> Result<(), String> {
    if !config.enabled {
        return Ok(());
    }

    for line in startup_log_lines(&config) {
        println!("{line}");
    }

    let GatewayConfig {
        enabled: _,
        health_bind,
        mode,
        request_timeout,
        access_token,
        backend,
        channels,
    } = config;

    let tokens = build_token_provider(access_token);
    let transport = match mode {
        TransportMode::Sync => Transport::Sync(SyncAgentClient::new(backend, tokens)),
        TransportMode::Streaming => Transport::Streaming(StreamingAgentClient::new(backend, tokens)),
    };
    let bridge = AgentSessionBridge::new(SessionRegistry::new(), transport, request_timeout);
    let mut router = BridgeRouter::new(bridge);

    let mut channels = build_channels(channels, request_timeout)?;
    if channels.is_empty() {
        return Err("gateway has no enabled channel".to_string());
    }
    let mut health_server = Some(start_health_server(&health_bind).await?);

    let shutdown_signal = crate::wait_for_shutdown_signal();
    tokio::pin!(shutdown_signal);

    loop {
        let now = Instant::now();
        let sleep_for = channels
            .iter()
            .map(|channel| channel.time_until_next_poll(now))
            .min()
            .unwrap_or(Duration::from_millis(250));
        tokio::select! {
            result = &mut shutdown_signal => {
                result?;
                break;
            }
            _ = tokio::time::sleep(sleep_for) => {}
        }

        for channel in &mut channels {
            let channel_name = channel.name().to_string();
            if let Err(error) = channel.poll_if_due(&mut router).await {
                tracing::warn!(channel = %channel_name, "poll failed: {error}");
            }
        }
    }

    if let Some(handle) = health_server.take() {
        handle.abort();
        let _ = handle.await;
    }

    Ok(())
}

fn build_token_provider(access_token: Option<String>) -> Arc<dyn TokenProvider> {
    match access_token {
        Some(token) => Arc::new(StaticTokenProvider::new(token)),
        None => Arc::new(MetadataTokenProvider::new()),
    }
}

fn build_channels(
    channels: Vec<GatewayChannelConfig>,
    request_timeout: Duration,
) -> Result<Vec<Box<dyn Channel>>, String> {
    let mut built: Vec<Box<dyn Channel>> = Vec::new();
    for channel in channels {
        match channel {
            GatewayChannelConfig::Telegram(telegram) => {
                built.push(Box::new(TelegramChannel::new(telegram, request_timeout)?));
            }
        }
    }
    Ok(built)
}

pub fn build_health_router() -> Router {
    Router::new().route("/health", get(health_handler))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn start_health_server(bind_addr: &str) -> Result<JoinHandle<()>, String> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|error| format!("bind health listener on {bind_addr} failed: {error}"))?;
    println!("[gateway] health check: http://{bind_addr}/health");
    let app = build_health_router();
    let handle = tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app).await {
            tracing::warn!("health server stopped: {error}");
        }
    });
    Ok(handle)
}

pub fn startup_log_lines(config: &GatewayConfig) -> Vec<String> {
    let mut lines = vec![
        "[gateway] starting runtime".to_string(),
        format!("[gateway] backend: {}", config.backend.app_resource_name()),
        format!(
            "[gateway] deployment: {}",
            config.backend.deployment_id.as_deref().unwrap_or("(none)")
        ),
        format!("[gateway] transport_mode: {}", config.mode.as_str()),
        format!(
            "[gateway] request_timeout_ms: {}",
            config.request_timeout.as_millis()
        ),
        format!(
            "[gateway] credentials: {}",
            if config.access_token.is_some() {
                "static token"
            } else {
                "metadata server"
            }
        ),
        format!("[gateway] health_bind: {}", config.health_bind),
        format!("[gateway] configured_channels: {}", config.channels.len()),
    ];

    for channel in &config.channels {
        match channel {
            GatewayChannelConfig::Telegram(config) => {
                lines.push(format!(
                    "[gateway] channel telegram name={} poll_interval_ms={} update_limit={} allowed_users={} proxy_configured={}",
                    config.name,
                    config.poll_interval.as_millis(),
                    config.update_limit,
                    config.allowed_user_ids.len(),
                    config.proxy_url.is_some()
                ));
            }
        }
    }

    lines
}

pub fn session_key(channel_name: &str, user_id: &str) -> String {
    format!("{channel_name}:{user_id}")
}

fn is_command(input: &str, name: &str) -> bool {
    let trimmed = input.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return false;
    };
    match rest.split_once('@') {
        Some((command, mention)) => {
            command.eq_ignore_ascii_case(name)
                && !mention.trim().is_empty()
                && !mention.chars().any(char::is_whitespace)
        }
        None => rest.eq_ignore_ascii_case(name),
    }
}
