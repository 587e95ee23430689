use std::collections::HashSet;
use std::time::Duration;

use reqwest::{Client, Proxy};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::channels::{Channel, ChannelFuture, SessionDispatcher};
use crate::chunk::chunk_message;
use crate::config::TelegramChannelConfig;

const TELEGRAM_MAX_TEXT_CHARS: usize = 4_096;
const TELEGRAM_TYPING_ACTION: &str = "typing";
const TELEGRAM_TYPING_REFRESH_INTERVAL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone)]
pub struct TelegramClient {
    client: Client,
    api_base: String,
    bot_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramInboundMessage {
    pub update_id: i64,
    pub message_id: i64,
    pub chat_id: i64,
    pub user_id: String,
    pub text: String,
}

pub struct TelegramChannel {
    name: String,
    client: TelegramClient,
    poll_interval: Duration,
    update_limit: u8,
    allowed_user_ids: HashSet<String>,
    next_poll_at: Instant,
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUpdatesResponse {
    pub ok: bool,
    #[serde(default)]
    pub result: Vec<TelegramUpdate>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramApiStatusResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: Option<bool>,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    limit: u8,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SendChatActionRequest<'a> {
    chat_id: i64,
    action: &'a str,
}

impl TelegramChannel {
    pub fn new(config: TelegramChannelConfig, request_timeout: Duration) -> Result<Self, String> {
        Ok(Self {
            name: config.name,
            client: TelegramClient::new(config.bot_token, config.proxy_url, request_timeout)?,
            poll_interval: config.poll_interval,
            update_limit: config.update_limit,
            allowed_user_ids: config.allowed_user_ids.into_iter().collect(),
            next_poll_at: Instant::now(),
            offset: None,
        })
    }

    async fn dispatch_with_typing(
        &self,
        dispatcher: &mut dyn SessionDispatcher,
        inbound: &TelegramInboundMessage,
    ) -> Result<String, String> {
        if let Err(error) = self.client.send_typing_action(inbound.chat_id).await {
            tracing::warn!(
                channel = %self.name,
                user_id = %inbound.user_id,
                "failed to send typing action: {error}"
            );
        }

        let dispatch = dispatcher.dispatch_text(&self.name, &inbound.user_id, &inbound.text);
        tokio::pin!(dispatch);

        loop {
            tokio::select! {
                result = &mut dispatch => return result,
                _ = tokio::time::sleep(TELEGRAM_TYPING_REFRESH_INTERVAL) => {
                    if let Err(error) = self.client.send_typing_action(inbound.chat_id).await {
                        tracing::warn!(
                            channel = %self.name,
                            user_id = %inbound.user_id,
                            "failed to refresh typing action: {error}"
                        );
                    }
                }
            }
        }
    }
}

impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn time_until_next_poll(&self, now: Instant) -> Duration {
        if self.next_poll_at <= now {
            Duration::from_millis(0)
        } else {
            self.next_poll_at - now
        }
    }

    fn poll_if_due<'a>(
        &'a mut self,
        dispatcher: &'a mut dyn SessionDispatcher,
    ) -> ChannelFuture<'a> {
        Box::pin(async move {
            let now = Instant::now();
            if self.next_poll_at > now {
                return Ok(());
            }
            self.next_poll_at = now + self.poll_interval;

            let updates = self
                .client
                .get_updates(self.offset, self.update_limit)
                .await?;
            for update in updates {
                self.offset = Some(update.update_id + 1);
                let Some(inbound) = extract_private_text_message(&update, &self.allowed_user_ids)
                else {
                    continue;
                };

                let reply = match self.dispatch_with_typing(dispatcher, &inbound).await {
                    Ok(text) => text,
                    Err(error) => {
                        tracing::warn!(
                            channel = %self.name,
                            user_id = %inbound.user_id,
                            "dispatch failed: {error}"
                        );
                        "Sorry, I hit an internal error while processing your message.".to_string()
                    }
                };

                for chunk in chunk_message(&reply, TELEGRAM_MAX_TEXT_CHARS) {
                    if chunk.is_empty() {
                        continue;
                    }
                    self.client.send_message(inbound.chat_id, &chunk).await?;
                }
            }
            Ok(())
        })
    }
}

impl TelegramClient {
    pub fn new(
        bot_token: String,
        proxy_url: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, String> {
        let mut builder = Client::builder().timeout(request_timeout);
        if let Some(proxy_url) = proxy_url
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            let proxy = Proxy::all(proxy_url)
                .map_err(|error| format!("build telegram proxy failed: {error}"))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|error| format!("build telegram client failed: {error}"))?;
        Ok(Self {
            client,
            api_base: "https://api.telegram.org".to_string(),
            bot_token,
        })
    }

    /// POST one Bot API method and decode its envelope.
    async fn call_method<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp, String>
    where
        Req: Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let url = format!("{}/bot{}/{method}", self.api_base, self.bot_token);
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|error| format!("telegram {method} request failed: {error}"))?;
        response
            .json::<Resp>()
            .await
            .map_err(|error| format!("telegram {method} decode failed: {error}"))
    }

    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        limit: u8,
    ) -> Result<Vec<TelegramUpdate>, String> {
        let parsed: TelegramUpdatesResponse = self
            .call_method("getUpdates", &GetUpdatesRequest { offset, limit })
            .await?;
        require_ok(parsed.ok, parsed.description, "getUpdates")?;
        Ok(parsed.result)
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), String> {
        let parsed: TelegramApiStatusResponse = self
            .call_method("sendMessage", &SendMessageRequest { chat_id, text })
            .await?;
        require_ok(parsed.ok, parsed.description, "sendMessage")
    }

    pub async fn send_typing_action(&self, chat_id: i64) -> Result<(), String> {
        let request = SendChatActionRequest {
            chat_id,
            action: TELEGRAM_TYPING_ACTION,
        };
        let parsed: TelegramApiStatusResponse =
            self.call_method("sendChatAction", &request).await?;
        require_ok(parsed.ok, parsed.description, "sendChatAction")
    }
}

fn require_ok(ok: bool, description: Option<String>, method: &str) -> Result<(), String> {
    if ok {
        Ok(())
    } else {
        Err(description.unwrap_or_else(|| format!("telegram {method} returned ok=false")))
    }
}

/// Accepts only private-chat text updates from human senders. An empty
/// allowlist admits every private chat.
pub fn extract_private_text_message(
    update: &TelegramUpdate,
    allowed_user_ids: &HashSet<String>,
) -> Option<TelegramInboundMessage> {
    let message = update.message.as_ref()?;
    if !message.chat.kind.eq_ignore_ascii_case("private") {
        return None;
    }
    let from = message.from.as_ref()?;
    if from.is_bot == Some(true) {
        return None;
    }
    let text = message
        .text
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())?;
    let user_id = from.id.to_string();
    if !allowed_user_ids.is_empty() && !allowed_user_ids.contains(&user_id) {
        return None;
    }

    Some(TelegramInboundMessage {
        update_id: update.update_id,
        message_id: message.message_id,
        chat_id: message.chat.id,
        user_id,
        text: text.to_string(),
    })
}
