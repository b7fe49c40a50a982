//! Chat-bot relay endpoints
//!
//! Both routes answer in the Telegram Bot API `sendMessage` shape so
//! existing bot integrations can point at this service unchanged.

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::ingest;
use crate::server::state::AppState;
use crate::types::{Alert, DEFAULT_LEVEL};

pub const BOT_MESSAGE_TITLE: &str = "Bot Message";
pub const COMPAT_BOT_NAME: &str = "LocalAlertBot";
const EMPTY_TEXT: &str = "(empty message)";

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub ok: bool,
    pub result: MessageResult,
}

#[derive(Debug, Serialize)]
pub struct MessageResult {
    pub message_id: u64,
    pub from: BotUser,
    pub chat: ChatRef,
    pub date: i64,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct BotUser {
    pub id: u64,
    pub is_bot: bool,
    pub first_name: String,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct ChatRef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl SendMessageResponse {
    fn new(alert: &Alert, bot_name: &str, chat_id: &str, text: &str) -> Self {
        Self {
            ok: true,
            result: MessageResult {
                message_id: alert.id,
                from: BotUser {
                    id: 0,
                    is_bot: true,
                    first_name: bot_name.to_string(),
                    username: bot_name.to_string(),
                },
                chat: ChatRef {
                    id: chat_id.to_string(),
                    kind: "private",
                },
                date: alert.created_at.timestamp(),
                text: text.to_string(),
            },
        }
    }
}

/// Telegram-style error body
fn api_error(status: StatusCode, description: &str) -> Response {
    let body = serde_json::json!({
        "ok": false,
        "error_code": status.as_u16(),
        "description": description,
    });
    (status, Json(body)).into_response()
}

/// POST /bot/{token}/sendMessage - Relay a chat message from a registered bot.
pub async fn bot_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Bytes,
) -> Response {
    let Some(bot) = state.bots.resolve(&token).await else {
        tracing::warn!("Bot relay rejected: unknown token");
        return api_error(StatusCode::UNAUTHORIZED, "Unauthorized: invalid bot token");
    };

    let Some(message) = ingest::parse_bot_message(&body) else {
        return api_error(StatusCode::BAD_REQUEST, "Bad Request: invalid message body");
    };

    if !bot.chats.is_empty() && !bot.chats.iter().any(|c| *c == message.chat_id) {
        tracing::warn!(bot = %bot.name, chat = %message.chat_id, "Bot relay rejected: unregistered chat");
        return api_error(StatusCode::FORBIDDEN, "Forbidden: chat not registered for this bot");
    }

    let source = format!("bot:{}:chat:{}", bot.name, message.chat_id);
    let alert = match state
        .store
        .add(&source, DEFAULT_LEVEL, BOT_MESSAGE_TITLE, &message.text)
        .await
    {
        Ok(alert) => alert,
        Err(e) => return e.into_response(),
    };
    state.metrics.record_ingested();

    Json(SendMessageResponse::new(
        &alert,
        &bot.name,
        &message.chat_id,
        &message.text,
    ))
    .into_response()
}

/// POST /telegram/{bot_part}/{method} - Telegram Bot API drop-in.
///
/// `bot_part` is `bot<TOKEN>`; the token is not checked. Only
/// `sendMessage` is supported.
pub async fn telegram_handler(
    State(state): State<AppState>,
    Path((bot_part, method)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !bot_part.starts_with("bot") {
        return api_error(StatusCode::BAD_REQUEST, "Bad Request: invalid bot path");
    }
    if method != "sendMessage" {
        return api_error(StatusCode::BAD_REQUEST, "Bad Request: only sendMessage is supported");
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let message = ingest::parse_telegram_message(&body, content_type, query.as_deref());

    let chat_id = if message.chat_id.is_empty() {
        "unknown".to_string()
    } else {
        message.chat_id
    };
    let text = if message.text.is_empty() {
        EMPTY_TEXT.to_string()
    } else {
        message.text
    };

    let source = format!("telegram:{}", chat_id);
    let title = format!("Telegram message (chat {})", chat_id);
    let alert = match state.store.add(&source, DEFAULT_LEVEL, &title, &text).await {
        Ok(alert) => alert,
        Err(e) => return e.into_response(),
    };
    state.metrics.record_ingested();

    Json(SendMessageResponse::new(&alert, COMPAT_BOT_NAME, &chat_id, &text)).into_response()
}
