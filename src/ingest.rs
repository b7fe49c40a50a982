//! Inbound payload parsing and field normalization
//!
//! Senders are heterogeneous monitoring tools, so parsing is permissive:
//! JSON first, then form pairs, then a placeholder. Shape mismatches in
//! optional fields never fail an ingestion.

use crate::types::DEFAULT_LEVEL;
use serde_json::{Map, Value};

/// Parsed request payload
pub type Payload = Map<String, Value>;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

const SOURCE_FALLBACK: &str = "unknown";
const TITLE_FALLBACK: &str = "Alert";
const LEVEL_KEYS: [&str; 3] = ["level", "severity", "status"];
const TITLE_KEYS: [&str; 3] = ["title", "alert_name", "event"];
const MESSAGE_KEYS: [&str; 3] = ["message", "description", "detail"];

/// Alert fields extracted from a webhook payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertFields {
    pub source: String,
    pub level: String,
    pub title: String,
    pub message: String,
}

/// String view of a payload value
///
/// Strings pass through and numbers are rendered in plain decimal.
/// Everything else counts as absent.
pub fn text_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn first_non_empty(payload: &Payload, keys: &[&str]) -> Option<String> {
    keys.iter()
        .map(|key| text_of(payload.get(*key)))
        .find(|value| !value.is_empty())
}

fn is_form(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.trim_start().starts_with(FORM_CONTENT_TYPE))
        .unwrap_or(false)
}

/// Form pairs from the body (form content type only), then from the query
/// string. The first value seen for a key wins.
pub fn form_pairs(body: &[u8], content_type: Option<&str>, query: Option<&str>) -> Payload {
    let mut payload = Payload::new();

    if is_form(content_type) {
        for (key, value) in url::form_urlencoded::parse(body) {
            payload
                .entry(key.into_owned())
                .or_insert_with(|| Value::String(value.into_owned()));
        }
    }

    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            payload
                .entry(key.into_owned())
                .or_insert_with(|| Value::String(value.into_owned()));
        }
    }

    payload
}

/// Look up a single query parameter
pub fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Parse a generic webhook body
///
/// A JSON object wins. Otherwise form pairs are used, and if there are
/// none the payload is `{"raw": "unparseable payload"}`.
pub fn parse_payload(body: &[u8], content_type: Option<&str>, query: Option<&str>) -> Payload {
    if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) {
        return map;
    }

    let pairs = form_pairs(body, content_type, query);
    if !pairs.is_empty() {
        return pairs;
    }

    let mut raw = Payload::new();
    raw.insert(
        "raw".to_string(),
        Value::String("unparseable payload".to_string()),
    );
    raw
}

/// Apply the field fallbacks
///
/// - source: `source`, then the `source` query parameter, then `"unknown"`
/// - level: `level`, `severity`, `status`, then `"info"`
/// - title: `title`, `alert_name`, `event`, then `"Alert"`
/// - message: `message`, `description`, `detail`, then the whole payload
///   as indented JSON
pub fn normalize(payload: &Payload, query: Option<&str>) -> AlertFields {
    let source = first_non_empty(payload, &["source"])
        .or_else(|| query_param(query, "source").filter(|s| !s.is_empty()))
        .unwrap_or_else(|| SOURCE_FALLBACK.to_string());

    let level =
        first_non_empty(payload, &LEVEL_KEYS).unwrap_or_else(|| DEFAULT_LEVEL.to_string());
    let title =
        first_non_empty(payload, &TITLE_KEYS).unwrap_or_else(|| TITLE_FALLBACK.to_string());

    let message = first_non_empty(payload, &MESSAGE_KEYS).unwrap_or_else(|| {
        serde_json::to_string_pretty(payload).unwrap_or_default()
    });

    AlertFields {
        source,
        level,
        title,
        message,
    }
}

/// Message sent to a bot relay endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub chat_id: String,
    pub text: String,
}

/// Parse a bot relay body; `None` unless it is a JSON object
///
/// `chat_id` may be a string or a number.
pub fn parse_bot_message(body: &[u8]) -> Option<ChatMessage> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Some(ChatMessage {
            chat_id: text_of(map.get("chat_id")),
            text: text_of(map.get("text")),
        }),
        _ => None,
    }
}

/// Parse a Telegram-compatible `sendMessage` body
///
/// JSON is only attempted for a JSON content type; otherwise form pairs
/// are used. Missing fields stay empty.
pub fn parse_telegram_message(
    body: &[u8],
    content_type: Option<&str>,
    query: Option<&str>,
) -> ChatMessage {
    let is_json = content_type
        .map(|ct| ct.trim_start().starts_with("application/json"))
        .unwrap_or(false);

    let json = if is_json {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    } else {
        None
    };
    let payload = json.unwrap_or_else(|| form_pairs(body, content_type, query));

    ChatMessage {
        chat_id: text_of(payload.get("chat_id")),
        text: text_of(payload.get("text")),
    }
}
