//! Structural digest of an inbound request payload
//!
//! The summary is what operators see in the capture log and what mock mode
//! echoes back as its completion text. It never fails: anything the
//! summarizer does not recognise degrades to zero counts and a null model.

use crate::proxy::headers::paths;
use crate::proxy::types::{TraceId, DEBUG_TEXT_PREFIX};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// The payload shapes the summarizer understands, selected by route
#[derive(Debug, Clone, Copy)]
pub enum RequestPayload<'a> {
    /// Chat completion request; items live in `messages`
    Chat(&'a Map<String, Value>),
    /// Structured response request; items live in `input`
    Responses(&'a Map<String, Value>),
    /// Any other route, or a body that is not a JSON object
    Unknown(Option<&'a Value>),
}

impl<'a> RequestPayload<'a> {
    /// Classify a parsed body by the route it arrived on
    pub fn classify(route: &str, payload: Option<&'a Value>) -> Self {
        match (route, payload) {
            (paths::CHAT_COMPLETIONS, Some(Value::Object(map))) => Self::Chat(map),
            (paths::RESPONSES, Some(Value::Object(map))) => Self::Responses(map),
            (_, other) => Self::Unknown(other),
        }
    }

    fn object(&self) -> Option<&'a Map<String, Value>> {
        match self {
            Self::Chat(map) | Self::Responses(map) => Some(map),
            Self::Unknown(Some(Value::Object(map))) => Some(map),
            Self::Unknown(_) => None,
        }
    }

    /// Conversation items the request carries
    pub fn message_items(&self) -> Cow<'a, [Value]> {
        match self {
            Self::Chat(map) => match map.get("messages") {
                Some(Value::Array(items)) => Cow::Borrowed(items.as_slice()),
                _ => Cow::Borrowed(&[]),
            },
            Self::Responses(map) => match map.get("input") {
                Some(Value::Array(items)) => Cow::Borrowed(items.as_slice()),
                Some(Value::String(text)) if !text.is_empty() => Cow::Owned(vec![json!({
                    "role": "user",
                    "content": [{ "type": "input_text", "text": text }],
                })]),
                _ => Cow::Borrowed(&[]),
            },
            Self::Unknown(_) => Cow::Borrowed(&[]),
        }
    }
}

/// Structural digest of one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSummary {
    pub trace_id: TraceId,
    pub route: String,
    pub model: Option<String>,
    pub stream: bool,
    pub message_count: usize,
    pub roles: BTreeMap<String, u64>,
    pub tools_count: usize,
    pub images_count: usize,
    pub prompt_chars: usize,
}

impl RequestSummary {
    /// Text mock responses return so operators can see what was parsed
    pub fn debug_text(&self) -> String {
        let serialized = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("{DEBUG_TEXT_PREFIX} {serialized}")
    }
}

/// Build the summary for a request
///
/// `payload` is the parsed JSON body, if the body parsed at all; `raw_text` is
/// the body as text and only feeds the prompt size when nothing better exists.
pub fn summarize(
    trace_id: TraceId,
    route: &str,
    payload: Option<&Value>,
    raw_text: &str,
) -> RequestSummary {
    let classified = RequestPayload::classify(route, payload);
    let object = classified.object();
    let items = classified.message_items();

    let model = object
        .and_then(|map| map.get("model"))
        .and_then(Value::as_str)
        .filter(|model| !model.is_empty())
        .map(str::to_string);
    let stream = object
        .and_then(|map| map.get("stream"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let tools_count = object
        .and_then(|map| map.get("tools"))
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    RequestSummary {
        trace_id,
        route: route.to_string(),
        model,
        stream,
        message_count: items.len(),
        roles: role_histogram(&items),
        tools_count,
        images_count: payload.map_or(0, count_images),
        prompt_chars: prompt_chars(object, raw_text),
    }
}

/// Count items per `role`, using `"unknown"` when the role is missing
pub fn role_histogram(items: &[Value]) -> BTreeMap<String, u64> {
    let mut roles = BTreeMap::new();
    for item in items {
        let Value::Object(map) = item else {
            continue;
        };
        let role = map
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        *roles.entry(role).or_insert(0) += 1;
    }
    roles
}

/// Count objects that look like images anywhere in the payload
///
/// An object counts once if its `type` mentions "image" or it has an
/// `image_url` or `image` key; its children are still walked, so nested
/// image-like objects each add to the total.
pub fn count_images(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.iter().map(count_images).sum(),
        Value::Object(map) => {
            let type_mentions_image = map
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|kind| kind.to_lowercase().contains("image"));
            let own = usize::from(
                type_mentions_image || map.contains_key("image_url") || map.contains_key("image"),
            );
            own + map.values().map(count_images).sum::<usize>()
        }
        _ => 0,
    }
}

fn prompt_chars(object: Option<&Map<String, Value>>, raw_text: &str) -> usize {
    let source = match object {
        Some(map) if map.contains_key("input") => map.get("input"),
        Some(map) if map.get("messages").is_some_and(Value::is_array) => map.get("messages"),
        _ => None,
    };
    let serialized = match source {
        Some(value) => serde_json::to_string(value),
        None => serde_json::to_string(raw_text),
    };
    serialized.map_or(0, |text| text.chars().count())
}
