//! Mock responder: API-shaped responses synthesized without an upstream
//!
//! Three routes are emulated. Chat completions and structured responses each
//! come in a complete and a streamed flavour; the streamed flavours reproduce
//! the upstream event sequences exactly, with every frame of one stream
//! sharing the same identifiers. The assistant text is always the request
//! summary's debug text, so a client can see what the sidecar parsed.

use crate::proxy::capture::ResponseCapture;
use crate::proxy::error_response::ErrorEnvelope;
use crate::proxy::headers::{content_types, fingerprint, paths, CONTENT_TYPE};
use crate::proxy::sse::{EventStream, SseFrame};
use crate::proxy::summary::RequestSummary;
use crate::proxy::types::{ProxyResult, Source, DEFAULT_MOCK_MODEL, SERVICE_NAME};
use axum::body::Body;
use axum::response::Response;
use chrono::Utc;
use http::{HeaderValue, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

const ROLE_ASSISTANT: &str = "assistant";
const FINISH_STOP: &str = "stop";
const OUTPUT_TEXT: &str = "output_text";

// ========== Chat completion wire types ==========

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: ChatUsage,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

// ========== Structured response wire types ==========

#[derive(Debug, Clone, Serialize)]
pub struct ResponseObject {
    pub id: String,
    pub object: &'static str,
    pub created_at: i64,
    pub status: &'static str,
    pub error: Option<Value>,
    pub model: String,
    pub output: Vec<OutputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponseUsage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: &'static str,
    pub status: &'static str,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponseUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub input_tokens_details: InputTokensDetails,
    pub output_tokens_details: OutputTokensDetails,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InputTokensDetails {
    pub cached_tokens: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputTokensDetails {
    pub reasoning_tokens: u64,
}

/// Events of a streamed structured response, in emission order
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ResponseStreamEvent {
    #[serde(rename = "response.created")]
    Created { response: ResponseObject },
    #[serde(rename = "response.in_progress")]
    InProgress { response: ResponseObject },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { output_index: u32, item: OutputItem },
    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {
        item_id: String,
        output_index: u32,
        content_index: u32,
        part: ContentPart,
    },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        item_id: String,
        output_index: u32,
        content_index: u32,
        delta: String,
    },
    #[serde(rename = "response.output_text.done")]
    OutputTextDone {
        item_id: String,
        output_index: u32,
        content_index: u32,
        text: String,
    },
    #[serde(rename = "response.content_part.done")]
    ContentPartDone {
        item_id: String,
        output_index: u32,
        content_index: u32,
        part: ContentPart,
    },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone { output_index: u32, item: OutputItem },
    #[serde(rename = "response.completed")]
    Completed { response: ResponseObject },
}

// ========== Model listing wire types ==========

#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelCard>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelCard {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: &'static str,
}

// ========== Responder ==========

/// A synthesized response plus the capture record describing it
#[derive(Debug)]
pub struct MockReply {
    pub response: Response,
    pub capture: ResponseCapture,
}

/// Builds mock responses from the parsed request and its summary
#[derive(Debug, Clone)]
pub struct MockResponder {
    model: String,
    stream: bool,
    text: String,
    created: i64,
}

impl MockResponder {
    pub fn new(payload: Option<&Value>, summary: &RequestSummary) -> Self {
        let model = payload
            .and_then(|body| body.get("model"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MOCK_MODEL)
            .to_string();
        Self {
            model,
            stream: summary.stream,
            text: summary.debug_text(),
            created: Utc::now().timestamp(),
        }
    }

    /// Answer a request for `route`
    pub fn respond(&self, route: &str) -> ProxyResult<MockReply> {
        debug!(route, stream = self.stream, "synthesizing mock response");
        match route {
            paths::CHAT_COMPLETIONS if self.stream => self.chat_stream(),
            paths::CHAT_COMPLETIONS => self.json_reply(&self.chat_completion(), Some(false)),
            paths::MODELS => self.json_reply(&self.model_list(), None),
            paths::RESPONSES if self.stream => self.responses_stream(),
            paths::RESPONSES => {
                let ids = ResponseIds::generate();
                self.json_reply(&self.completed_response(&ids), Some(false))
            }
            other => Ok(self.not_implemented(other)),
        }
    }

    pub fn chat_completion(&self) -> ChatCompletion {
        ChatCompletion {
            id: format!("chatcmpl_{}", Uuid::new_v4()),
            object: "chat.completion",
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: ROLE_ASSISTANT,
                    content: self.text.clone(),
                },
                finish_reason: FINISH_STOP,
            }],
            usage: ChatUsage::default(),
        }
    }

    /// Role delta, content delta, finish delta; one id throughout
    pub fn chat_chunks(&self) -> Vec<ChatCompletionChunk> {
        let id = format!("chatcmpl_{}", Uuid::new_v4());
        let chunk = |delta: ChunkDelta, finish_reason: Option<&'static str>| ChatCompletionChunk {
            id: id.clone(),
            object: "chat.completion.chunk",
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        };

        vec![
            chunk(
                ChunkDelta {
                    role: Some(ROLE_ASSISTANT),
                    content: None,
                },
                None,
            ),
            chunk(
                ChunkDelta {
                    role: None,
                    content: Some(self.text.clone()),
                },
                None,
            ),
            chunk(ChunkDelta::default(), Some(FINISH_STOP)),
        ]
    }

    pub fn model_list(&self) -> ModelList {
        ModelList {
            object: "list",
            data: vec![ModelCard {
                id: self.model.clone(),
                object: "model",
                created: self.created,
                owned_by: SERVICE_NAME,
            }],
        }
    }

    pub fn completed_response(&self, ids: &ResponseIds) -> ResponseObject {
        ResponseObject {
            output: vec![self.output_item(ids, "completed", self.completed_part())],
            output_text: Some(self.text.clone()),
            usage: Some(ResponseUsage::default()),
            status: "completed",
            ..self.initial_response(ids)
        }
    }

    /// The ten-frame event sequence minus the terminator
    pub fn response_events(&self, ids: &ResponseIds) -> Vec<ResponseStreamEvent> {
        let initial = self.initial_response(ids);
        let completed = self.completed_response(ids);
        let done_item = completed.output.first().cloned().unwrap_or_else(|| {
            self.output_item(ids, "completed", self.completed_part())
        });

        vec![
            ResponseStreamEvent::Created {
                response: initial.clone(),
            },
            ResponseStreamEvent::InProgress { response: initial },
            ResponseStreamEvent::OutputItemAdded {
                output_index: 0,
                item: OutputItem {
                    content: Vec::new(),
                    ..self.output_item(ids, "in_progress", self.completed_part())
                },
            },
            ResponseStreamEvent::ContentPartAdded {
                item_id: ids.item_id.clone(),
                output_index: 0,
                content_index: 0,
                part: ContentPart {
                    kind: OUTPUT_TEXT,
                    text: String::new(),
                    annotations: None,
                },
            },
            ResponseStreamEvent::OutputTextDelta {
                item_id: ids.item_id.clone(),
                output_index: 0,
                content_index: 0,
                delta: self.text.clone(),
            },
            ResponseStreamEvent::OutputTextDone {
                item_id: ids.item_id.clone(),
                output_index: 0,
                content_index: 0,
                text: self.text.clone(),
            },
            ResponseStreamEvent::ContentPartDone {
                item_id: ids.item_id.clone(),
                output_index: 0,
                content_index: 0,
                part: ContentPart {
                    kind: OUTPUT_TEXT,
                    text: self.text.clone(),
                    annotations: None,
                },
            },
            ResponseStreamEvent::OutputItemDone {
                output_index: 0,
                item: done_item,
            },
            ResponseStreamEvent::Completed {
                response: completed,
            },
        ]
    }

    fn initial_response(&self, ids: &ResponseIds) -> ResponseObject {
        ResponseObject {
            id: ids.response_id.clone(),
            object: "response",
            created_at: self.created,
            status: "in_progress",
            error: None,
            model: self.model.clone(),
            output: Vec::new(),
            output_text: None,
            usage: None,
        }
    }

    fn output_item(&self, ids: &ResponseIds, status: &'static str, part: ContentPart) -> OutputItem {
        OutputItem {
            id: ids.item_id.clone(),
            kind: "message",
            role: ROLE_ASSISTANT,
            status,
            content: vec![part],
        }
    }

    fn completed_part(&self) -> ContentPart {
        ContentPart {
            kind: OUTPUT_TEXT,
            text: self.text.clone(),
            annotations: Some(Vec::new()),
        }
    }

    fn chat_stream(&self) -> ProxyResult<MockReply> {
        let mut frames = self
            .chat_chunks()
            .iter()
            .map(SseFrame::json)
            .collect::<Result<Vec<_>, _>>()?;
        frames.push(SseFrame::Done);
        Ok(self.stream_reply(EventStream::new(&frames)))
    }

    fn responses_stream(&self) -> ProxyResult<MockReply> {
        let ids = ResponseIds::generate();
        let mut frames = self
            .response_events(&ids)
            .iter()
            .map(SseFrame::json)
            .collect::<Result<Vec<_>, _>>()?;
        frames.push(SseFrame::Done);
        Ok(self.stream_reply(EventStream::new(&frames)))
    }

    fn stream_reply(&self, events: EventStream) -> MockReply {
        let capture = ResponseCapture::new(Source::Mock, StatusCode::OK.as_u16())
            .with_stream(true)
            .with_preview(self.text.clone())
            .with_response_sha256(events.fingerprint());
        MockReply {
            response: events.into_response(),
            capture,
        }
    }

    fn json_reply<T: Serialize>(&self, payload: &T, stream: Option<bool>) -> ProxyResult<MockReply> {
        let bytes = serde_json::to_vec(payload)?;
        let value = serde_json::to_value(payload)?;
        let mut capture = ResponseCapture::new(Source::Mock, StatusCode::OK.as_u16())
            .with_response(value, fingerprint(&bytes));
        if let Some(stream) = stream {
            capture = capture.with_stream(stream);
        }
        Ok(MockReply {
            response: json_response(StatusCode::OK, bytes),
            capture,
        })
    }

    fn not_implemented(&self, route: &str) -> MockReply {
        let envelope = ErrorEnvelope::not_found(format!("mock mode does not implement {route}"));
        let capture = ResponseCapture::new(Source::Mock, StatusCode::NOT_FOUND.as_u16())
            .with_error("not_implemented");
        MockReply {
            response: envelope.into_response_with_status(StatusCode::NOT_FOUND),
            capture,
        }
    }
}

/// Identifiers shared by every frame of one structured response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseIds {
    pub response_id: String,
    pub item_id: String,
}

impl ResponseIds {
    pub fn generate() -> Self {
        Self {
            response_id: format!("resp_{}", Uuid::new_v4()),
            item_id: format!("msg_{}", Uuid::new_v4()),
        }
    }
}

fn json_response(status: StatusCode, bytes: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_types::APPLICATION_JSON),
    );
    response
}
