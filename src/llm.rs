//! Hosted generative model client.
//!
//! The model is an opaque request/stream service behind the `ChatModel`
//! trait: a streaming call for chat answers and a one-shot call for
//! title synthesis. `GeminiClient` talks to the Gemini REST API.

use crate::grounding::GroundingDoc;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const DEFAULT_TIMEOUT_MS: u64 = 120_000;

pub type ModelFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ModelError>> + Send + 'a>>;

/// Incremental answer text, in model production order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, ModelError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("language model request failed: {0}")]
    Failure(String),

    #[error("language model returned an invalid payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub prompt: String,
    /// Knowledge document to ground the answer in, if any.
    pub grounding: Option<GroundingDoc>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

impl ModelRequest {
    pub fn new(prompt: String) -> Self {
        Self {
            prompt,
            grounding: None,
            temperature: None,
            max_output_tokens: None,
        }
    }
}

pub trait ChatModel: Send + Sync {
    /// Stream an answer chunk by chunk. Chunks arrive in production
    /// order and are never coalesced here.
    fn stream_answer<'a>(&'a self, request: ModelRequest) -> ModelFuture<'a, ChunkStream>;

    /// One-shot generation, used for short auxiliary calls (titles).
    fn generate<'a>(&'a self, request: ModelRequest) -> ModelFuture<'a, String>;
}

pub struct GeminiClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_base: &str, model: &str, api_key: &str) -> Result<Self, ModelError> {
        if api_key.is_empty() {
            return Err(ModelError::Failure("missing gemini api key".to_string()));
        }
        if model.is_empty() {
            return Err(ModelError::Failure("missing gemini model".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .map_err(|e| ModelError::Failure(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    fn request_body(request: &ModelRequest) -> Value {
        let mut parts = Vec::new();
        if let Some(doc) = &request.grounding {
            parts.push(json!({
                "inlineData": {
                    "mimeType": doc.mime_type,
                    "data": doc.data_base64,
                }
            }));
        }
        parts.push(json!({ "text": request.prompt }));

        let mut body = json!({
            "contents": [{ "role": "user", "parts": parts }],
        });
        let mut generation_config = serde_json::Map::new();
        if let Some(temperature) = request.temperature {
            generation_config.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = request.max_output_tokens {
            generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
        }
        if !generation_config.is_empty() {
            body["generationConfig"] = Value::Object(generation_config);
        }
        body
    }

    async fn send(
        &self,
        method: &str,
        query: &str,
        request: &ModelRequest,
    ) -> Result<reqwest::Response, ModelError> {
        let url = format!(
            "{}/models/{}:{method}?{query}key={}",
            self.api_base, self.model, self.api_key
        );
        let response = self
            .client
            .post(url)
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(|e| ModelError::Failure(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = body.chars().take(300).collect::<String>();
            return Err(ModelError::Failure(format!("{status}: {detail}")));
        }
        Ok(response)
    }
}

impl ChatModel for GeminiClient {
    fn stream_answer<'a>(&'a self, request: ModelRequest) -> ModelFuture<'a, ChunkStream> {
        Box::pin(async move {
            let response = self
                .send("streamGenerateContent", "alt=sse&", &request)
                .await?;

            let state = SseChunkState {
                bytes: response.bytes_stream().boxed(),
                buffer: SseLineBuffer::default(),
                pending: VecDeque::new(),
                done: false,
            };

            let chunks = futures_util::stream::unfold(state, |mut state| async move {
                loop {
                    if let Some(text) = state.pending.pop_front() {
                        return Some((Ok(text), state));
                    }
                    if state.done {
                        return None;
                    }
                    match state.bytes.next().await {
                        None => {
                            state.done = true;
                        }
                        Some(Err(e)) => {
                            state.done = true;
                            return Some((Err(ModelError::Failure(e.to_string())), state));
                        }
                        Some(Ok(bytes)) => {
                            for payload in state.buffer.push(&bytes) {
                                match serde_json::from_str::<Value>(&payload) {
                                    Ok(value) => {
                                        if let Some(text) = chunk_text(&value) {
                                            state.pending.push_back(text);
                                        }
                                    }
                                    Err(e) => {
                                        state.done = true;
                                        return Some((
                                            Err(ModelError::InvalidPayload(e.to_string())),
                                            state,
                                        ));
                                    }
                                }
                            }
                        }
                    }
                }
            });

            Ok(Box::pin(chunks) as ChunkStream)
        })
    }

    fn generate<'a>(&'a self, request: ModelRequest) -> ModelFuture<'a, String> {
        Box::pin(async move {
            let response = self.send("generateContent", "", &request).await?;
            let value: Value = response
                .json()
                .await
                .map_err(|e| ModelError::InvalidPayload(e.to_string()))?;
            chunk_text(&value)
                .ok_or_else(|| ModelError::InvalidPayload("response carried no text".to_string()))
        })
    }
}

struct SseChunkState {
    bytes: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    buffer: SseLineBuffer,
    pending: VecDeque<String>,
    done: bool,
}

/// Reassembles `data:` payloads from a byte stream that may split SSE
/// lines across arbitrary chunk boundaries.
#[derive(Default)]
struct SseLineBuffer {
    partial: String,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.push_str(&String::from_utf8_lossy(bytes));

        let mut payloads = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() && data != "[DONE]" {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }
}

/// Concatenated text parts of the first candidate, if any.
fn chunk_text(value: &Value) -> Option<String> {
    let parts = value
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<String>();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
