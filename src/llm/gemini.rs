//! Google Gemini streaming provider
//!
//! Talks to `streamGenerateContent` with `alt=sse` and turns the server-sent
//! event body into a [`TextStream`] of text fragments.

use super::types::{ContentBlock, GenerationConfig, ImageSource, LlmRequest, TextStream};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;

const DIRECT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Finish reasons that mean the model refused to continue
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

/// Gemini service for a single model
pub struct GeminiService {
    client: Client,
    api_key: String,
    url: String,
    model_id: String,
}

impl GeminiService {
    pub fn new(api_key: String, model: &str, gateway: Option<&str>) -> Result<Self, LlmError> {
        let base = match gateway {
            // Gateway proxies the provider under /gemini
            Some(gw) => format!("{}/gemini/v1beta", gw.trim_end_matches('/')),
            None => DIRECT_BASE_URL.to_string(),
        };
        let url = format!("{base}/models/{model}:streamGenerateContent?alt=sse");

        // No total timeout: a streamed body legitimately stays open for minutes
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            url,
            model_id: model.to_string(),
        })
    }

    fn translate_request(request: &LlmRequest) -> GeminiRequest {
        let parts = request
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => GeminiPart::Text { text: text.clone() },
                ContentBlock::Image {
                    source: ImageSource::Base64 { media_type, data },
                } => GeminiPart::InlineData {
                    inline_data: GeminiBlob {
                        mime_type: media_type.clone(),
                        data: data.clone(),
                    },
                },
            })
            .collect();

        GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: translate_generation(request.generation),
        }
    }
}

fn translate_generation(config: GenerationConfig) -> Option<GeminiGenerationConfig> {
    if config == GenerationConfig::default() {
        return None;
    }
    Some(GeminiGenerationConfig {
        temperature: config.temperature,
        max_output_tokens: config.max_output_tokens,
    })
}

#[async_trait]
impl LlmService for GeminiService {
    async fn stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let gemini_request = Self::translate_request(request);

        let mut builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        // Gateway mode supplies its own credentials
        if !self.api_key.starts_with("implicit") {
            builder = builder.header("x-goog-api-key", &self.api_key);
        }

        let response = builder
            .json(&gemini_request)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<GeminiErrorResponse>(&body) {
                Ok(error_resp) => error_resp.error.message,
                Err(_) => body,
            };
            return Err(LlmError::from_status(status.as_u16(), &message));
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(reqwest::Error::without_url));
        Ok(text_stream(bytes))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// SSE decoding
// ============================================================================

/// Incremental server-sent-event decoder.
///
/// Bytes are buffered until a full line is available so multi-byte characters
/// split across network reads are never mangled.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    data: String,
}

impl SseDecoder {
    /// Feed raw bytes, returning the data payload of every completed event
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            if let Some(event) = self.process_line(line.trim_end_matches(['\n', '\r'])) {
                events.push(event);
            }
        }
        events
    }

    /// Flush whatever is left once the body ends
    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        let line = line.trim_end_matches('\r');
        if !line.is_empty() {
            let _ = self.process_line(line);
        }
        (!self.data.is_empty()).then(|| std::mem::take(&mut self.data))
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            // Blank line terminates the event
            return (!self.data.is_empty()).then(|| std::mem::take(&mut self.data));
        }
        if let Some(value) = line.strip_prefix("data:") {
            if !self.data.is_empty() {
                self.data.push('\n');
            }
            self.data.push_str(value.strip_prefix(' ').unwrap_or(value));
        }
        // Comments and event/id/retry fields carry nothing we use
        None
    }
}

/// Turn one event payload into stream items: text first, then any terminal error
fn parse_payload(payload: &str) -> Vec<Result<String, LlmError>> {
    let chunk: GeminiStreamChunk = match serde_json::from_str(payload) {
        Ok(c) => c,
        Err(e) => {
            return vec![Err(LlmError::unknown(format!(
                "Failed to parse stream chunk: {e}"
            )))]
        }
    };

    if let Some(error) = chunk.error {
        let status = error
            .code
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(500);
        return vec![Err(LlmError::from_status(status, &error.message))];
    }

    if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
        return vec![Err(LlmError::blocked(format!("Prompt blocked: {reason}")))];
    }

    let mut items = Vec::new();
    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return items;
    };

    let text: String = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter(|part| !part.thought)
        .filter_map(|part| part.text)
        .collect();
    if !text.is_empty() {
        items.push(Ok(text));
    }

    if let Some(reason) = candidate.finish_reason {
        if BLOCKING_FINISH_REASONS.contains(&reason.as_str()) {
            items.push(Err(LlmError::blocked(format!(
                "Response stopped by the model: {reason}"
            ))));
        }
    }
    items
}

/// Queue parsed items; returns true once a terminal error was queued
fn enqueue(pending: &mut VecDeque<Result<String, LlmError>>, payloads: Vec<String>) -> bool {
    for payload in payloads {
        for item in parse_payload(&payload) {
            let failed = item.is_err();
            pending.push_back(item);
            if failed {
                return true;
            }
        }
    }
    false
}

/// Adapt a raw SSE byte stream into text fragments.
///
/// The stream ends after the first error.
fn text_stream<S, B, E>(bytes: S) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    let initial = (Box::pin(bytes), SseDecoder::default(), VecDeque::new(), false);

    Box::pin(stream::unfold(
        initial,
        |(mut bytes, mut decoder, mut pending, mut done)| async move {
            loop {
                if let Some(item) = pending.pop_front() {
                    return Some((item, (bytes, decoder, pending, done)));
                }
                if done {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        done = enqueue(&mut pending, decoder.push(chunk.as_ref()));
                    }
                    Some(Err(e)) => {
                        pending.push_back(Err(LlmError::network(format!(
                            "Stream interrupted: {e}"
                        ))));
                        done = true;
                    }
                    None => {
                        enqueue(&mut pending, decoder.finish().into_iter().collect());
                        done = true;
                    }
                }
            }
        },
    ))
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiBlob,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<StreamCandidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamCandidate {
    content: Option<StreamContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamContent {
    #[serde(default)]
    parts: Vec<StreamPart>,
}

#[derive(Debug, Deserialize)]
struct StreamPart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
    code: Option<i32>,
}
