use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::data_models::StreamEvent;
use crate::error::RelayError;

pub const TEMPERATURE: f32 = 0.7;
pub const PLAIN_MAX_TOKENS: u32 = 700;
pub const SEARCH_MAX_TOKENS: u32 = 1000;

/// Model used when a key is not in the table. Differs from the request's
/// default key on purpose.
pub const FALLBACK_MODEL_ID: &str = "gpt-4-0125-preview";

const MODEL_TABLE: &[(&str, &str)] = &[
    ("o3-mini", "o3-mini-2025-01-31"),
    ("gpt-4o-mini", "gpt-4o-mini"),
];

pub fn resolve_model(key: &str) -> &'static str {
    MODEL_TABLE
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, id)| *id)
        .unwrap_or(FALLBACK_MODEL_ID)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnMode {
    Plain,
    Search,
}

impl TurnMode {
    pub fn max_tokens(self) -> u32 {
        match self {
            TurnMode::Plain => PLAIN_MAX_TOKENS,
            TurnMode::Search => SEARCH_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Text increments from the provider, in generation order.
pub type FragmentStream = BoxStream<'static, Result<String, RelayError>>;
pub type EventStream = BoxStream<'static, StreamEvent>;

/// A chat model that streams its output.
///
/// `stream_chat` resolves once the provider has accepted the request; errors
/// returned here happen before any output exists.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn stream_chat(&self, request: CompletionRequest) -> Result<FragmentStream, RelayError>;
}

pub struct CompletionRelay {
    provider: Arc<dyn ChatProvider>,
}

impl CompletionRelay {
    pub fn new(provider: Arc<dyn ChatProvider>) -> CompletionRelay {
        CompletionRelay { provider }
    }

    pub async fn complete(
        &self,
        system: String,
        user: String,
        model_key: &str,
        mode: TurnMode,
    ) -> Result<EventStream, RelayError> {
        let model = resolve_model(model_key);
        log::info!("requesting completion: model={model} mode={mode:?}");
        let request = CompletionRequest {
            model: model.to_string(),
            system,
            user,
            temperature: TEMPERATURE,
            max_tokens: mode.max_tokens(),
        };
        let fragments = self.provider.stream_chat(request).await?;
        Ok(relay_events(fragments).boxed())
    }
}

/// Re-emits provider fragments as stream events.
///
/// Empty fragments and exact repeats of the previously emitted fragment are
/// dropped. The first error ends the stream with a single `Error` event.
/// Dropping the returned stream drops `fragments` with it.
pub fn relay_events<S>(fragments: S) -> impl Stream<Item = StreamEvent> + Send + 'static
where
    S: Stream<Item = Result<String, RelayError>> + Send + 'static,
{
    async_stream::stream! {
        let mut last: Option<String> = None;
        futures::pin_mut!(fragments);
        while let Some(next) = fragments.next().await {
            match next {
                Ok(fragment) => {
                    if fragment.is_empty() || last.as_deref() == Some(fragment.as_str()) {
                        continue;
                    }
                    last = Some(fragment.clone());
                    yield StreamEvent::Content(fragment);
                }
                Err(e) => {
                    log::error!("error while streaming: {:#}", e);
                    yield StreamEvent::Error(e.to_string());
                    break;
                }
            }
        }
    }
}

/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> OpenAiProvider {
        OpenAiProvider {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn endpoint_chat_completions(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn stream_chat(&self, request: CompletionRequest) -> Result<FragmentStream, RelayError> {
        let body = ChatCompletionsRequest {
            model: request.model,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: request.system,
                },
                Message {
                    role: "user".to_string(),
                    content: request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
        };

        let response = self
            .client
            .post(self.endpoint_chat_completions())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Rejected {
                status,
                message: provider_error_message(&body),
            });
        }
        Ok(decode_sse(response.bytes_stream()).boxed())
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderError,
}

/// Pulls the human-readable message out of a provider error body, if it has one.
fn provider_error_message(body: &str) -> String {
    serde_json::from_str::<ProviderErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Fragment(String),
    Done,
    Skip,
}

fn decode_line(line: &str) -> Result<SseLine, RelayError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    let chunk: ChatCompletionChunk = serde_json::from_str(data)?;
    if let Some(error) = chunk.error {
        return Err(RelayError::Provider(error.message));
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .map(SseLine::Fragment)
        .unwrap_or(SseLine::Skip))
}

/// Splits a byte stream into lines; bytes after the last newline stay pending.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(
                String::from_utf8_lossy(&line)
                    .trim_end_matches(['\n', '\r'])
                    .to_string(),
            );
        }
        lines
    }
}

fn decode_sse<S, B>(bytes: S) -> impl Stream<Item = Result<String, RelayError>> + Send + 'static
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    async_stream::stream! {
        let mut buffer = LineBuffer::default();
        futures::pin_mut!(bytes);
        'chunks: while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(RelayError::from(e));
                    break 'chunks;
                }
            };
            for line in buffer.push(chunk.as_ref()) {
                match decode_line(&line) {
                    Ok(SseLine::Fragment(text)) => yield Ok(text),
                    Ok(SseLine::Done) => break 'chunks,
                    Ok(SseLine::Skip) => {}
                    Err(e) => {
                        yield Err(e);
                        break 'chunks;
                    }
                }
            }
        }
    }
}
