//! Chat-completion backends.
//!
//! A [`Generator`] turns a fully built prompt into answer text, either in one
//! piece ([`Generator::complete`]) or as an ordered [`FragmentStream`]
//! ([`Generator::stream`]). Concatenating the fragments of a stream yields
//! the same text a complete call would return.
//!
//! | Provider | Endpoint | Stream framing |
//! |----------|----------|----------------|
//! | `openai` | `POST {base}/chat/completions` | server-sent events, `data: [DONE]` terminator |
//! | `ollama` | `POST {url}/api/chat` | newline-delimited JSON, `"done": true` terminator |

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{AssistantError, Result};
use crate::http::send_with_retry;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Answer completions are sent once; a failure is reported to the user.
const GENERATION_RETRIES: u32 = 0;

/// Ordered answer fragments. An `Err` item ends the stream.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// What to generate. `model` and `temperature` are forwarded verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub temperature: f32,
    pub prompt: String,
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn supports_streaming(&self) -> bool {
        true
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<String>;

    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream>;
}

/// Build the generator named by `llm.provider`.
pub fn create_generator(config: &LlmConfig) -> Result<Box<dyn Generator>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| AssistantError::configuration(format!("building HTTP client: {}", e)))?;

    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAIGenerator {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
        })),
        "ollama" => Ok(Box::new(OllamaGenerator {
            client,
            url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
        })),
        other => Err(AssistantError::configuration(format!(
            "unknown llm provider: {}",
            other
        ))),
    }
}

/// Splits a byte stream into `\n`-terminated lines. A trailing line without
/// a newline is returned by [`LineBuffer::finish`].
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1])
                .trim_end_matches('\r')
                .to_string();
            lines.push(text);
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        (!text.is_empty()).then_some(text)
    }
}

/// One decoded line of a streaming response.
#[derive(Debug, PartialEq)]
enum StreamLine {
    Fragment(String),
    Done,
    Skip,
}

/// Turn a line-oriented HTTP body into a [`FragmentStream`] using `parse`.
fn fragment_stream(
    response: reqwest::Response,
    parse: fn(&str) -> anyhow::Result<StreamLine>,
) -> FragmentStream {
    Box::pin(decode_lines(response, parse))
}

fn decode_lines(
    response: reqwest::Response,
    parse: fn(&str) -> anyhow::Result<StreamLine>,
) -> impl Stream<Item = Result<String>> + Send {
    async_stream::try_stream! {
        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut done = false;
        'read: while let Some(chunk) = body.next().await {
            let chunk = chunk
                .context("reading streamed completion")
                .map_err(AssistantError::external)?;
            for line in lines.push(&chunk) {
                match parse(&line).map_err(AssistantError::external)? {
                    StreamLine::Fragment(text) => yield text,
                    StreamLine::Done => {
                        done = true;
                        break 'read;
                    }
                    StreamLine::Skip => {}
                }
            }
        }
        if !done {
            if let Some(line) = lines.finish() {
                match parse(&line).map_err(AssistantError::external)? {
                    StreamLine::Fragment(text) => yield text,
                    StreamLine::Done => done = true,
                    StreamLine::Skip => {}
                }
            }
        }
        // A body that ends without its terminator was cut off.
        if !done {
            Err::<(), _>(AssistantError::external(anyhow!(
                "completion stream ended before it was finished"
            )))?;
        }
    }
}

// ============ OpenAI ============

pub struct OpenAIGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAIGenerator {
    async fn send(&self, request: &GenerationRequest, stream: bool) -> Result<reqwest::Response> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AssistantError::external(anyhow!("OPENAI_API_KEY is not set")))?;
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": request.model,
            "temperature": request.temperature,
            "stream": stream,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        debug!(model = %request.model, temperature = request.temperature, stream, "OpenAI chat request");

        send_with_retry("OpenAI chat", GENERATION_RETRIES, || {
            self.client.post(&url).bearer_auth(api_key).json(&body)
        })
        .await
        .map_err(AssistantError::external)
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    async fn complete(&self, request: &GenerationRequest) -> Result<String> {
        let json: serde_json::Value = self
            .send(request, false)
            .await?
            .json()
            .await
            .context("decoding OpenAI chat response")
            .map_err(AssistantError::external)?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| AssistantError::external(anyhow!("invalid OpenAI response: no content")))
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream> {
        let response = self.send(request, true).await?;
        Ok(fragment_stream(response, parse_sse_line))
    }
}

fn parse_sse_line(line: &str) -> anyhow::Result<StreamLine> {
    let line = line.trim();
    let data = match line.strip_prefix("data:") {
        Some(d) => d.trim(),
        None => return Ok(StreamLine::Skip),
    };
    if data == "[DONE]" {
        return Ok(StreamLine::Done);
    }
    let json: serde_json::Value =
        serde_json::from_str(data).with_context(|| format!("malformed event: {}", data))?;
    if let Some(err) = json.get("error") {
        return Err(anyhow!("OpenAI stream error: {}", err));
    }
    match json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
    {
        Some(text) if !text.is_empty() => Ok(StreamLine::Fragment(text.to_string())),
        _ => Ok(StreamLine::Skip),
    }
}

// ============ Ollama ============

pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
}

impl OllamaGenerator {
    async fn send(&self, request: &GenerationRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": request.model,
            "stream": stream,
            "options": { "temperature": request.temperature },
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        debug!(model = %request.model, temperature = request.temperature, stream, "Ollama chat request");

        send_with_retry("Ollama chat", GENERATION_RETRIES, || {
            self.client.post(&url).json(&body)
        })
        .await
        .with_context(|| format!("is Ollama running at {}?", self.url))
        .map_err(AssistantError::external)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn complete(&self, request: &GenerationRequest) -> Result<String> {
        let json: serde_json::Value = self
            .send(request, false)
            .await?
            .json()
            .await
            .context("decoding Ollama chat response")
            .map_err(AssistantError::external)?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| AssistantError::external(anyhow!("invalid Ollama response: no content")))
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream> {
        let response = self.send(request, true).await?;
        Ok(fragment_stream(response, parse_ndjson_line))
    }
}

fn parse_ndjson_line(line: &str) -> anyhow::Result<StreamLine> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(StreamLine::Skip);
    }
    let json: serde_json::Value =
        serde_json::from_str(line).with_context(|| format!("malformed chunk: {}", line))?;
    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        return Err(anyhow!("Ollama stream error: {}", err));
    }
    let text = json
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default();
    let done = json.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
    match (text.is_empty(), done) {
        (false, _) => Ok(StreamLine::Fragment(text.to_string())),
        (true, true) => Ok(StreamLine::Done),
        (true, false) => Ok(StreamLine::Skip),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_handles_split_lines() {
        let mut lb = LineBuffer::default();
        assert!(lb.push(b"data: {\"a\"").is_empty());
        assert_eq!(lb.push(b":1}\r\ndata: x\n"), vec!["data: {\"a\":1}", "data: x"]);
        assert!(lb.finish().is_none());
        lb.push(b"{\"done\":true}");
        assert_eq!(lb.finish().as_deref(), Some("{\"done\":true}"));
    }

    #[test]
    fn sse_content_and_terminator() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            StreamLine::Fragment("Hel".to_string())
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), StreamLine::Done);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), StreamLine::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            StreamLine::Skip
        );
    }

    #[test]
    fn sse_error_event_fails() {
        assert!(parse_sse_line(r#"data: {"error":{"message":"quota"}}"#).is_err());
        assert!(parse_sse_line("data: {not json").is_err());
    }

    #[test]
    fn ndjson_content_and_done() {
        assert_eq!(
            parse_ndjson_line(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#)
                .unwrap(),
            StreamLine::Fragment("Hi".to_string())
        );
        assert_eq!(
            parse_ndjson_line(r#"{"message":{"role":"assistant","content":""},"done":true}"#)
                .unwrap(),
            StreamLine::Done
        );
        assert!(parse_ndjson_line(r#"{"error":"model not found"}"#).is_err());
    }

    fn response(body: &'static str) -> reqwest::Response {
        reqwest::Response::from(::http::Response::builder().status(200).body(body).unwrap())
    }

    async fn collect(stream: FragmentStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn sse_stream_without_terminator_fails() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"The Stroop eff\"}}]}\n\n";
        let items = collect(fragment_stream(response(body), parse_sse_line)).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "The Stroop eff");
        assert!(matches!(items[1], Err(AssistantError::ExternalService(_))));
    }

    #[tokio::test]
    async fn sse_stream_with_terminator_succeeds() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
                    data: [DONE]\n\n";
        let items = collect(fragment_stream(response(body), parse_sse_line)).await;
        let text: String = items.into_iter().map(|i| i.unwrap()).collect();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn ndjson_stream_done_on_last_unterminated_line() {
        let body = "{\"message\":{\"content\":\"Hi\"},\"done\":false}\n\
                    {\"message\":{\"content\":\"\"},\"done\":true}";
        let items = collect(fragment_stream(response(body), parse_ndjson_line)).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "Hi");

        let cut = "{\"message\":{\"content\":\"Hi\"},\"done\":false}\n";
        let items = collect(fragment_stream(response(cut), parse_ndjson_line)).await;
        assert!(matches!(items.last(), Some(Err(AssistantError::ExternalService(_)))));
    }

    #[test]
    fn unknown_provider_is_configuration_error() {
        let cfg = LlmConfig {
            provider: "anthropic".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            create_generator(&cfg),
            Err(AssistantError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn openai_without_key_fails() {
        let generator = OpenAIGenerator {
            client: reqwest::Client::new(),
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: None,
        };
        let request = GenerationRequest {
            model: "gpt-4".to_string(),
            temperature: 0.0,
            prompt: "hi".to_string(),
        };
        let err = generator.complete(&request).await.unwrap_err();
        assert!(matches!(err, AssistantError::ExternalService(_)));
    }
}
