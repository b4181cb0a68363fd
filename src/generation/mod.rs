//! 답변 생성 모듈 - 호스팅 LLM 호출
//!
//! Hugging Face 라우터와 Groq 모두 OpenAI 호환 `/chat/completions`를 제공하므로
//! 하나의 클라이언트가 `Provider` 설정값에 따라 엔드포인트와 모델만 바꿔 씁니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let generator = ChatCompletionsGenerator::from_config(&config)?;
//! let request = GenerationRequest { system_prompt, context: &context, question };
//! let answer = generator.generate_stream(&request, &mut |chunk| print!("{}", chunk)).await?;
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::config::{Provider, RagConfig};

// ============================================================================
// AnswerGenerator Trait
// ============================================================================

/// 생성 요청 (시스템 프롬프트는 요청마다 명시적으로 전달)
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub system_prompt: &'a str,
    pub context: &'a str,
    pub question: &'a str,
}

impl GenerationRequest<'_> {
    /// 사용자 메시지 본문
    pub fn user_prompt(&self) -> String {
        format!("Context: {}\n\nQuestion: {}", self.context, self.question)
    }
}

/// 답변 생성기 트레이트
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// 전체 답변을 한 번에 반환
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String>;

    /// 도착 순서대로 `on_chunk`에 조각을 넘기고, 끝나면 전체 답변을 반환
    async fn generate_stream(
        &self,
        request: &GenerationRequest<'_>,
        on_chunk: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> Result<String>;

    /// 생성기 이름 (로그용)
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI-compatible wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    #[serde(default)]
    delta: ChatStreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChatStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiErrorDetail {
    Object { message: String },
    Text(String),
}

impl ApiErrorDetail {
    fn message(&self) -> &str {
        match self {
            ApiErrorDetail::Object { message } => message,
            ApiErrorDetail::Text(message) => message,
        }
    }
}

// ============================================================================
// SSE Decoder
// ============================================================================

/// `data: {...}` 형식의 SSE 스트림 디코더
///
/// 네트워크 청크 경계가 줄이나 UTF-8 문자 중간에 걸려도
/// 완성된 줄만 처리합니다.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// 바이트를 추가하고 새로 완성된 텍스트 조각들을 반환
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(bytes);

        let mut deltas = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(delta) = self.parse_line(line.trim_end())? {
                deltas.push(delta);
            }
        }
        Ok(deltas)
    }

    /// 스트림 종료 시 남은 줄 처리
    fn finish(&mut self) -> Result<Vec<String>> {
        if self.buffer.is_empty() {
            return Ok(vec![]);
        }
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        Ok(self.parse_line(line.trim_end())?.into_iter().collect())
    }

    fn parse_line(&mut self, line: &str) -> Result<Option<String>> {
        let Some(payload) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let payload = payload.trim_start();

        if self.done || payload.is_empty() {
            return Ok(None);
        }
        if payload == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(payload) {
            anyhow::bail!("Stream error: {}", error.error.message());
        }

        match serde_json::from_str::<ChatStreamChunk>(payload) {
            Ok(chunk) => Ok(chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|c| !c.is_empty())),
            Err(parse_err) => {
                tracing::debug!("Skipping unparseable stream line ({}): {}", parse_err, payload);
                Ok(None)
            }
        }
    }
}

// ============================================================================
// ChatCompletionsGenerator
// ============================================================================

/// OpenAI 호환 chat completions 클라이언트
#[derive(Debug)]
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    provider: Provider,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl ChatCompletionsGenerator {
    /// 새 생성기
    pub fn new(provider: Provider, api_key: String, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            provider,
            endpoint: provider.endpoint().to_string(),
            api_key,
            model,
            max_tokens: provider.default_max_tokens(),
            temperature: 0.7,
        })
    }

    /// 설정 + 환경변수 API 키로 생성
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let env_var = config.provider.api_key_env();
        let api_key = std::env::var(env_var)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow::anyhow!("API key not found. Set {} environment variable", env_var))?;

        let mut generator = Self::new(config.provider, api_key, config.model())?;
        generator.max_tokens = config.max_tokens();
        generator.temperature = config.temperature;

        tracing::info!(
            "Using {} for generation (model: {})",
            config.provider.name(),
            generator.model
        );
        Ok(generator)
    }

    fn build_request<'a>(&'a self, request: &GenerationRequest<'_>, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: request.user_prompt(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream,
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.provider.name()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|e| e.error.message().to_string())
                .unwrap_or(error_text);
            anyhow::bail!("{} API error ({}): {}", self.provider.name(), status, message);
        }
        Ok(response)
    }
}

#[async_trait]
impl AnswerGenerator for ChatCompletionsGenerator {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        let body = self.build_request(request, false);
        let response = self.send(&body).await?;

        let text = response
            .text()
            .await
            .context("Failed to read completion body")?;
        let parsed: ChatResponse =
            serde_json::from_str(&text).context("Failed to parse completion response")?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("No response content from model '{}'", self.model))
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest<'_>,
        on_chunk: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> Result<String> {
        let body = self.build_request(request, true);
        let response = self.send(&body).await?;

        let mut full_content = String::new();
        let mut decoder = SseDecoder::default();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Stream error")?;
            for delta in decoder.push(&chunk)? {
                on_chunk(&delta);
                full_content.push_str(&delta);
            }
        }
        for delta in decoder.finish()? {
            on_chunk(&delta);
            full_content.push_str(&delta);
        }

        Ok(full_content)
    }

    fn name(&self) -> &str {
        self.provider.name()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest<'static> {
        GenerationRequest {
            system_prompt: "Be brief.",
            context: "Title: A\nContent: a\nSource: u\n\n",
            question: "What is A?",
        }
    }

    #[test]
    fn test_user_prompt_format() {
        assert_eq!(
            request().user_prompt(),
            "Context: Title: A\nContent: a\nSource: u\n\n\n\nQuestion: What is A?"
        );
    }

    #[test]
    fn test_request_uses_system_role() {
        let generator =
            ChatCompletionsGenerator::new(Provider::Groq, "key".into(), "m".into()).unwrap();
        let body = serde_json::to_value(generator.build_request(&request(), true)).unwrap();

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "Be brief.");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_blocking_request_omits_stream_flag() {
        let generator =
            ChatCompletionsGenerator::new(Provider::HuggingFace, "key".into(), "m".into())
                .unwrap();
        let body = serde_json::to_value(generator.build_request(&request(), false)).unwrap();
        assert!(body.get("stream").is_none());
        assert_eq!(body["max_tokens"], 600);
    }

    #[test]
    fn test_sse_decoder_split_chunks() {
        let mut decoder = SseDecoder::default();
        let first = decoder
            .push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi")
            .unwrap();
        assert_eq!(first, vec!["Hel"]);

        let second = decoder
            .push(b"ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n")
            .unwrap();
        assert_eq!(second, vec!["lo"]);
        assert!(decoder.done);
    }

    #[test]
    fn test_sse_decoder_split_utf8() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"뇌\"}}]}\n".as_bytes();
        let split = line.len() - 8;
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&line[..split]).unwrap().is_empty());
        assert_eq!(decoder.push(&line[split..]).unwrap(), vec!["뇌"]);
    }

    #[test]
    fn test_sse_decoder_skips_role_and_empty_deltas() {
        let mut decoder = SseDecoder::default();
        let deltas = decoder
            .push(b": keep-alive\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\ndata: {\"choices\":[]}\n")
            .unwrap();
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_sse_decoder_surfaces_stream_error() {
        let mut decoder = SseDecoder::default();
        let result = decoder.push(b"data: {\"error\":{\"message\":\"model overloaded\"}}\n");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("model overloaded"));
    }

    #[test]
    fn test_sse_decoder_finish_flushes_tail() {
        let mut decoder = SseDecoder::default();
        assert!(decoder
            .push(b"data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}")
            .unwrap()
            .is_empty());
        assert_eq!(decoder.finish().unwrap(), vec!["end"]);
    }
}
