//! 설정 모듈
//!
//! CLI 인자와 환경변수에서 런타임 설정을 읽습니다.
//! 시스템 프롬프트와 LLM 프로바이더는 전역 상태가 아니라 이 설정값으로
//! 호출 체인을 따라 명시적으로 전달됩니다.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

/// 1단계 검색 기본 개수
pub const DEFAULT_N_RESULTS: usize = 10;
/// 리랭크 후 기본 반환 개수
pub const DEFAULT_N_RERANK: usize = 3;
/// TEI 호환 리랭커 기본 주소
pub const DEFAULT_RERANKER_URL: &str = "http://127.0.0.1:8081";

/// 기본 시스템 프롬프트
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an AI assistant for Thought Co tasked with providing answers based on the given context. Your goal is to analyze the information provided and formulate a concise, well-structured response to the question. Sometimes the information might not be sufficient to answer the question fully, in which case you should state this clearly in your response.

context will be passed as "Context:"
user question will be passed as "Question:"

To answer the question:
1. Thoroughly analyze the context, identifying key information relevant to the question.
2. Organize your thoughts and plan your response to ensure a logical flow of information.
3. Formulate a detailed answer that directly addresses the question, using only the information provided in the context.
4. Ensure your answer is comprehensive, covering all relevant aspects found in the context.
5. If the context doesn't contain sufficient information to fully answer the question, state this clearly in your response.

Format your response as follows:
1. Use clear, concise language.
2. Organize your answer into paragraphs for readability.
3. Use bullet points or numbered lists where appropriate to break down complex information.
4. If relevant, include any headings or subheadings to structure your response.
5. Ensure proper grammar, punctuation, and spelling throughout your answer.

IMPORTANT: At the beginning, write a short sentence summarizing your answer and then go into detail about it.
DO NOT PROVIDE MORE UNRELATED INFORMATION THAN NECESSARY."#;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.article-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".article-rag")
}

// ============================================================================
// Provider
// ============================================================================

/// 답변 생성 LLM 프로바이더
///
/// 두 프로바이더 모두 OpenAI 호환 `/chat/completions`를 제공하므로
/// 엔드포인트, API 키 환경변수, 기본 모델만 다릅니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Hugging Face Inference Providers 라우터
    #[value(name = "huggingface")]
    HuggingFace,
    /// Groq Cloud
    Groq,
}

impl Provider {
    /// chat completions 엔드포인트
    pub fn endpoint(&self) -> &'static str {
        match self {
            Provider::HuggingFace => "https://router.huggingface.co/v1/chat/completions",
            Provider::Groq => "https://api.groq.com/openai/v1/chat/completions",
        }
    }

    /// API 키를 읽을 환경변수 이름
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Provider::HuggingFace => "HUGGINGFACE_API_KEY",
            Provider::Groq => "GROQ_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::HuggingFace => "meta-llama/Meta-Llama-3-8B-Instruct",
            Provider::Groq => "llama-3.1-8b-instant",
        }
    }

    pub fn default_max_tokens(&self) -> u32 {
        match self {
            Provider::HuggingFace => 600,
            Provider::Groq => 1024,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::HuggingFace => "huggingface",
            Provider::Groq => "groq",
        }
    }
}

// ============================================================================
// RagConfig
// ============================================================================

/// 런타임 설정 (CLI 인자 + 환경변수)
#[derive(Debug, Clone, Args)]
pub struct RagConfig {
    /// 데이터 디렉토리 (기본: ~/.article-rag)
    #[arg(long, global = true, env = "ARTICLE_RAG_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// 1단계 임베딩 검색 개수
    #[arg(long, global = true, default_value_t = DEFAULT_N_RESULTS)]
    pub n_results: usize,

    /// 리랭크 후 사용할 문서 개수
    #[arg(long, global = true, default_value_t = DEFAULT_N_RERANK)]
    pub n_rerank: usize,

    /// LLM 프로바이더
    #[arg(long, global = true, value_enum, env = "LLM_PROVIDER", default_value = "huggingface")]
    pub provider: Provider,

    /// 모델 이름 (미지정 시 프로바이더 기본값)
    #[arg(long, global = true, env = "LLM_MODEL")]
    pub model: Option<String>,

    /// 샘플링 온도
    #[arg(long, global = true, default_value_t = 0.7)]
    pub temperature: f32,

    /// 최대 생성 토큰 수 (미지정 시 프로바이더 기본값)
    #[arg(long, global = true)]
    pub max_tokens: Option<u32>,

    /// Cross-encoder 리랭커 주소 (TEI 호환 /rerank)
    #[arg(long, global = true, env = "RERANKER_URL", default_value = DEFAULT_RERANKER_URL)]
    pub reranker_url: String,

    /// 시스템 프롬프트 파일 (미지정 시 내장 프롬프트)
    #[arg(long, global = true, env = "ARTICLE_RAG_SYSTEM_PROMPT")]
    pub system_prompt_file: Option<PathBuf>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            n_results: DEFAULT_N_RESULTS,
            n_rerank: DEFAULT_N_RERANK,
            provider: Provider::HuggingFace,
            model: None,
            temperature: 0.7,
            max_tokens: None,
            reranker_url: DEFAULT_RERANKER_URL.to_string(),
            system_prompt_file: None,
        }
    }
}

impl RagConfig {
    /// 실제 사용할 데이터 디렉토리
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(get_data_dir)
    }

    /// 실제 사용할 모델 이름
    pub fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
            .unwrap_or_else(|| self.provider.default_max_tokens())
    }

    /// 시스템 프롬프트 로드
    pub fn system_prompt(&self) -> Result<String> {
        match &self.system_prompt_file {
            Some(path) => read_prompt_file(path),
            None => Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

fn read_prompt_file(path: &Path) -> Result<String> {
    let prompt = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read system prompt file {}", path.display()))?;
    let prompt = prompt.trim();
    if prompt.is_empty() {
        anyhow::bail!("System prompt file {} is empty", path.display());
    }
    Ok(prompt.to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RagConfig::default();
        assert_eq!(config.n_results, 10);
        assert_eq!(config.n_rerank, 3);
        assert_eq!(config.model(), "meta-llama/Meta-Llama-3-8B-Instruct");
        assert_eq!(config.max_tokens(), 600);
        assert!(config.data_dir().ends_with(".article-rag"));
    }

    #[test]
    fn test_provider_overrides() {
        let config = RagConfig {
            provider: Provider::Groq,
            model: Some("custom-model".to_string()),
            ..Default::default()
        };
        assert_eq!(config.model(), "custom-model");
        assert_eq!(config.max_tokens(), 1024);
        assert_eq!(config.provider.api_key_env(), "GROQ_API_KEY");
    }

    #[test]
    fn test_system_prompt_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("prompt.txt");
        std::fs::write(&path, "  Answer briefly.\n").unwrap();

        let config = RagConfig {
            system_prompt_file: Some(path),
            ..Default::default()
        };
        assert_eq!(config.system_prompt().unwrap(), "Answer briefly.");
    }

    #[test]
    fn test_system_prompt_empty_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.txt");
        std::fs::write(&path, "\n").unwrap();

        let config = RagConfig {
            system_prompt_file: Some(path),
            ..Default::default()
        };
        assert!(config.system_prompt().is_err());
    }

    #[test]
    fn test_default_prompt() {
        let prompt = RagConfig::default().system_prompt().unwrap();
        assert!(prompt.contains("\"Context:\""));
    }
}
