//! 파이프라인 에러 타입
//!
//! 인프라 계층(임베딩, 저장소, HTTP 클라이언트)은 `anyhow::Result`를 그대로 쓰고,
//! 검색/생성 경계에서만 아래 분류로 감싸서 호출자가 구분할 수 있게 합니다.

use thiserror::Error;

/// RAG 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 잘못된 검색 인자 (예: n_results == 0)
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// 임베딩 인덱스 조회 실패
    #[error("retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),

    /// Cross-encoder 스코어링 실패
    #[error("scoring failed: {0:#}")]
    Scoring(anyhow::Error),

    /// LLM 응답 생성 실패
    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),
}

impl RagError {
    /// HTTP 응답 등에서 쓰는 짧은 분류 이름
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::InvalidQuery(_) => "invalid_query",
            RagError::Retrieval(_) => "retrieval",
            RagError::Scoring(_) => "scoring",
            RagError::Generation(_) => "generation",
        }
    }
}
