//! Embedding Index - 1단계 최근접 검색 인터페이스
//!
//! 질의 문자열을 받아 가장 가까운 문서 k개를 메타데이터, 본문, 거리와 함께
//! 반환합니다. 세 목록은 같은 인덱스끼리 한 문서를 가리킵니다.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 문서 메타데이터 (임베딩 레코드와 함께 저장)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    pub url: String,
}

/// 임베딩 인덱스 조회 결과 (병렬 목록)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    pub metadatas: Vec<Metadata>,
    pub documents: Vec<String>,
    /// 원시 거리 (작을수록 가까움)
    pub distances: Vec<f32>,
}

impl QueryResponse {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// 세 목록의 길이가 같은지 확인
    pub fn validate(&self) -> Result<()> {
        let n = self.documents.len();
        if self.metadatas.len() != n || self.distances.len() != n {
            anyhow::bail!(
                "Misaligned index response: {} metadatas, {} documents, {} distances",
                self.metadatas.len(),
                n,
                self.distances.len()
            );
        }
        Ok(())
    }
}

/// 임베딩 인덱스 트레이트
#[async_trait]
pub trait EmbeddingIndex: Send + Sync {
    /// 질의와 가장 가까운 문서 `n_results`개 조회 (가까운 순)
    async fn query(&self, query_text: &str, n_results: usize) -> Result<QueryResponse>;

    /// 인덱스에 저장된 레코드 수
    async fn count(&self) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_aligned() {
        let response = QueryResponse {
            metadatas: vec![Metadata {
                title: "A".into(),
                url: "https://example.com/a".into(),
            }],
            documents: vec!["alpha".into()],
            distances: vec![0.4],
        };
        assert!(response.validate().is_ok());
        assert_eq!(response.len(), 1);
    }

    #[test]
    fn test_validate_misaligned() {
        let response = QueryResponse {
            metadatas: vec![],
            documents: vec!["alpha".into()],
            distances: vec![0.4],
        };
        assert!(response.validate().is_err());
        assert!(QueryResponse::default().is_empty());
    }
}
