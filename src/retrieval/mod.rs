//! 2단계 검색 파이프라인
//!
//! 1. 임베딩 인덱스에서 `n_results`개 최근접 문서 조회
//! 2. 배치 내 최대 거리 기준으로 거리 → 유사도(0~100) 변환
//! 3. Cross-encoder로 (query, document) 쌍 재점수
//! 4. 점수 내림차순 정렬 (동점은 원래 검색 순위), 상위 `n_rerank`개 반환
//!
//! 파이프라인은 대화 상태를 갖지 않으며, 협력자 에러는 재시도 없이 그대로 올려보냅니다.

mod context;

use std::sync::Arc;

use serde::Serialize;

use crate::error::RagError;
use crate::knowledge::{EmbeddingIndex, Metadata};
use crate::rerank::{normalize_scores, CrossEncoder};

pub use context::format_documents;

// ============================================================================
// Types
// ============================================================================

/// 리랭크된 검색 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    /// 음수 보정된 cross-encoder 점수 (높을수록 관련)
    pub relevance: f32,
    pub metadata: Metadata,
    pub document: String,
    /// 배치 상대 유사도 (0~100)
    pub similarity: f32,
    /// 1단계 검색 순위 (0부터, 동점 처리 키)
    pub retrieval_rank: usize,
}

/// 거리 배치를 유사도(0~100)로 변환
///
/// `100 * (1 - d / max_d)`로 계산하므로 배치에서 가장 먼 문서는 항상 0입니다.
/// 모든 거리가 0이면(완전 일치) 모두 100으로 둡니다.
pub fn normalize_distances(distances: &[f32]) -> Vec<f32> {
    if distances.is_empty() {
        return vec![];
    }

    let max_distance = distances.iter().copied().fold(0.0_f32, f32::max);
    if max_distance <= 0.0 {
        return vec![100.0; distances.len()];
    }

    distances
        .iter()
        .map(|d| (100.0 * (1.0 - d / max_distance)).clamp(0.0, 100.0))
        .collect()
}

// ============================================================================
// RetrievalPipeline
// ============================================================================

/// 임베딩 검색 + cross-encoder 리랭크 파이프라인
#[derive(Clone)]
pub struct RetrievalPipeline {
    index: Arc<dyn EmbeddingIndex>,
    scorer: Arc<dyn CrossEncoder>,
}

impl RetrievalPipeline {
    pub fn new(index: Arc<dyn EmbeddingIndex>, scorer: Arc<dyn CrossEncoder>) -> Self {
        Self { index, scorer }
    }

    /// 질의에 대한 상위 문서 검색
    ///
    /// # Arguments
    /// * `query` - 사용자 질문
    /// * `n_results` - 1단계 후보 수 (1 이상)
    /// * `n_rerank` - 최종 반환 수
    ///
    /// # Returns
    /// 관련도 내림차순, 길이 ≤ min(n_results, n_rerank)
    pub async fn search(
        &self,
        query: &str,
        n_results: usize,
        n_rerank: usize,
    ) -> Result<Vec<RankedResult>, RagError> {
        if n_results == 0 {
            return Err(RagError::InvalidQuery(
                "n_results must be at least 1".to_string(),
            ));
        }

        let response = self
            .index
            .query(query, n_results)
            .await
            .map_err(RagError::Retrieval)?;
        response.validate().map_err(RagError::Retrieval)?;

        if response.is_empty() {
            tracing::debug!("No documents retrieved for {:?}", query);
            return Ok(vec![]);
        }
        if n_rerank == 0 {
            return Ok(vec![]);
        }

        let similarities = normalize_distances(&response.distances);

        let pairs: Vec<(String, String)> = response
            .documents
            .iter()
            .map(|doc| (query.to_string(), doc.clone()))
            .collect();

        let raw_scores = self
            .scorer
            .predict(&pairs)
            .await
            .map_err(RagError::Scoring)?;
        if raw_scores.len() != pairs.len() {
            return Err(RagError::Scoring(anyhow::anyhow!(
                "{} returned {} scores for {} pairs",
                self.scorer.name(),
                raw_scores.len(),
                pairs.len()
            )));
        }
        let scores = normalize_scores(&raw_scores);

        let mut ranked: Vec<RankedResult> = scores
            .into_iter()
            .zip(response.metadatas)
            .zip(response.documents)
            .zip(similarities)
            .enumerate()
            .map(
                |(rank, (((relevance, metadata), document), similarity))| RankedResult {
                    relevance,
                    metadata,
                    document,
                    similarity,
                    retrieval_rank: rank,
                },
            )
            .collect();

        ranked.sort_by(|a, b| {
            b.relevance
                .total_cmp(&a.relevance)
                .then(a.retrieval_rank.cmp(&b.retrieval_rank))
        });
        ranked.truncate(n_rerank.min(n_results));

        tracing::debug!(
            "Reranked {} candidates, kept {}",
            pairs.len(),
            ranked.len()
        );
        Ok(ranked)
    }
}

// ============================================================================
// Tests
// ============================================================================
