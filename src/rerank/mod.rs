//! Cross-Encoder 리랭킹 모듈
//!
//! (query, document) 쌍마다 관련도 점수를 매기는 외부 cross-encoder를 호출합니다.
//! 기본 구현은 Text Embeddings Inference(TEI) 호환 `/rerank` 엔드포인트에
//! `cross-encoder/ms-marco-MiniLM-L-6-v2` 같은 모델을 올려 두고 사용합니다.
//! ref: https://huggingface.github.io/text-embeddings-inference/

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// CrossEncoder Trait
// ============================================================================

/// Cross-encoder 스코어러
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// 쌍마다 원시 관련도 점수 하나 (입력과 같은 순서)
    async fn predict(&self, pairs: &[(String, String)]) -> Result<Vec<f32>>;

    /// 스코어러 이름
    fn name(&self) -> &str;
}

/// 점수 배치를 음수가 없도록 평행 이동
///
/// 최솟값이 음수면 모든 점수에서 최솟값을 뺍니다. 순서는 바뀌지 않습니다.
pub fn normalize_scores(scores: &[f32]) -> Vec<f32> {
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    if min < 0.0 {
        scores.iter().map(|s| s - min).collect()
    } else {
        scores.to_vec()
    }
}

// ============================================================================
// TEI Reranker
// ============================================================================

/// TEI 호환 `/rerank` 클라이언트
#[derive(Debug)]
pub struct TeiCrossEncoder {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: Vec<&'a str>,
    raw_scores: bool,
    truncate: bool,
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

impl TeiCrossEncoder {
    /// 새 클라이언트 생성
    ///
    /// # Arguments
    /// * `base_url` - 리랭커 서버 주소 (예: http://127.0.0.1:8081)
    /// * `api_key` - Bearer 토큰 (선택)
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let base = url::Url::parse(base_url)
            .with_context(|| format!("Invalid reranker URL: {}", base_url))?;
        let endpoint = base
            .join("rerank")
            .context("Failed to build rerank endpoint")?
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    /// 환경변수 `RERANKER_API_KEY`를 토큰으로 사용
    pub fn from_env(base_url: &str) -> Result<Self> {
        Self::new(base_url, std::env::var("RERANKER_API_KEY").ok())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 같은 질의에 대한 문서 목록 점수 요청
    async fn rerank(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>> {
        let request = RerankRequest {
            query,
            texts: texts.to_vec(),
            raw_scores: true,
            truncate: true,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("Failed to send rerank request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read rerank response")?;

        if !status.is_success() {
            anyhow::bail!("Reranker error ({}): {}", status, body);
        }

        let hits: Vec<RerankHit> =
            serde_json::from_str(&body).context("Failed to parse rerank response")?;
        align_hits(hits, texts.len())
    }
}

/// `{index, score}` 목록을 입력 순서의 점수 벡터로 재배열
fn align_hits(hits: Vec<RerankHit>, expected: usize) -> Result<Vec<f32>> {
    let mut scores: Vec<Option<f32>> = vec![None; expected];
    for hit in hits {
        let slot = scores
            .get_mut(hit.index)
            .ok_or_else(|| anyhow::anyhow!("Rerank index {} out of range", hit.index))?;
        *slot = Some(hit.score);
    }

    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| anyhow::anyhow!("Reranker returned no score for text {}", i)))
        .collect()
}

#[async_trait]
impl CrossEncoder for TeiCrossEncoder {
    async fn predict(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        if pairs.is_empty() {
            return Ok(vec![]);
        }

        // 질의별로 묶어서 요청 (보통은 질의 하나)
        let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (i, (query, _)) in pairs.iter().enumerate() {
            let slot = *positions.entry(query.as_str()).or_insert_with(|| {
                groups.push((query.as_str(), Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(i);
        }

        let mut scores = vec![0.0; pairs.len()];
        for (query, members) in groups {
            let texts: Vec<&str> = members.iter().map(|&i| pairs[i].1.as_str()).collect();
            let group_scores = self.rerank(query, &texts).await?;
            for (&i, score) in members.iter().zip(group_scores) {
                scores[i] = score;
            }
        }

        tracing::debug!("Scored {} pairs via {}", pairs.len(), self.endpoint);
        Ok(scores)
    }

    fn name(&self) -> &str {
        "tei-rerank"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_shifts_negative_batch() {
        let scores = normalize_scores(&[-2.0, 1.5, -0.5]);
        assert_eq!(scores, vec![0.0, 3.5, 1.5]);
        assert!(scores.iter().all(|s| *s >= 0.0));
    }

    #[test]
    fn test_normalize_keeps_nonnegative_batch() {
        assert_eq!(normalize_scores(&[0.0, 2.0, 1.0]), vec![0.0, 2.0, 1.0]);
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_preserves_order() {
        let raw = [-3.2, 4.1, 0.3, -7.9];
        let shifted = normalize_scores(&raw);
        for i in 0..raw.len() {
            for j in 0..raw.len() {
                assert_eq!(raw[i] < raw[j], shifted[i] < shifted[j]);
            }
        }
    }

    #[test]
    fn test_align_hits_reorders_by_index() {
        let hits = vec![
            RerankHit { index: 2, score: 0.9 },
            RerankHit { index: 0, score: -1.0 },
            RerankHit { index: 1, score: 0.1 },
        ];
        assert_eq!(align_hits(hits, 3).unwrap(), vec![-1.0, 0.1, 0.9]);
    }

    #[test]
    fn test_align_hits_missing_score() {
        let hits = vec![RerankHit { index: 0, score: 0.5 }];
        assert!(align_hits(hits, 2).is_err());
    }

    #[test]
    fn test_align_hits_out_of_range() {
        let hits = vec![RerankHit { index: 5, score: 0.5 }];
        assert!(align_hits(hits, 1).is_err());
    }

    #[test]
    fn test_endpoint_join() {
        let encoder = TeiCrossEncoder::new("http://127.0.0.1:8081", None).unwrap();
        assert_eq!(encoder.endpoint(), "http://127.0.0.1:8081/rerank");
        assert!(TeiCrossEncoder::new("not a url", None).is_err());
    }

    #[test]
    fn test_request_shape() {
        let request = RerankRequest {
            query: "q",
            texts: vec!["a", "b"],
            raw_scores: true,
            truncate: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["texts"][1], "b");
        assert_eq!(json["raw_scores"], true);
    }
}
