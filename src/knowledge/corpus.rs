//! Corpus - 문서 저장소 + 임베딩 인덱스 결합
//!
//! SQLite(문서 원문)와 LanceDB(임베딩 레코드)를 URL 해시 ID로 묶고,
//! 검색 파이프라인이 쓰는 `EmbeddingIndex`를 구현합니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::embedding::EmbeddingProvider;

use super::index::{EmbeddingIndex, Metadata, QueryResponse};
use super::lance::{EmbeddingRecord, LanceIndex};
use super::store::{DocumentStore, NewDocument};

/// 문서 원문 SQLite 파일 이름
pub const DOCUMENTS_DB: &str = "documents.db";

/// 임베딩 LanceDB 디렉토리 이름
pub const EMBEDDINGS_DIR: &str = "embeddings.lance";

/// 코퍼스 통계
#[derive(Debug, Clone, Serialize)]
pub struct CorpusStats {
    pub document_count: usize,
    pub embedding_count: usize,
    pub total_content_bytes: usize,
    pub data_dir: PathBuf,
}

/// 기사 코퍼스
pub struct Corpus {
    store: DocumentStore,
    index: LanceIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    data_dir: PathBuf,
}

impl Corpus {
    /// 데이터 디렉토리에서 코퍼스 열기
    pub async fn open(data_dir: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;
        }

        let store = DocumentStore::open(&data_dir.join(DOCUMENTS_DB))
            .context("Failed to open document store")?;

        let index = LanceIndex::open(&data_dir.join(EMBEDDINGS_DIR), embedder.dimension())
            .await
            .context("Failed to open embedding index")?;

        Ok(Self {
            store,
            index,
            embedder,
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// 문서 추가 (자동 임베딩)
    ///
    /// 이미 저장된 문서(같은 URL)는 건너뛰고 `false`를 반환합니다.
    pub async fn add_document(&self, doc: NewDocument) -> Result<bool> {
        let id = doc.id();

        if self.index.contains(&id).await? {
            tracing::debug!("Skipping existing document: {}", doc.url);
            return Ok(false);
        }

        let embedding = self
            .embedder
            .embed_document(&doc.title, &doc.content)
            .await
            .with_context(|| format!("Failed to embed {}", doc.url))?;

        // 문서를 먼저 저장해야 벡터 검색 결과가 본문 없이 남지 않음
        self.store
            .insert(&doc)
            .context("Failed to add document to store")?;

        let record = EmbeddingRecord {
            doc_id: id.clone(),
            embedding,
            metadata: Metadata {
                title: doc.title.clone(),
                url: doc.url.clone(),
            },
        };
        self.index
            .insert_batch(&[record])
            .await
            .context("Failed to insert embedding")?;

        tracing::info!("Added document: {} (id={})", doc.url, &id[..12]);
        Ok(true)
    }

    /// 코퍼스 전체 삭제
    pub async fn clear(&self) -> Result<()> {
        let vectors = self.index.clear().await?;
        let documents = self.store.clear()?;
        tracing::info!(
            "Cleared corpus ({} documents, {} embeddings)",
            documents,
            vectors
        );
        Ok(())
    }

    /// 코퍼스 통계
    pub async fn stats(&self) -> Result<CorpusStats> {
        let store_stats = self.store.stats()?;
        let embedding_count = self.index.count().await?;

        Ok(CorpusStats {
            document_count: store_stats.document_count,
            embedding_count,
            total_content_bytes: store_stats.total_content_bytes,
            data_dir: self.data_dir.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingIndex for Corpus {
    async fn query(&self, query_text: &str, n_results: usize) -> Result<QueryResponse> {
        let query_embedding = self
            .embedder
            .embed_query(query_text)
            .await
            .context("Failed to embed query")?;

        let hits = self.index.search(&query_embedding, n_results).await?;
        if hits.is_empty() {
            return Ok(QueryResponse::default());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.doc_id.clone()).collect();
        let mut documents = self.store.get_many(&ids)?;

        let mut response = QueryResponse::default();
        for hit in hits {
            let Some(doc) = documents.remove(&hit.doc_id) else {
                tracing::warn!("Embedding without document: {}", hit.metadata.url);
                continue;
            };
            response.metadatas.push(hit.metadata);
            response.documents.push(doc.content);
            response.distances.push(hit.distance);
        }

        tracing::debug!(
            "Index returned {} documents for {:?}",
            response.len(),
            query_text
        );
        Ok(response)
    }

    async fn count(&self) -> Result<usize> {
        self.index.count().await
    }
}

// ============================================================================
// Tests
// ============================================================================
