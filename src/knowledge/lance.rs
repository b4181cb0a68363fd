//! LanceDB Embedding Records
//!
//! 문서 ID, 벡터, 메타데이터(title, url)를 한 테이블에 저장하고
//! ANN 검색으로 원시 거리(`_distance`, L2)를 돌려줍니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::index::Metadata;

/// 벡터 테이블 이름
const TABLE_NAME: &str = "embeddings";

// ============================================================================
// Types
// ============================================================================

/// 임베딩 레코드 (문서와 1:1)
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub doc_id: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

/// ANN 검색 결과 한 건
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub doc_id: String,
    pub metadata: Metadata,
    pub distance: f32,
}

// ============================================================================
// LanceIndex
// ============================================================================

/// LanceDB 임베딩 레코드 저장소
pub struct LanceIndex {
    db: Connection,
    dimension: i32,
}

impl LanceIndex {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원 (임베더와 일치해야 함)
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        let dimension = i32::try_from(dimension).context("Embedding dimension out of range")?;

        Ok(Self { db, dimension })
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("url", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    /// 레코드들을 Arrow RecordBatch로 변환
    fn records_to_batch(&self, records: &[EmbeddingRecord]) -> Result<RecordBatch> {
        if records.is_empty() {
            anyhow::bail!("Cannot create batch from empty records");
        }

        if let Some(bad) = records
            .iter()
            .find(|r| r.embedding.len() != self.dimension as usize)
        {
            anyhow::bail!(
                "Embedding for {} has {} dimensions, expected {}",
                bad.doc_id,
                bad.embedding.len(),
                self.dimension
            );
        }

        let ids: Vec<&str> = records.iter().map(|r| r.doc_id.as_str()).collect();
        let titles: Vec<&str> = records.iter().map(|r| r.metadata.title.as_str()).collect();
        let urls: Vec<&str> = records.iter().map(|r| r.metadata.url.as_str()).collect();

        let embeddings_flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(self.schema()),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(titles)),
                Arc::new(StringArray::from(urls)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    async fn table_exists(&self) -> Result<bool> {
        has_table(self.db.table_names().execute().await)
    }

    async fn open_table(&self) -> Result<Option<lancedb::table::Table>> {
        if !self.table_exists().await? {
            return Ok(None);
        }
        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open embeddings table")?;
        Ok(Some(table))
    }

    /// 레코드 배치 삽입 (테이블이 없으면 생성)
    pub async fn insert_batch(&self, records: &[EmbeddingRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let batch = self.records_to_batch(records)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.open_table().await? {
            Some(table) => {
                table
                    .add(batches)
                    .execute()
                    .await
                    .context("Failed to add embeddings to table")?;
            }
            None => {
                self.db
                    .create_table(TABLE_NAME, batches)
                    .execute()
                    .await
                    .context("Failed to create embeddings table")?;
            }
        }

        Ok(records.len())
    }

    /// 최근접 검색 (가까운 순)
    pub async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<IndexHit>> {
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };

        let results = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = results.try_collect().await?;

        let mut hits = Vec::new();
        for batch in batches {
            let ids = string_column(&batch, "id")?;
            let titles = string_column(&batch, "title")?;
            let urls = string_column(&batch, "url")?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                hits.push(IndexHit {
                    doc_id: ids.value(i).to_string(),
                    metadata: Metadata {
                        title: titles.value(i).to_string(),
                        url: urls.value(i).to_string(),
                    },
                    distance: distances.value(i),
                });
            }
        }

        // 배치 경계를 넘어서도 가까운 순서 보장
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit);
        Ok(hits)
    }

    /// 특정 문서의 임베딩 존재 여부
    pub async fn contains(&self, doc_id: &str) -> Result<bool> {
        let Some(table) = self.open_table().await? else {
            return Ok(false);
        };

        let count = table
            .count_rows(Some(id_filter(doc_id)?))
            .await
            .context("Failed to count rows for id")?;
        Ok(count > 0)
    }

    /// 레코드 수
    pub async fn count(&self) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };
        table.count_rows(None).await.context("Failed to count rows")
    }

    /// 전체 삭제 (코퍼스 재구축용)
    pub async fn clear(&self) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };
        let before = table.count_rows(None).await.context("Failed to count rows")?;
        table
            .delete("id IS NOT NULL")
            .await
            .context("Failed to delete embeddings")?;
        Ok(before)
    }
}

/// 테이블 목록 조회 결과에서 임베딩 테이블 존재 여부 판단
///
/// 목록 조회 실패는 "테이블 없음"이 아니라 에러로 올려보냅니다.
fn has_table<E>(names: std::result::Result<Vec<String>, E>) -> Result<bool>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let names = names.context("Failed to list LanceDB tables")?;
    Ok(names.iter().any(|n| n == TABLE_NAME))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

/// 문서 ID 필터 (ID는 SHA-256 hex만 허용 - 필터 인젝션 방지)
fn id_filter(doc_id: &str) -> Result<String> {
    if doc_id.is_empty() || !doc_id.chars().all(|c| c.is_ascii_hexdigit()) {
        anyhow::bail!("Invalid document id: {}", doc_id);
    }
    Ok(format!("id = '{}'", doc_id))
}

// ============================================================================
// Tests
// ============================================================================
