//! Knowledge 모듈 - 기사 코퍼스 저장소
//!
//! - SQLite: 문서 원문 (제목, 본문, URL)
//! - LanceDB: 임베딩 레코드 (ANN 검색)
//! - Corpus: 두 저장소를 묶어 `EmbeddingIndex` 제공

mod corpus;
mod index;
mod lance;
mod store;

// Re-exports
pub use corpus::{Corpus, CorpusStats, DOCUMENTS_DB, EMBEDDINGS_DIR};
pub use index::{EmbeddingIndex, Metadata, QueryResponse};
pub use lance::{EmbeddingRecord, IndexHit, LanceIndex};
pub use store::{document_id, Document, DocumentStore, NewDocument, StoreStats};
