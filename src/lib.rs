//! article-rag - 기사 코퍼스 기반 RAG 질의응답
//!
//! 임베딩 검색 → cross-encoder 리랭크 → 컨텍스트 구성 → LLM 답변 생성.
//! 코퍼스는 SQLite(원문)와 LanceDB(임베딩)에 저장됩니다.

pub mod assistant;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod knowledge;
pub mod rerank;
pub mod retrieval;
pub mod server;
pub mod session;

// Re-exports
pub use assistant::{Answer, Assistant};
pub use config::{get_data_dir, Provider, RagConfig};
pub use crawler::{ArticleCrawler, CrawlConfig, CrawlStats};
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding};
pub use error::RagError;
pub use generation::{AnswerGenerator, ChatCompletionsGenerator, GenerationRequest};
pub use knowledge::{Corpus, CorpusStats, Document, DocumentStore, EmbeddingIndex, NewDocument};
pub use rerank::{normalize_scores, CrossEncoder, TeiCrossEncoder};
pub use retrieval::{format_documents, normalize_distances, RankedResult, RetrievalPipeline};
pub use session::{Role, SessionStore, Turn};
