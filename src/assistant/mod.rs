//! Assistant - 검색 → 컨텍스트 → 답변 생성 오케스트레이션
//!
//! 검색/스코어링 실패는 호출자에게 그대로 전달하고,
//! 생성 실패만 로그를 남긴 뒤 사용자에게 보여줄 에러 문자열로 바꿉니다.

use std::sync::Arc;

use serde::Serialize;

use crate::error::RagError;
use crate::generation::{AnswerGenerator, GenerationRequest};
use crate::retrieval::{format_documents, RankedResult, RetrievalPipeline};

/// 질문 하나에 대한 답변
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RankedResult>,
    /// 생성 실패로 `text`가 에러 메시지인 경우
    pub generation_failed: bool,
}

/// RAG 어시스턴트
pub struct Assistant {
    pipeline: RetrievalPipeline,
    generator: Arc<dyn AnswerGenerator>,
    n_results: usize,
    n_rerank: usize,
}

impl Assistant {
    pub fn new(
        pipeline: RetrievalPipeline,
        generator: Arc<dyn AnswerGenerator>,
        n_results: usize,
        n_rerank: usize,
    ) -> Self {
        Self {
            pipeline,
            generator,
            n_results,
            n_rerank,
        }
    }

    /// 검색만 수행
    pub async fn retrieve(&self, question: &str) -> Result<Vec<RankedResult>, RagError> {
        self.pipeline
            .search(question, self.n_results, self.n_rerank)
            .await
    }

    /// 답변 생성 (blocking 모드)
    pub async fn answer(&self, question: &str, system_prompt: &str) -> Result<Answer, RagError> {
        let sources = self.retrieve(question).await?;
        let context = format_documents(&sources);
        let request = GenerationRequest {
            system_prompt,
            context: &context,
            question,
        };

        let result = self.generator.generate(&request).await;
        Ok(self.finish(result, sources))
    }

    /// 답변 생성 (streaming 모드)
    ///
    /// 조각은 도착 순서대로 `on_chunk`에 전달됩니다. 생성이 실패하면
    /// 에러 문자열도 한 조각으로 전달해서 화면에 보이게 합니다.
    pub async fn answer_streaming(
        &self,
        question: &str,
        system_prompt: &str,
        on_chunk: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> Result<Answer, RagError> {
        let sources = self.retrieve(question).await?;
        let context = format_documents(&sources);
        let request = GenerationRequest {
            system_prompt,
            context: &context,
            question,
        };

        let result = self.generator.generate_stream(&request, on_chunk).await;
        let answer = self.finish(result, sources);
        if answer.generation_failed {
            on_chunk(&answer.text);
        }
        Ok(answer)
    }

    fn finish(&self, result: anyhow::Result<String>, sources: Vec<RankedResult>) -> Answer {
        match result {
            Ok(text) => Answer {
                text,
                sources,
                generation_failed: false,
            },
            Err(e) => {
                let text = generation_error_message(&e);
                tracing::error!(
                    generator = self.generator.name(),
                    "{}",
                    RagError::Generation(e)
                );
                Answer {
                    text,
                    sources,
                    generation_failed: true,
                }
            }
        }
    }
}

/// 사용자에게 보여줄 생성 실패 메시지
fn generation_error_message(err: &anyhow::Error) -> String {
    format!("Error generating response: {:#}", err)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{EmbeddingIndex, Metadata, QueryResponse};
    use crate::rerank::CrossEncoder;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct TwoDocIndex;

    #[async_trait]
    impl EmbeddingIndex for TwoDocIndex {
        async fn query(&self, _query_text: &str, _n_results: usize) -> Result<QueryResponse> {
            Ok(QueryResponse {
                metadatas: vec![
                    Metadata {
                        title: "Brain Myths".into(),
                        url: "https://example.com/brain-1".into(),
                    },
                    Metadata {
                        title: "Ocean Facts".into(),
                        url: "https://example.com/ocean-2".into(),
                    },
                ],
                documents: vec!["We use all of our brain.".into(), "Oceans are deep.".into()],
                distances: vec![0.3, 0.9],
            })
        }

        async fn count(&self) -> Result<usize> {
            Ok(2)
        }
    }

    struct FailingIndex;

    #[async_trait]
    impl EmbeddingIndex for FailingIndex {
        async fn query(&self, _query_text: &str, _n_results: usize) -> Result<QueryResponse> {
            anyhow::bail!("connection refused")
        }

        async fn count(&self) -> Result<usize> {
            Ok(0)
        }
    }

    struct LengthScorer;

    #[async_trait]
    impl CrossEncoder for LengthScorer {
        async fn predict(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
            Ok(pairs.iter().map(|(_, d)| d.len() as f32).collect())
        }

        fn name(&self) -> &str {
            "length"
        }
    }

    /// 받은 요청을 기록하고 컨텍스트를 되돌려주는 생성기
    #[derive(Default)]
    struct EchoGenerator {
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl AnswerGenerator for EchoGenerator {
        async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
            self.seen
                .lock()
                .unwrap()
                .push((request.system_prompt.to_string(), request.user_prompt()));
            Ok(format!("answer to {}", request.question))
        }

        async fn generate_stream(
            &self,
            request: &GenerationRequest<'_>,
            on_chunk: &mut (dyn for<'s> FnMut(&'s str) + Send),
        ) -> Result<String> {
            let parts = ["answer ", "to ", request.question];
            for part in parts {
                on_chunk(part);
            }
            Ok(parts.concat())
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct BrokenGenerator;

    #[async_trait]
    impl AnswerGenerator for BrokenGenerator {
        async fn generate(&self, _request: &GenerationRequest<'_>) -> Result<String> {
            anyhow::bail!("503 Service Unavailable")
        }

        async fn generate_stream(
            &self,
            _request: &GenerationRequest<'_>,
            on_chunk: &mut (dyn for<'s> FnMut(&'s str) + Send),
        ) -> Result<String> {
            on_chunk("partial");
            anyhow::bail!("stream reset")
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn assistant(
        index: Arc<dyn EmbeddingIndex>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Assistant {
        let pipeline = RetrievalPipeline::new(index, Arc::new(LengthScorer));
        Assistant::new(pipeline, generator, 10, 1)
    }

    #[tokio::test]
    async fn test_answer_passes_prompt_and_context() {
        let generator = Arc::new(EchoGenerator::default());
        let a = assistant(Arc::new(TwoDocIndex), generator.clone());

        let answer = a.answer("brain?", "Be brief.").await.unwrap();
        assert_eq!(answer.text, "answer to brain?");
        assert!(!answer.generation_failed);
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].metadata.title, "Brain Myths");

        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen[0].0, "Be brief.");
        assert!(seen[0].1.starts_with("Context: Title: Brain Myths\n"));
        assert!(seen[0].1.ends_with("Question: brain?"));
        assert!(!seen[0].1.contains("Ocean Facts"));
    }

    #[tokio::test]
    async fn test_answer_streaming_delivers_chunks_in_order() {
        let a = assistant(Arc::new(TwoDocIndex), Arc::new(EchoGenerator::default()));

        let mut chunks = Vec::new();
        let answer = a
            .answer_streaming("q", "p", &mut |c: &str| chunks.push(c.to_string()))
            .await
            .unwrap();

        assert_eq!(chunks, vec!["answer ", "to ", "q"]);
        assert_eq!(answer.text, chunks.concat());
    }

    #[tokio::test]
    async fn test_generation_failure_is_masked() {
        let a = assistant(Arc::new(TwoDocIndex), Arc::new(BrokenGenerator));

        let answer = a.answer("q", "p").await.unwrap();
        assert!(answer.generation_failed);
        assert!(answer.text.starts_with("Error generating response: "));
        assert!(answer.text.contains("503 Service Unavailable"));
        assert_eq!(answer.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_streaming_failure_emits_error_chunk() {
        let a = assistant(Arc::new(TwoDocIndex), Arc::new(BrokenGenerator));

        let mut chunks = Vec::new();
        let answer = a
            .answer_streaming("q", "p", &mut |c: &str| chunks.push(c.to_string()))
            .await
            .unwrap();

        assert!(answer.generation_failed);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].contains("stream reset"));
    }

    #[test]
    fn test_generation_error_message_keeps_cause_chain() {
        let err = anyhow::anyhow!("timed out").context("Failed to reach groq");
        assert_eq!(
            generation_error_message(&err),
            "Error generating response: Failed to reach groq: timed out"
        );
    }

    #[tokio::test]
    async fn test_retrieval_failure_propagates() {
        let a = assistant(Arc::new(FailingIndex), Arc::new(EchoGenerator::default()));
        assert!(matches!(
            a.answer("q", "p").await,
            Err(RagError::Retrieval(_))
        ));
    }
}
