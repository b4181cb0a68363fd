//! CLI 모듈
//!
//! article-rag CLI 명령어 정의 및 구현

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::assistant::Assistant;
use crate::config::RagConfig;
use crate::crawler::{ArticleCrawler, CrawlConfig, DEFAULT_ARTICLE_PATTERN, DEFAULT_SEED_URL};
use crate::embedding::{has_api_key, GeminiEmbedding};
use crate::generation::ChatCompletionsGenerator;
use crate::knowledge::{Corpus, DocumentStore, DOCUMENTS_DB};
use crate::rerank::TeiCrossEncoder;
use crate::retrieval::{RankedResult, RetrievalPipeline};
use crate::server::{self, AppState};
use crate::session::SessionStore;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "article-rag")]
#[command(version, about = "기사 코퍼스 기반 RAG 질의응답", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: RagConfig,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 시드 URL부터 기사를 크롤링해서 코퍼스 구축
    Crawl {
        /// 시작 URL
        #[arg(long, default_value = DEFAULT_SEED_URL)]
        seed: String,

        /// 최대 기사 수
        #[arg(short, long, default_value_t = 300)]
        max_articles: usize,

        /// 기사 URL 정규식
        #[arg(long, default_value = DEFAULT_ARTICLE_PATTERN)]
        pattern: String,

        /// 페이지 사이 대기 시간 (ms)
        #[arg(long, default_value_t = 2000)]
        delay_ms: u64,

        /// 기존 코퍼스를 비우고 다시 구축
        #[arg(long)]
        rebuild: bool,
    },

    /// 검색만 수행 (질의가 없으면 대화형)
    Search {
        /// 검색 쿼리
        query: Option<String>,
    },

    /// 질문에 답변 (스트리밍 출력)
    Ask {
        /// 질문
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },

    /// 대화형 질의응답
    Chat,

    /// 저장된 기사 제목 목록
    Titles,

    /// 상태 확인
    Status,

    /// HTTP 채팅 API 서버 실행
    Serve {
        /// 바인드 주소 (host:port)
        #[arg(long, env = "ARTICLE_RAG_BIND", default_value = "127.0.0.1:5000")]
        bind: String,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.config;
    match cli.command {
        Commands::Crawl {
            seed,
            max_articles,
            pattern,
            delay_ms,
            rebuild,
        } => {
            let crawl = CrawlConfig {
                seed_url: seed,
                max_articles,
                article_pattern: pattern,
                delay: Duration::from_millis(delay_ms),
            };
            cmd_crawl(&config, crawl, rebuild).await
        }
        Commands::Search { query } => cmd_search(&config, query).await,
        Commands::Ask { question } => cmd_ask(&config, &question.join(" ")).await,
        Commands::Chat => cmd_chat(&config).await,
        Commands::Titles => cmd_titles(&config),
        Commands::Status => cmd_status(&config).await,
        Commands::Serve { bind } => cmd_serve(&config, &bind).await,
    }
}

// ============================================================================
// Wiring
// ============================================================================

fn require_embedding_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

async fn open_corpus(config: &RagConfig) -> Result<Arc<Corpus>> {
    require_embedding_key()?;
    let embedder = GeminiEmbedding::from_env().context("GeminiEmbedding 초기화 실패")?;
    let corpus = Corpus::open(&config.data_dir(), Arc::new(embedder))
        .await
        .context("코퍼스 열기 실패")?;
    Ok(Arc::new(corpus))
}

async fn build_pipeline(config: &RagConfig) -> Result<RetrievalPipeline> {
    let corpus = open_corpus(config).await?;
    let scorer = TeiCrossEncoder::from_env(&config.reranker_url).context("리랭커 설정 오류")?;
    Ok(RetrievalPipeline::new(corpus, Arc::new(scorer)))
}

async fn build_assistant(config: &RagConfig) -> Result<Assistant> {
    let pipeline = build_pipeline(config).await?;
    let generator = ChatCompletionsGenerator::from_config(config).context("LLM 설정 오류")?;
    Ok(Assistant::new(
        pipeline,
        Arc::new(generator),
        config.n_results,
        config.n_rerank,
    ))
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 크롤 명령어 (crawl)
async fn cmd_crawl(config: &RagConfig, crawl: CrawlConfig, rebuild: bool) -> Result<()> {
    let corpus = open_corpus(config).await?;

    if rebuild {
        println!("[*] 기존 코퍼스 삭제 중...");
        corpus.clear().await.context("코퍼스 삭제 실패")?;
    }

    let crawler = ArticleCrawler::new(crawl).context("크롤러 생성 실패")?;
    println!(
        "[*] 크롤링 시작: {} (최대 {} 건)",
        crawler.config().seed_url,
        crawler.config().max_articles
    );

    let stats = crawler.crawl(&corpus).await.context("크롤링 실패")?;

    println!();
    println!("[OK] 크롤링 완료");
    println!("     방문: {} 페이지", stats.visited);
    println!("     새로 저장: {} 건", stats.stored);
    println!("     이미 존재: {} 건", stats.already_present);
    println!("     기사 아님: {} 건", stats.rejected);
    if stats.failed > 0 {
        println!("[!] 실패: {} 건", stats.failed);
    }
    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(config: &RagConfig, query: Option<String>) -> Result<()> {
    let pipeline = build_pipeline(config).await?;

    if let Some(query) = query {
        let results = pipeline
            .search(&query, config.n_results, config.n_rerank)
            .await?;
        print_search_results(&results);
        return Ok(());
    }

    println!("[*] 검색어를 입력하세요 (종료: quit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt("\n검색> ")?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.eq_ignore_ascii_case("quit") {
            break;
        }
        if query.is_empty() {
            continue;
        }

        match pipeline
            .search(query, config.n_results, config.n_rerank)
            .await
        {
            Ok(results) => print_search_results(&results),
            Err(e) => println!("[!] 검색 실패: {}", e),
        }
    }
    Ok(())
}

fn print_search_results(results: &[RankedResult]) {
    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return;
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());
    for (i, result) in results.iter().enumerate() {
        println!("Result {} - Similarity: {:.2}%", i + 1, result.similarity);
        println!("   제목: {}", result.metadata.title);
        println!("   URL: {}", result.metadata.url);
        println!("   내용: {}", truncate_text(&result.document, 200));
        println!();
    }
}

/// 질문 명령어 (ask)
async fn cmd_ask(config: &RagConfig, question: &str) -> Result<()> {
    let system_prompt = config.system_prompt()?;
    let assistant = build_assistant(config).await?;
    ask_once(&assistant, question, &system_prompt).await
}

/// 대화형 질의응답 (chat)
async fn cmd_chat(config: &RagConfig) -> Result<()> {
    let system_prompt = config.system_prompt()?;
    let assistant = build_assistant(config).await?;

    println!("[*] 질문을 입력하세요 (종료: quit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt("\n질문> ")?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.eq_ignore_ascii_case("quit") {
            break;
        }
        if question.is_empty() {
            continue;
        }

        if let Err(e) = ask_once(&assistant, question, &system_prompt).await {
            println!("[!] {:#}", e);
        }
    }
    Ok(())
}

async fn ask_once(assistant: &Assistant, question: &str, system_prompt: &str) -> Result<()> {
    println!();
    let answer = assistant
        .answer_streaming(question, system_prompt, &mut |chunk: &str| {
            print!("{}", chunk);
            let _ = std::io::stdout().flush();
        })
        .await?;
    println!("\n");

    if answer.sources.is_empty() {
        println!("[!] 참고한 기사가 없습니다.");
        return Ok(());
    }

    println!("[*] 출처:");
    let relevance = relevance_percentages(&answer.sources);
    for (i, (source, pct)) in answer.sources.iter().zip(relevance).enumerate() {
        println!(
            "  {}. {} (Relevance: {:.2}%, Similarity: {:.2}%)",
            i + 1,
            source.metadata.title,
            pct,
            source.similarity
        );
        println!("     {}", source.metadata.url);
    }
    Ok(())
}

/// 제목 목록 명령어 (titles)
fn cmd_titles(config: &RagConfig) -> Result<()> {
    let store = DocumentStore::open(&config.data_dir().join(DOCUMENTS_DB))
        .context("문서 저장소 열기 실패")?;
    let titles = store.titles().context("제목 조회 실패")?;

    if titles.is_empty() {
        println!("[!] 저장된 기사가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 기사 ({} 건):\n", titles.len());
    for title in titles {
        println!("  - {}", title);
    }
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: &RagConfig) -> Result<()> {
    println!("article-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let data_dir = config.data_dir();
    println!("[*] 데이터 디렉토리: {}", data_dir.display());
    println!(
        "[*] LLM: {} ({})",
        config.provider.name(),
        config.model()
    );
    println!("[*] 리랭커: {}", config.reranker_url);

    if has_api_key() {
        println!("[OK] 임베딩 API 키: 설정됨");
    } else {
        println!("[!] 임베딩 API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    let llm_key = config.provider.api_key_env();
    if std::env::var(llm_key).is_ok_and(|k| !k.is_empty()) {
        println!("[OK] LLM API 키: 설정됨");
    } else {
        println!("[!] LLM API 키: 미설정 ({})", llm_key);
    }

    match DocumentStore::open(&data_dir.join(DOCUMENTS_DB)) {
        Ok(store) => match store.stats() {
            Ok(stats) => {
                println!("[OK] 저장된 기사: {} 건", stats.document_count);
                println!(
                    "     총 콘텐츠: {}",
                    format_bytes(stats.total_content_bytes)
                );
            }
            Err(e) => println!("[!] 통계 조회 실패: {}", e),
        },
        Err(e) => println!("[!] 문서 저장소 열기 실패: {}", e),
    }

    // 임베딩 인덱스 상태 (API 키가 있을 때만)
    if has_api_key() {
        match open_corpus(config).await {
            Ok(corpus) => match corpus.stats().await {
                Ok(stats) => println!("[OK] 임베딩 인덱스: {} 건", stats.embedding_count),
                Err(e) => tracing::debug!("Failed to read index stats: {}", e),
            },
            Err(e) => tracing::debug!("Failed to open corpus: {}", e),
        }
    }

    Ok(())
}

/// 서버 명령어 (serve)
async fn cmd_serve(config: &RagConfig, bind: &str) -> Result<()> {
    let system_prompt = config.system_prompt()?;
    let assistant = build_assistant(config).await?;
    let state = AppState::new(assistant, SessionStore::default(), system_prompt);

    println!("[*] 채팅 API: http://{}/api/chat", bind);
    server::serve(bind, state).await
}

// ============================================================================
// Helper Functions
// ============================================================================

fn prompt(label: &str) -> Result<()> {
    print!("{}", label);
    std::io::stdout().flush().context("Failed to flush stdout")
}

/// 관련도 점수를 배치 최댓값 기준 백분율로 변환
///
/// 최댓값이 0 이하면(모두 동점) 모두 100으로 둡니다.
fn relevance_percentages(results: &[RankedResult]) -> Vec<f32> {
    let max = results
        .iter()
        .map(|r| r.relevance)
        .fold(0.0_f32, f32::max);
    if max <= 0.0 {
        return vec![100.0; results.len()];
    }
    results
        .iter()
        .map(|r| (r.relevance / max * 100.0).clamp(0.0, 100.0))
        .collect()
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
