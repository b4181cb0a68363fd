//! 기사 크롤러 - 시드 URL부터 기사 링크를 따라가며 코퍼스 구축
//!
//! 시드 페이지에서 시작해 기사 URL 패턴에 맞는 링크만 너비 우선으로 방문합니다.
//! 제목과 100자 넘는 본문이 있는 페이지만 저장하고, 그 페이지의 링크만 큐에 넣습니다.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use crate::knowledge::{Corpus, NewDocument};

/// 기본 시드 기사
pub const DEFAULT_SEED_URL: &str =
    "https://www.thoughtco.com/percentage-of-human-brain-used-4159438";

/// 기본 기사 URL 패턴
pub const DEFAULT_ARTICLE_PATTERN: &str = r"^https?://www\.thoughtco\.com/.*-\d+$";

/// 이보다 짧은 본문은 기사로 보지 않음
const MIN_CONTENT_CHARS: usize = 100;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; article-rag/0.1)";

/// 크롤 설정
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub seed_url: String,
    pub max_articles: usize,
    pub article_pattern: String,
    /// 저장한 페이지 사이 대기 시간
    pub delay: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            seed_url: DEFAULT_SEED_URL.to_string(),
            max_articles: 300,
            article_pattern: DEFAULT_ARTICLE_PATTERN.to_string(),
            delay: Duration::from_millis(2000),
        }
    }
}

/// 크롤 결과 통계
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub visited: usize,
    pub stored: usize,
    pub already_present: usize,
    pub rejected: usize,
    pub failed: usize,
}

/// 페이지 파싱 결과
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPage {
    pub title: Option<String>,
    pub content: String,
    /// 기사 패턴에 맞는 링크 (절대 URL, fragment 제거, 중복 제거)
    pub links: Vec<String>,
}

impl ParsedPage {
    /// 저장할 만한 기사인지
    pub fn is_article(&self) -> bool {
        self.title.is_some() && self.content.chars().count() > MIN_CONTENT_CHARS
    }
}

/// 기사 크롤러
pub struct ArticleCrawler {
    client: reqwest::Client,
    config: CrawlConfig,
    pattern: Regex,
}

impl ArticleCrawler {
    pub fn new(config: CrawlConfig) -> Result<Self> {
        let pattern = Regex::new(&config.article_pattern)
            .with_context(|| format!("Invalid article pattern: {}", config.article_pattern))?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            config,
            pattern,
        })
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// 기사 URL 여부
    pub fn is_article_url(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }

    /// 크롤 실행
    ///
    /// 코퍼스에 새로 저장했거나 이미 있던 기사 수가 `max_articles`에 닿으면 멈춥니다.
    pub async fn crawl(&self, corpus: &Corpus) -> Result<CrawlStats> {
        let seed = Url::parse(&self.config.seed_url)
            .with_context(|| format!("Invalid seed URL: {}", self.config.seed_url))?;

        let mut stats = CrawlStats::default();
        let mut frontier = VecDeque::from([seed.to_string()]);
        let mut seen: HashSet<String> = frontier.iter().cloned().collect();

        while let Some(url) = frontier.pop_front() {
            if stats.stored + stats.already_present >= self.config.max_articles {
                break;
            }
            stats.visited += 1;
            tracing::info!("Crawling {}", url);

            let html = match self.fetch(&url).await {
                Ok(html) => html,
                Err(e) => {
                    tracing::warn!("Error crawling {}: {:#}", url, e);
                    stats.failed += 1;
                    continue;
                }
            };

            let page = self.parse_page(&html, &url);
            let Some(title) = page.title.clone().filter(|_| page.is_article()) else {
                tracing::debug!("Not an article page: {}", url);
                stats.rejected += 1;
                continue;
            };

            let doc = NewDocument {
                url: url.clone(),
                title,
                content: page.content,
            };
            match corpus.add_document(doc).await {
                Ok(true) => {
                    stats.stored += 1;
                    tracing::info!(
                        "Processed {} articles ({} new)",
                        stats.stored + stats.already_present,
                        stats.stored
                    );
                }
                Ok(false) => stats.already_present += 1,
                Err(e) => {
                    tracing::warn!("Error storing {}: {:#}", url, e);
                    stats.failed += 1;
                    continue;
                }
            }

            for link in page.links {
                if seen.insert(link.clone()) {
                    frontier.push_back(link);
                }
            }

            if !self.config.delay.is_zero() {
                tokio::time::sleep(self.config.delay).await;
            }
        }

        Ok(stats)
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("HTTP request failed")?
            .error_for_status()
            .context("HTTP error status")?;

        response.text().await.context("Failed to read response body")
    }

    /// HTML에서 제목, 본문, 기사 링크 추출
    pub fn parse_page(&self, html: &str, page_url: &str) -> ParsedPage {
        let document = Html::parse_document(html);
        ParsedPage {
            title: extract_title(&document),
            content: extract_content(&document),
            links: self.extract_links(&document, page_url),
        }
    }

    fn extract_links(&self, document: &Html, page_url: &str) -> Vec<String> {
        let Ok(base) = Url::parse(page_url) else {
            return vec![];
        };
        let Ok(anchor) = Selector::parse("a[href]") else {
            return vec![];
        };

        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for element in document.select(&anchor) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let Ok(mut resolved) = base.join(href.trim()) else {
                continue;
            };
            resolved.set_fragment(None);

            let link = resolved.to_string();
            if self.is_article_url(&link) && seen.insert(link.clone()) {
                links.push(link);
            }
        }
        links
    }
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next()
}

/// 제목 추출: `h1.article-heading` > `<title>` > `<h1>`
fn extract_title(document: &Html) -> Option<String> {
    ["h1.article-heading", "title", "h1"]
        .into_iter()
        .filter_map(|s| select_first(document, s))
        .map(|e| collapse_whitespace(&e.text().collect::<String>()))
        .find(|t| !t.is_empty())
}

/// 본문 추출: `div.article-content` > `article` > `main` > `body`
fn extract_content(document: &Html) -> String {
    ["div.article-content", "article", "main", "body"]
        .into_iter()
        .filter_map(|s| select_first(document, s))
        .map(|e| element_text(&e))
        .find(|t| !t.is_empty())
        .unwrap_or_default()
}

/// 요소의 텍스트 (script/style 제외, 공백 정리)
fn element_text(element: &ElementRef) -> String {
    let mut raw = String::new();
    collect_text(element, &mut raw);
    collapse_whitespace(&raw)
}

fn collect_text(element: &ElementRef, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(el) if matches!(el.name(), "script" | "style" | "noscript") => {}
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(&child_el, out);
                }
            }
            _ => {}
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
