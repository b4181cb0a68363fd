//! HTTP 채팅 엔드포인트
//!
//! - `POST /api/chat` : `{question, session_id?, system_prompt?}` → 대화 기록 + 출처
//! - `GET /healthz`   : 상태 확인

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::assistant::Assistant;
use crate::error::RagError;
use crate::session::{SessionStore, Turn};

/// 만료 세션 정리 주기
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

const QUESTION_REQUIRED: &str = "Question is required.";

#[derive(Clone)]
pub struct AppState {
    assistant: Arc<Assistant>,
    sessions: Arc<SessionStore>,
    system_prompt: Arc<str>,
}

impl AppState {
    pub fn new(assistant: Assistant, sessions: SessionStore, system_prompt: String) -> Self {
        Self {
            assistant: Arc::new(assistant),
            sessions: Arc::new(sessions),
            system_prompt: system_prompt.into(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// 이 요청에만 적용할 시스템 프롬프트
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub conversation: Vec<Turn>,
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Serialize)]
pub struct SourceRef {
    pub title: String,
    pub url: String,
    pub similarity: f32,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/chat", post(chat_handler))
        .with_state(state)
}

/// 서버 실행 (종료될 때까지 대기)
pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {}", bind))?;

    let sweeper = spawn_session_sweeper(state.sessions.clone(), SESSION_SWEEP_INTERVAL);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Chat API listening on http://{}", addr);

    let result = axum::serve(listener, router(state))
        .await
        .context("server shutdown");
    sweeper.abort();
    result
}

/// 주기적으로 만료 세션 삭제
pub fn spawn_session_sweeper(
    sessions: Arc<SessionStore>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let purged = sessions.purge_expired();
            if purged > 0 {
                tracing::debug!("Purged {} expired sessions ({} active)", purged, sessions.len());
            }
        }
    })
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::debug!("Rejected chat body: {}", rejection);
            return Err(bad_request(QUESTION_REQUIRED));
        }
    };

    let question = request
        .question
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| bad_request(QUESTION_REQUIRED))?;

    let session_id = state.sessions.open(request.session_id.as_deref());
    let system_prompt = request
        .system_prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(&*state.system_prompt);

    let answer = state
        .assistant
        .answer(question, system_prompt)
        .await
        .map_err(rag_error)?;

    let conversation = state
        .sessions
        .record_exchange(&session_id, question, &answer.text);

    let sources = answer
        .sources
        .into_iter()
        .map(|r| SourceRef {
            title: r.metadata.title,
            url: r.metadata.url,
            similarity: r.similarity,
        })
        .collect();

    Ok(Json(ChatResponse {
        session_id,
        conversation,
        sources,
    }))
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

fn rag_error(err: RagError) -> ApiError {
    let status = match &err {
        RagError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::error!(kind = err.kind(), "Chat request failed: {}", err);
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
}

// ============================================================================
// Tests
// ============================================================================
