//! 대화 세션 저장소
//!
//! 세션 ID별로 대화 기록을 메모리에 보관합니다. 마지막 사용 후
//! TTL(기본 1시간)이 지난 세션은 조회 시점 또는 주기적 정리 작업에서 삭제됩니다.
//! 프로세스가 종료되면 모든 세션이 사라집니다.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 기본 세션 유효 시간
pub const DEFAULT_SESSION_TTL_SECS: i64 = 60 * 60;

/// 발화자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// 대화의 한 턴
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug)]
struct Session {
    history: Vec<Turn>,
    last_active: DateTime<Utc>,
}

impl Session {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            history: Vec::new(),
            last_active: now,
        }
    }
}

/// 세션 저장소 (여러 요청이 동시에 접근)
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_SESSION_TTL_SECS))
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    // 한 세션의 패닉이 저장소 전체를 막지 않도록 poison은 무시
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now - session.last_active > self.ttl
    }

    /// 세션 열기
    ///
    /// ID가 없으면 새로 발급합니다. 만료된 세션 ID는 같은 ID의
    /// 빈 세션으로 다시 시작합니다.
    pub fn open(&self, session_id: Option<&str>) -> String {
        self.open_at(session_id, Utc::now())
    }

    pub fn open_at(&self, session_id: Option<&str>, now: DateTime<Utc>) -> String {
        let id = match session_id.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let mut sessions = self.lock();
        let expired = sessions
            .get(&id)
            .is_some_and(|s| self.is_expired(s, now));
        if expired {
            tracing::debug!("Session {} expired, starting fresh", id);
            sessions.remove(&id);
        }

        sessions
            .entry(id.clone())
            .or_insert_with(|| Session::new(now))
            .last_active = now;
        id
    }

    /// 질문/답변 한 쌍을 원자적으로 추가하고 전체 기록 반환
    pub fn record_exchange(&self, session_id: &str, question: &str, answer: &str) -> Vec<Turn> {
        self.record_exchange_at(session_id, question, answer, Utc::now())
    }

    pub fn record_exchange_at(
        &self,
        session_id: &str,
        question: &str,
        answer: &str,
        now: DateTime<Utc>,
    ) -> Vec<Turn> {
        let mut sessions = self.lock();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(now));
        session.history.push(Turn::user(question));
        session.history.push(Turn::assistant(answer));
        session.last_active = now;
        session.history.clone()
    }

    /// 대화 기록 (없거나 만료되었으면 빈 목록)
    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        self.history_at(session_id, Utc::now())
    }

    pub fn history_at(&self, session_id: &str, now: DateTime<Utc>) -> Vec<Turn> {
        self.lock()
            .get(session_id)
            .filter(|s| !self.is_expired(s, now))
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    /// 만료된 세션 삭제, 삭제된 수 반환
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| now - s.last_active <= self.ttl);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_open_generates_id() {
        let store = SessionStore::default();
        let a = store.open(None);
        let b = store.open(Some(""));
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_open_keeps_existing_history() {
        let store = SessionStore::default();
        let id = store.open(None);
        store.record_exchange(&id, "hi", "hello");

        assert_eq!(store.open(Some(&id)), id);
        assert_eq!(
            store.history(&id),
            vec![Turn::user("hi"), Turn::assistant("hello")]
        );
    }

    #[test]
    fn test_record_exchange_order() {
        let store = SessionStore::default();
        let id = store.open(Some("abc"));
        store.record_exchange(&id, "q1", "a1");
        let history = store.record_exchange(&id, "q2", "a2");

        let roles: Vec<Role> = history.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
        assert_eq!(history[2].content, "q2");
    }

    #[test]
    fn test_expired_session_restarts_with_same_id() {
        let store = SessionStore::new(Duration::seconds(60));
        let start = Utc::now();
        store.open_at(Some("s1"), start);
        store.record_exchange_at("s1", "old", "answer", start);

        let later = start + Duration::seconds(61);
        assert!(store.history_at("s1", later).is_empty());
        assert_eq!(store.open_at(Some("s1"), later), "s1");
        assert!(store.history_at("s1", later).is_empty());
    }

    #[test]
    fn test_activity_extends_lifetime() {
        let store = SessionStore::new(Duration::seconds(60));
        let start = Utc::now();
        store.record_exchange_at("s1", "a", "1", start);
        store.record_exchange_at("s1", "b", "2", start + Duration::seconds(50));

        let check = start + Duration::seconds(100);
        assert_eq!(store.history_at("s1", check).len(), 4);
    }

    #[test]
    fn test_purge_expired() {
        let store = SessionStore::new(Duration::seconds(60));
        let start = Utc::now();
        store.open_at(Some("old"), start);
        store.open_at(Some("fresh"), start + Duration::seconds(30));

        assert_eq!(store.purge_expired_at(start + Duration::seconds(70)), 1);
        assert_eq!(store.len(), 1);
        assert!(store.history_at("fresh", start + Duration::seconds(70)).is_empty());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_value(Turn::assistant("x")).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "x");
    }

    #[test]
    fn test_concurrent_appends() {
        let store = Arc::new(SessionStore::default());
        let id = store.open(None);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    for j in 0..25 {
                        store.record_exchange(&id, &format!("q{}-{}", i, j), "a");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let history = store.history(&id);
        assert_eq!(history.len(), 8 * 25 * 2);
        // 질문/답변 쌍이 섞이지 않음
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
        }
    }
}
