//! In-memory Session Store: `SmartSession`, `TurnRecord`, and the concurrent
//! map that owns them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::message::AgentResponse;

/// Lifecycle state of a [`SmartSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Collaborating,
    Waiting,
    Completed,
    Error,
}

/// One side of one turn in a conversation's transcript.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub timestamp: DateTime<Utc>,
    pub direction: TurnDirection,
    pub content: String,
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDirection {
    User,
    Agent,
}

/// Running performance counters scoped to one session.
#[derive(Debug, Clone, Default)]
pub struct SessionPerformance {
    pub total_interactions: u64,
    pub successful_collaborations: u64,
    pub agent_switches: u64,
}

/// Maximum number of user-turns retained per session transcript.
pub const TRANSCRIPT_CAP_USER_TURNS: usize = 10;
/// Maximum number of `TurnRecord`s retained per session transcript (2 per user turn).
pub const TRANSCRIPT_CAP_RECORDS: usize = TRANSCRIPT_CAP_USER_TURNS * 2;

/// Per-conversation state, keyed by `(user_id, conversation_id)` in [`SessionStore`].
pub struct SmartSession {
    pub user_id: String,
    pub conversation_id: String,
    pub current_agents: Vec<String>,
    pub collaboration_tasks: Vec<String>,
    pub context: HashMap<String, Value>,
    pub transcript: Vec<TurnRecord>,
    pub start_time: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub status: SessionStatus,
    pub performance: SessionPerformance,
}

impl SmartSession {
    pub(crate) fn new(user_id: String, conversation_id: String) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            conversation_id,
            current_agents: Vec::new(),
            collaboration_tasks: Vec::new(),
            context: HashMap::new(),
            transcript: Vec::new(),
            start_time: now,
            last_active: now,
            status: SessionStatus::Active,
            performance: SessionPerformance::default(),
        }
    }

    pub fn handoff_pending(&self) -> bool {
        self.context
            .get("handoff_pending")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn handoff_target(&self) -> Option<String> {
        self.context
            .get("handoff_target")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
    }

    /// Append the user/agent TurnRecord pair for one turn and enforce the
    /// transcript cap: the last `TRANSCRIPT_CAP_RECORDS` records survive.
    fn record_turn(&mut self, user_content: &str, response: &AgentResponse) {
        self.transcript.push(TurnRecord {
            timestamp: Utc::now(),
            direction: TurnDirection::User,
            content: user_content.to_string(),
            agent_id: None,
        });
        self.transcript.push(TurnRecord {
            timestamp: Utc::now(),
            direction: TurnDirection::Agent,
            content: response.content.clone(),
            agent_id: Some(response.agent_id.clone()),
        });

        if self.transcript.len() > TRANSCRIPT_CAP_RECORDS {
            let drop = self.transcript.len() - TRANSCRIPT_CAP_RECORDS;
            self.transcript.drain(0..drop);
        }
    }

    /// Apply the post-turn state transition.
    pub fn apply_turn_update(
        &mut self,
        user_content: &str,
        response: &AgentResponse,
        collaboration_success: bool,
        participating_agents: Vec<String>,
        final_context: HashMap<String, Value>,
    ) {
        self.last_active = Utc::now();
        self.record_turn(user_content, response);
        self.current_agents = participating_agents;
        self.context.extend(final_context);
        self.performance.total_interactions += 1;
        if collaboration_success {
            self.performance.successful_collaborations += 1;
        }
    }
}

/// Concurrent map from `(user_id, conversation_id)` to a mutex-guarded
/// [`SmartSession`].
///
/// Map-level structural changes (insert/remove) go through a single
/// `RwLock`; per-session turn serialization goes through that session's own
/// `Mutex`, so concurrent turns on different conversations never contend
/// with each other once the session handle is obtained.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<SmartSession>>>>,
}

fn session_key(user_id: &str, conversation_id: &str) -> String {
    format!("{}_{}", user_id, conversation_id)
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// `get_or_create`: atomic under concurrent access to the same key.
    pub async fn get_or_create(&self, user_id: &str, conversation_id: &str) -> Arc<Mutex<SmartSession>> {
        let key = session_key(user_id, conversation_id);

        if let Some(existing) = self.sessions.read().await.get(&key) {
            return Arc::clone(existing);
        }

        let mut sessions = self.sessions.write().await;
        Arc::clone(
            sessions
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(SmartSession::new(user_id.to_string(), conversation_id.to_string())))),
        )
    }

    /// Number of sessions currently tracked.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// `sweep(idle_cutoff)`: remove sessions idle longer than `idle_cutoff`.
    /// Returns the number of sessions removed.
    pub async fn sweep(&self, idle_cutoff: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(idle_cutoff).unwrap_or(chrono::Duration::hours(24));
        let mut stale_keys = Vec::new();

        for (key, session) in self.sessions.read().await.iter() {
            if session.lock().await.last_active < cutoff {
                stale_keys.push(key.clone());
            }
        }

        if stale_keys.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write().await;
        let mut removed = 0;
        for key in stale_keys {
            if sessions.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_returns_same_session_for_same_key() {
        let store = SessionStore::new();
        let a = store.get_or_create("u1", "c1").await;
        let b = store.get_or_create("u1", "c1").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn get_or_create_returns_distinct_sessions_for_distinct_keys() {
        let store = SessionStore::new();
        let a = store.get_or_create("u1", "c1").await;
        let b = store.get_or_create("u1", "c2").await;
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn transcript_is_capped_at_twenty_records() {
        let store = SessionStore::new();
        let session = store.get_or_create("u1", "c1").await;
        let mut guard = session.lock().await;
        for i in 0..15 {
            let response = AgentResponse::new(format!("reply {}", i), "reception_agent");
            guard.apply_turn_update(&format!("msg {}", i), &response, true, vec!["reception_agent".to_string()], HashMap::new());
        }
        assert_eq!(guard.transcript.len(), TRANSCRIPT_CAP_RECORDS);
    }

    #[tokio::test]
    async fn sweep_removes_idle_sessions() {
        let store = SessionStore::new();
        let session = store.get_or_create("u1", "c1").await;
        session.lock().await.last_active = Utc::now() - chrono::Duration::hours(48);
        let removed = store.sweep(Duration::from_secs(3600)).await;
        assert_eq!(removed, 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn sweep_keeps_active_sessions() {
        let store = SessionStore::new();
        store.get_or_create("u1", "c1").await;
        let removed = store.sweep(Duration::from_secs(3600 * 24)).await;
        assert_eq!(removed, 0);
        assert_eq!(store.len().await, 1);
    }
}
