//! Dispatcher-wide and per-agent performance counters.
//!
//! Uses an incremental-mean update rather than storing every sample.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Rolling performance counters for one agent.
#[derive(Debug, Clone)]
pub struct AgentPerformance {
    pub total_calls: u64,
    pub success_calls: u64,
    pub avg_response_time_ms: f64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
    pub last_updated: DateTime<Utc>,
}

impl AgentPerformance {
    fn new() -> Self {
        Self {
            total_calls: 0,
            success_calls: 0,
            avg_response_time_ms: 0.0,
            min_response_time_ms: f64::MAX,
            max_response_time_ms: 0.0,
            last_updated: Utc::now(),
        }
    }

    /// `update_agent_performance`: `new_avg = ((old_avg * old_total) + sample) / new_total`.
    fn record(&mut self, success: bool, response_time_ms: f64) {
        self.total_calls += 1;
        if success {
            self.success_calls += 1;
        }
        let total_time = self.avg_response_time_ms * (self.total_calls - 1) as f64 + response_time_ms;
        self.avg_response_time_ms = total_time / self.total_calls as f64;
        self.min_response_time_ms = self.min_response_time_ms.min(response_time_ms);
        self.max_response_time_ms = self.max_response_time_ms.max(response_time_ms);
        self.last_updated = Utc::now();
    }
}

/// System-wide counters (`get_collaboration_stats`/`get_system_stats`).
#[derive(Debug, Clone, Default)]
pub struct GlobalCounters {
    pub total_messages: u64,
    pub successful_collaborations: u64,
    pub average_response_time_ms: f64,
    pub agent_usage: HashMap<String, u64>,
    pub collaboration_patterns: HashMap<String, u64>,
}

struct MetricsState {
    global: GlobalCounters,
    per_agent: HashMap<String, AgentPerformance>,
}

/// Thread-safe metrics store shared across all in-flight turns.
pub struct DispatcherMetrics {
    state: RwLock<MetricsState>,
}

impl DispatcherMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(MetricsState {
                global: GlobalCounters::default(),
                per_agent: HashMap::new(),
            }),
        })
    }

    /// Record one completed turn: which agents participated, whether
    /// collaboration succeeded as a whole, the response time, and the
    /// workflow pattern used (for `collaboration_patterns`).
    pub async fn record_turn(
        &self,
        participating_agents: &[String],
        collaboration_success: bool,
        response_time_ms: f64,
        workflow_pattern: &str,
    ) {
        let mut state = self.state.write().await;

        state.global.total_messages += 1;
        if collaboration_success {
            state.global.successful_collaborations += 1;
        }
        let n = state.global.total_messages as f64;
        state.global.average_response_time_ms += (response_time_ms - state.global.average_response_time_ms) / n;

        *state
            .global
            .collaboration_patterns
            .entry(workflow_pattern.to_string())
            .or_insert(0) += 1;

        for agent_id in participating_agents {
            *state.global.agent_usage.entry(agent_id.clone()).or_insert(0) += 1;
        }
    }

    /// Record one agent invocation's success/failure and latency.
    pub async fn record_agent_call(&self, agent_id: &str, success: bool, response_time_ms: f64) {
        let mut state = self.state.write().await;
        state
            .per_agent
            .entry(agent_id.to_string())
            .or_insert_with(AgentPerformance::new)
            .record(success, response_time_ms);
    }

    pub async fn global_snapshot(&self) -> GlobalCounters {
        self.state.read().await.global.clone()
    }

    pub async fn agent_snapshot(&self, agent_id: &str) -> Option<AgentPerformance> {
        self.state.read().await.per_agent.get(agent_id).cloned()
    }

    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.global = GlobalCounters::default();
        state.per_agent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incremental_mean_matches_straight_average() {
        let metrics = DispatcherMetrics::new();
        metrics.record_turn(&["reception_agent".to_string()], true, 100.0, "single").await;
        metrics.record_turn(&["reception_agent".to_string()], true, 200.0, "single").await;
        metrics.record_turn(&["reception_agent".to_string()], false, 300.0, "single").await;

        let snapshot = metrics.global_snapshot().await;
        assert_eq!(snapshot.total_messages, 3);
        assert_eq!(snapshot.successful_collaborations, 2);
        assert!((snapshot.average_response_time_ms - 200.0).abs() < 1e-6);
        assert_eq!(snapshot.agent_usage.get("reception_agent"), Some(&3));
        assert_eq!(snapshot.collaboration_patterns.get("single"), Some(&3));
    }

    #[tokio::test]
    async fn per_agent_tracks_min_max_and_success_rate() {
        let metrics = DispatcherMetrics::new();
        metrics.record_agent_call("sales_agent", true, 50.0).await;
        metrics.record_agent_call("sales_agent", false, 500.0).await;

        let perf = metrics.agent_snapshot("sales_agent").await.unwrap();
        assert_eq!(perf.total_calls, 2);
        assert_eq!(perf.success_calls, 1);
        assert_eq!(perf.min_response_time_ms, 50.0);
        assert_eq!(perf.max_response_time_ms, 500.0);
        assert!((perf.avg_response_time_ms - 275.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn reset_clears_all_counters() {
        let metrics = DispatcherMetrics::new();
        metrics.record_turn(&["reception_agent".to_string()], true, 100.0, "single").await;
        metrics.record_agent_call("reception_agent", true, 100.0).await;
        metrics.reset().await;
        assert_eq!(metrics.global_snapshot().await.total_messages, 0);
        assert!(metrics.agent_snapshot("reception_agent").await.is_none());
    }
}
