//! The Dispatcher: wires the Session Store, Analyzer, override pipeline,
//! Executor, Fuser, and Metrics together into one `process_turn` call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::agent::AgentRegistry;
use crate::analyzer::CollaborationAnalyzer;
use crate::config::DispatcherConfig;
use crate::error::DispatcherError;
use crate::executor::{InvocationOutcome, WorkflowExecutor};
use crate::fuser;
use crate::llm_adapter::LlmAdapter;
use crate::message::{AgentResponse, Message, NextAction};
use crate::metrics::{AgentPerformance, DispatcherMetrics};
use crate::overrides::apply_override_rules;
use crate::session::SessionStore;
use crate::task::{build_task, CollaborationAnalysis};

/// The Dispatcher + Collaboration Engine core.
pub struct Dispatcher {
    sessions: SessionStore,
    analyzer: CollaborationAnalyzer,
    registry: Arc<AgentRegistry>,
    executor: WorkflowExecutor,
    metrics: Arc<DispatcherMetrics>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(llm: Arc<dyn LlmAdapter>, registry: Arc<AgentRegistry>, config: DispatcherConfig) -> Self {
        Self {
            sessions: SessionStore::new(),
            analyzer: CollaborationAnalyzer::new(llm),
            registry: Arc::clone(&registry),
            executor: WorkflowExecutor::new(registry, config.agent_timeout),
            metrics: DispatcherMetrics::new(),
            config,
        }
    }

    /// Process one inbound message end to end, bounded by `turn_timeout`. A
    /// timed-out turn returns the same hardcoded human-handoff response
    /// [`Dispatcher::handle_error`] falls back to when recovery itself fails.
    pub async fn process_turn(&self, user_id: &str, conversation_id: &str, content: &str) -> AgentResponse {
        match tokio::time::timeout(self.config.turn_timeout, self.process_turn_inner(user_id, conversation_id, content)).await {
            Ok(response) => response,
            Err(_) => {
                log::error!("turn timed out for user={} conversation={}", user_id, conversation_id);
                hardcoded_system_error()
            }
        }
    }

    async fn process_turn_inner(&self, user_id: &str, conversation_id: &str, content: &str) -> AgentResponse {
        let started = Instant::now();
        let message = Message::new(content, user_id, conversation_id);

        let session = self.sessions.get_or_create(user_id, conversation_id).await;
        let mut guard = session.lock().await;

        log::info!("turn started: user={} conversation={}", user_id, conversation_id);

        let analysis = match self.analyzer.analyze(&message, &guard.context).await {
            Ok(analysis) => analysis,
            Err(e) => {
                log::warn!("collaboration analysis failed, using default: {}", e);
                CollaborationAnalysis::default_single_reception()
            }
        };
        let analysis = apply_override_rules(&message, analysis, &mut guard);

        let task = build_task(&analysis, &message, guard.context.clone());
        let execution = self.executor.execute(&task).await;

        for result in &execution.results {
            let (success, response_time_ms) = match &result.outcome {
                InvocationOutcome::Success(_) => (true, started.elapsed().as_millis() as f64),
                InvocationOutcome::Failure { .. } => (false, started.elapsed().as_millis() as f64),
            };
            self.metrics.record_agent_call(&result.agent_id, success, response_time_ms).await;
        }

        let primary_failed = execution
            .results
            .first()
            .map(|r| matches!(r.outcome, InvocationOutcome::Failure { .. }))
            .unwrap_or(true);

        let mut outcome = fuser::fuse(&execution);

        if primary_failed && task.primary_agent != "reception_agent" {
            log::warn!("primary agent '{}' failed, falling back to reception_agent", task.primary_agent);
            outcome.response = self.handle_error(&message, &guard.context).await;
        }

        let participating_agents: Vec<String> = execution.results.iter().map(|r| r.agent_id.clone()).collect();
        let collaboration_success = !primary_failed;

        let mut final_context = guard.context.clone();
        if let Some(target) = &outcome.handoff_target {
            final_context.insert("handoff_pending".to_string(), Value::Bool(true));
            final_context.insert("handoff_target".to_string(), Value::String(target.clone()));
        }

        guard.apply_turn_update(content, &outcome.response, collaboration_success, participating_agents.clone(), final_context);
        drop(guard);

        let workflow_pattern = format!("{:?}", execution.workflow_type).to_lowercase();
        self.metrics
            .record_turn(&participating_agents, collaboration_success, started.elapsed().as_millis() as f64, &workflow_pattern)
            .await;

        log::info!(
            "turn completed: user={} conversation={} primary={} success={}",
            user_id,
            conversation_id,
            task.primary_agent,
            collaboration_success
        );

        outcome.response
    }

    /// `_handle_error`: try `reception_agent` directly; if it is not even
    /// registered, or itself fails, return the hardcoded system-error response.
    async fn handle_error(&self, message: &Message, context: &HashMap<String, Value>) -> AgentResponse {
        match self.registry.get("reception_agent") {
            Some(reception) => match reception.handle(message, context).await {
                Ok(response) => response,
                Err(e) => {
                    log::error!("reception_agent fallback also failed: {}", e);
                    hardcoded_system_error()
                }
            },
            None => hardcoded_system_error(),
        }
    }

    /// `get_system_stats`/`get_collaboration_stats` equivalent.
    pub async fn system_stats(&self) -> crate::metrics::GlobalCounters {
        self.metrics.global_snapshot().await
    }

    /// `get_performance_report`/`get_agent_status` equivalent.
    pub async fn agent_status(&self, agent_id: &str) -> Result<AgentPerformance, DispatcherError> {
        if !self.registry.contains(agent_id) {
            return Err(DispatcherError::AgentNotFound(agent_id.to_string()));
        }
        Ok(self
            .metrics
            .agent_snapshot(agent_id)
            .await
            .unwrap_or_else(|| AgentPerformance {
                total_calls: 0,
                success_calls: 0,
                avg_response_time_ms: 0.0,
                min_response_time_ms: 0.0,
                max_response_time_ms: 0.0,
                last_updated: chrono::Utc::now(),
            }))
    }

    /// `cleanup_inactive_sessions`: sweep sessions idle past `session_idle`.
    pub async fn cleanup_inactive_sessions(&self) -> usize {
        let removed = self.sessions.sweep(self.config.session_idle).await;
        if removed > 0 {
            log::info!("cleaned up {} inactive sessions", removed);
        }
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    /// `reset_stats`.
    pub async fn reset_stats(&self) {
        self.metrics.reset().await;
    }
}

fn hardcoded_system_error() -> AgentResponse {
    AgentResponse::new("系统暂时繁忙，请稍后再试或联系人工客服。", "dispatcher")
        .with_confidence(0.1)
        .with_next_action(NextAction::HumanHandoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::LlmBackedAgent;
    use crate::llm_adapter::test_support::ScriptedAdapter;
    use std::time::Duration;

    fn build_registry() -> Arc<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(LlmBackedAgent::new(
            "reception_agent",
            vec!["greet".to_string()],
            "你是接待智能体",
            Arc::new(ScriptedAdapter {
                reply: Ok(r#"{"content": "您好，请问有什么可以帮您？", "confidence": 0.9}"#.to_string()),
            }),
        )));
        registry.register(Arc::new(LlmBackedAgent::new(
            "sales_agent",
            vec!["recommend".to_string()],
            "你是销售智能体",
            Arc::new(ScriptedAdapter {
                reply: Ok(r#"{"content": "推荐这件外套", "confidence": 0.9}"#.to_string()),
            }),
        )));
        Arc::new(registry)
    }

    fn analysis_adapter(reply: &str) -> Arc<dyn LlmAdapter> {
        Arc::new(ScriptedAdapter { reply: Ok(reply.to_string()) })
    }

    fn analysis_adapter_failing() -> Arc<dyn LlmAdapter> {
        Arc::new(ScriptedAdapter { reply: Err("boom".to_string()) })
    }

    #[tokio::test]
    async fn single_agent_turn_returns_reception_response() {
        let dispatcher = Dispatcher::new(
            analysis_adapter(r#"{"requires_collaboration": false, "recommended_agents": [{"agent_id": "reception_agent", "role": "primary"}]}"#),
            build_registry(),
            DispatcherConfig {
                session_idle: Duration::from_secs(3600 * 24),
                turn_timeout: Duration::from_secs(5),
                agent_timeout: Duration::from_secs(5),
            },
        );
        let response = dispatcher.process_turn("user-1", "conv-1", "你好").await;
        assert_eq!(response.agent_id, "reception_agent");
        assert_eq!(dispatcher.session_count().await, 1);
    }

    #[tokio::test]
    async fn order_keywords_route_to_order_agent_override() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(LlmBackedAgent::new(
            "reception_agent",
            vec![],
            "你是接待智能体",
            Arc::new(ScriptedAdapter { reply: Ok(r#"{"content": "您好"}"#.to_string()) }),
        )));
        registry.register(Arc::new(LlmBackedAgent::new(
            "order_agent",
            vec![],
            "你是订单智能体",
            Arc::new(ScriptedAdapter {
                reply: Ok(r#"{"content": "正在为您查询订单"}"#.to_string()),
            }),
        )));

        let dispatcher = Dispatcher::new(
            analysis_adapter(r#"{"requires_collaboration": false, "recommended_agents": [{"agent_id": "reception_agent", "role": "primary"}]}"#),
            Arc::new(registry),
            DispatcherConfig {
                session_idle: Duration::from_secs(3600 * 24),
                turn_timeout: Duration::from_secs(5),
                agent_timeout: Duration::from_secs(5),
            },
        );
        let response = dispatcher.process_turn("user-1", "conv-1", "帮我查一下订单物流").await;
        assert_eq!(response.agent_id, "order_agent");
    }

    #[tokio::test]
    async fn analysis_failure_falls_back_to_default_single_reception() {
        let dispatcher = Dispatcher::new(
            analysis_adapter_failing(),
            build_registry(),
            DispatcherConfig::default(),
        );
        let response = dispatcher.process_turn("user-1", "conv-1", "你好").await;
        assert_eq!(response.agent_id, "reception_agent");
    }

    #[tokio::test]
    async fn unknown_agent_status_lookup_errors() {
        let dispatcher = Dispatcher::new(
            analysis_adapter("{}"),
            build_registry(),
            DispatcherConfig::default(),
        );
        let result = dispatcher.agent_status("ghost_agent").await;
        assert!(matches!(result, Err(DispatcherError::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn cleanup_removes_idle_sessions() {
        let dispatcher = Dispatcher::new(
            analysis_adapter(r#"{"recommended_agents": [{"agent_id": "reception_agent", "role": "primary"}]}"#),
            build_registry(),
            DispatcherConfig {
                session_idle: Duration::from_secs(0),
                turn_timeout: Duration::from_secs(5),
                agent_timeout: Duration::from_secs(5),
            },
        );
        dispatcher.process_turn("user-1", "conv-1", "你好").await;
        let removed = dispatcher.cleanup_inactive_sessions().await;
        assert_eq!(removed, 1);
    }
}
