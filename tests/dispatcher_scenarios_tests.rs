//! End-to-end scenarios for the dispatcher + collaboration engine, covering
//! a representative sample of its routing, fusion, and fallback behavior.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use collab_dispatcher::executor::WorkflowExecutor;
use collab_dispatcher::task::{AgentRole, CollaborationMode, CollaborationTask, RecommendedAgent, TaskPriority};
use collab_dispatcher::{AgentRegistry, AgentResponse, Dispatcher, DispatcherConfig, DispatcherError, LlmAdapter, Message, NextAction, SpecialistAgent};

/// An `LlmAdapter` double that always returns the same scripted reply.
struct FixedReplyAdapter {
    reply: String,
}

#[async_trait]
impl LlmAdapter for FixedReplyAdapter {
    async fn chat(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String, String> {
        Ok(self.reply.clone())
    }
}

/// A specialist agent double with a fixed reply, an optional artificial
/// delay, and a log of every message it was asked to handle (so tests can
/// inspect what a sequential follow-on agent was actually handed).
struct ScriptedAgent {
    id: String,
    content: String,
    delay: Duration,
    received: Arc<AsyncMutex<Vec<Message>>>,
}

impl ScriptedAgent {
    fn new(id: &str, content: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            content: content.to_string(),
            delay: Duration::ZERO,
            received: Arc::new(AsyncMutex::new(Vec::new())),
        })
    }

    fn with_delay(id: &str, content: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            content: content.to_string(),
            delay,
            received: Arc::new(AsyncMutex::new(Vec::new())),
        })
    }
}

#[async_trait]
impl SpecialistAgent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &[String] {
        &[]
    }

    async fn handle(&self, message: &Message, _context: &HashMap<String, Value>) -> Result<AgentResponse, DispatcherError> {
        self.received.lock().await.push(message.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(AgentResponse::new(self.content.clone(), self.id.clone()))
    }
}

fn registry_with(agents: Vec<Arc<dyn SpecialistAgent>>) -> Arc<AgentRegistry> {
    let mut registry = AgentRegistry::new();
    for agent in agents {
        registry.register(agent);
    }
    Arc::new(registry)
}

fn dyn_agent(agent: Arc<ScriptedAgent>) -> Arc<dyn SpecialistAgent> {
    agent
}

fn fast_config() -> DispatcherConfig {
    DispatcherConfig {
        session_idle: Duration::from_secs(3600 * 24),
        turn_timeout: Duration::from_secs(5),
        agent_timeout: Duration::from_secs(5),
    }
}

/// Scenario 1 — sales + knowledge parallel: a pure sales message pulls
/// knowledge in as parallel support via the sales-without-order override.
#[tokio::test]
async fn sales_and_knowledge_run_in_parallel() {
    let sales = ScriptedAgent::new("sales_agent", "推荐一件白色衬衫，预算内有货");
    let knowledge = ScriptedAgent::new("knowledge_agent", "该款式为纯棉面料");
    let registry = registry_with(vec![dyn_agent(sales), dyn_agent(knowledge)]);

    let dispatcher = Dispatcher::new(
        Arc::new(FixedReplyAdapter {
            reply: r#"{"recommended_agents": [{"agent_id": "reception_agent", "role": "primary"}]}"#.to_string(),
        }),
        registry,
        fast_config(),
    );

    let response = dispatcher.process_turn("user-1", "conv-1", "我想买一件白色衬衫，预算 300 以内").await;

    assert_eq!(response.agent_id, "sales_agent");
    let info = response.metadata.get("collaboration_info").unwrap();
    assert_eq!(info["participating_agents"], serde_json::json!(["sales_agent", "knowledge_agent"]));
    assert_eq!(info["support_contents"].as_array().unwrap().len(), 1);
    assert_eq!(info["support_contents"][0]["agent_id"], "knowledge_agent");
}

/// Scenario 2 — styling → sales sequential: the sales support agent
/// receives styling's own content as its derived message, and the fused
/// response splices the sales recommendation under the styling reply.
#[tokio::test]
async fn styling_hands_off_to_sales_sequentially() {
    let styling = ScriptedAgent::new("styling_agent", "建议穿浅色系衬衫搭配牛仔裤");
    let sales = ScriptedAgent::new("sales_agent", "这件牛仔裤正在热卖");
    let knowledge = ScriptedAgent::new("knowledge_agent", "面料为斜纹棉");
    let sales_log = Arc::clone(&sales.received);
    let registry = registry_with(vec![dyn_agent(styling), dyn_agent(sales), dyn_agent(knowledge)]);

    let dispatcher = Dispatcher::new(
        Arc::new(FixedReplyAdapter {
            reply: r#"{"recommended_agents": [{"agent_id": "reception_agent", "role": "primary"}]}"#.to_string(),
        }),
        registry,
        fast_config(),
    );

    let response = dispatcher.process_turn("user-2", "conv-2", "约会穿什么比较好？").await;

    assert_eq!(response.agent_id, "styling_agent");
    assert!(response.content.starts_with("建议穿浅色系衬衫搭配牛仔裤"));
    assert!(response.content.contains("商品推荐（销售智能体）"));
    assert!(response.content.ends_with("这件牛仔裤正在热卖"));

    let seen = sales_log.lock().await;
    let derived = seen.last().unwrap();
    assert_eq!(derived.content, "建议穿浅色系衬衫搭配牛仔裤");
    assert_eq!(derived.metadata.get("source_agent").unwrap(), "styling_agent");
    assert_eq!(
        derived.metadata.get("primary_response").unwrap()["content"],
        "建议穿浅色系衬衫搭配牛仔裤"
    );
    assert_eq!(
        derived.metadata.get("original_message").unwrap()["content"],
        "约会穿什么比较好？"
    );
}

/// Scenario 3 — handoff confirmation: reception proposes a transfer, the
/// user affirms on the next turn, and sales is routed as primary with
/// `handoff_pending` cleared.
#[tokio::test]
async fn handoff_confirmation_routes_to_sales_on_next_turn() {
    // The reception agent here is the one invoked by the executor for the
    // first turn; its LLM reply is what sets `next_action: transfer`.
    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(collab_dispatcher::LlmBackedAgent::new(
        "reception_agent",
        vec!["greet".to_string()],
        "你是接待智能体",
        Arc::new(FixedReplyAdapter {
            reply: r#"{"content": "好的，我帮您转接销售顾问", "confidence": 0.9, "next_action": "transfer", "suggested_agents": ["sales"]}"#.to_string(),
        }),
    )));
    registry.register(ScriptedAgent::new("sales_agent", "为您服务"));

    let dispatcher = Dispatcher::new(
        Arc::new(FixedReplyAdapter {
            reply: r#"{"recommended_agents": [{"agent_id": "reception_agent", "role": "primary"}]}"#.to_string(),
        }),
        Arc::new(registry),
        fast_config(),
    );

    let first = dispatcher.process_turn("user-3", "conv-3", "我想了解一下").await;
    assert_eq!(first.next_action, Some(NextAction::Transfer));

    let second = dispatcher.process_turn("user-3", "conv-3", "好的").await;
    assert_eq!(second.agent_id, "sales_agent");
}

/// Scenario 4 — order strong intent dominates even when sales is sticky
/// from the prior turn.
#[tokio::test]
async fn order_intent_overrides_sticky_sales_session() {
    let registry = registry_with(vec![
        dyn_agent(ScriptedAgent::new("sales_agent", "推荐一款夹克")),
        dyn_agent(ScriptedAgent::new("order_agent", "正在为您查询订单物流")),
    ]);

    let dispatcher = Dispatcher::new(
        Arc::new(FixedReplyAdapter {
            reply: r#"{"recommended_agents": [{"agent_id": "reception_agent", "role": "primary"}]}"#.to_string(),
        }),
        registry,
        fast_config(),
    );

    let first = dispatcher.process_turn("user-4", "conv-4", "我想买一件夹克").await;
    assert_eq!(first.agent_id, "sales_agent");

    let second = dispatcher.process_turn("user-4", "conv-4", "我的订单 20231215XXXX 还没发货").await;
    assert_eq!(second.agent_id, "order_agent");
}

/// Scenario 5 — every agent is too slow to answer within the turn budget;
/// the dispatcher's outer timeout produces the hardcoded human-handoff
/// response rather than hanging or panicking.
#[tokio::test]
async fn all_agents_timing_out_falls_back_to_human_handoff() {
    let sales = ScriptedAgent::with_delay("sales_agent", "推荐一款外套", Duration::from_millis(500));
    let reception = ScriptedAgent::with_delay("reception_agent", "您好", Duration::from_millis(500));
    let registry = registry_with(vec![dyn_agent(sales), dyn_agent(reception)]);

    let dispatcher = Dispatcher::new(
        Arc::new(FixedReplyAdapter {
            reply: r#"{"recommended_agents": [{"agent_id": "reception_agent", "role": "primary"}]}"#.to_string(),
        }),
        registry,
        DispatcherConfig {
            session_idle: Duration::from_secs(3600 * 24),
            turn_timeout: Duration::from_millis(60),
            agent_timeout: Duration::from_millis(20),
        },
    );

    let response = dispatcher.process_turn("user-5", "conv-5", "我想买一件外套").await;

    assert_eq!(response.next_action, Some(NextAction::HumanHandoff));
    assert!((response.confidence - 0.1).abs() < 1e-9);
}

/// Scenario 6 — parallel result ordering: results come back primary-first
/// then supports in recommendation order, independent of completion order.
#[tokio::test]
async fn parallel_results_are_ordered_by_recommendation_not_completion() {
    let sales = ScriptedAgent::with_delay("sales_agent", "sales reply", Duration::from_millis(200));
    let knowledge = ScriptedAgent::with_delay("knowledge_agent", "knowledge reply", Duration::from_millis(10));
    let styling = ScriptedAgent::with_delay("styling_agent", "styling reply", Duration::from_millis(50));
    let registry = registry_with(vec![dyn_agent(sales), dyn_agent(knowledge), dyn_agent(styling)]);

    let executor = WorkflowExecutor::new(registry, Duration::from_secs(5));
    let task = CollaborationTask {
        task_id: "collab-ordering".to_string(),
        workflow_type: CollaborationMode::Parallel,
        primary_agent: "sales_agent".to_string(),
        support_agents: vec!["knowledge_agent".to_string(), "styling_agent".to_string()],
        message: Message::new("hi", "user-6", "conv-6"),
        priority: TaskPriority::Normal,
        context: HashMap::new(),
    };

    let result = executor.execute(&task).await;
    let ids: Vec<&str> = result.results.iter().map(|r| r.agent_id.as_str()).collect();
    assert_eq!(ids, vec!["sales_agent", "knowledge_agent", "styling_agent"]);

    // Sanity check the recommendation type is exercised as documented.
    let _ = RecommendedAgent::primary("sales_agent");
    let _ = AgentRole::Support;
}
