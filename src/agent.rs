//! Specialist agents: the trait the Executor invokes, the registry that
//! looks agents up by id, and a reusable LLM-backed reference implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::DispatcherError;
use crate::json_repair::try_parse_json_object;
use crate::llm_adapter::LlmAdapter;
use crate::message::{AgentResponse, IntentType, Message, NextAction};

/// Maximum number of prior turns kept per conversation in an agent's own
/// memory, independent of the session transcript.
const AGENT_MEMORY_CAP: usize = 10;

/// One specialist capable of producing an [`AgentResponse`] for a [`Message`].
///
/// The core ships a single concrete implementation, [`LlmBackedAgent`] — the
/// five roles (reception/sales/order/knowledge/styling) are configuration of
/// that implementation, not five bespoke types, so the crate is runnable
/// end-to-end without requiring real business prompts to be written first.
#[async_trait]
pub trait SpecialistAgent: Send + Sync {
    fn id(&self) -> &str;
    fn capabilities(&self) -> &[String];
    async fn handle(&self, message: &Message, context: &HashMap<String, Value>) -> Result<AgentResponse, DispatcherError>;
}

/// Looks specialist agents up by id, in registration order.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn SpecialistAgent>>,
    order: Vec<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, agent: Arc<dyn SpecialistAgent>) {
        let id = agent.id().to_string();
        if !self.agents.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.agents.insert(id, agent);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn SpecialistAgent>> {
        self.agents.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A generic LLM-backed specialist: an id, a capability list, and a system
/// prompt, wired to an [`LlmAdapter`].
pub struct LlmBackedAgent {
    id: String,
    capabilities: Vec<String>,
    system_prompt: String,
    llm: Arc<dyn LlmAdapter>,
    memory: Mutex<HashMap<String, Vec<(String, String)>>>,
}

impl LlmBackedAgent {
    pub fn new(
        id: impl Into<String>,
        capabilities: Vec<String>,
        system_prompt: impl Into<String>,
        llm: Arc<dyn LlmAdapter>,
    ) -> Self {
        Self {
            id: id.into(),
            capabilities,
            system_prompt: system_prompt.into(),
            llm,
            memory: Mutex::new(HashMap::new()),
        }
    }

    /// `_build_intelligent_prompt`: system prompt + last-3-turns memory for
    /// this conversation + context key/values + the user message, with a
    /// strict JSON output contract.
    async fn build_prompt(&self, message: &Message, context: &HashMap<String, Value>) -> String {
        let memory = self.memory.lock().await;
        let history = memory
            .get(&message.conversation_id)
            .map(|turns| {
                turns
                    .iter()
                    .rev()
                    .take(3)
                    .rev()
                    .map(|(user, agent)| format!("用户：{}\n{}：{}", user, self.id, agent))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        let context_str = context
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join("; ");

        format!(
            "{}\n\n最近对话：\n{}\n\n上下文：{}\n\n用户消息：{}\n\n请严格输出如下 JSON：\n\
             {{\n  \"content\": \"给用户的回复内容\",\n  \"confidence\": 0.0到1.0,\n  \
             \"next_action\": \"continue|transfer|clarify|retry|complete|human_handoff\",\n  \
             \"suggested_agents\": [\"agent_id\", ...],\n  \"requires_human\": true|false\n}}",
            self.system_prompt, history, context_str, message.content
        )
    }

    /// `_parse_response`: defensive JSON parse, falling back to the raw text
    /// at confidence 0.5 when the reply isn't valid JSON.
    fn parse_response(&self, reply: &str) -> AgentResponse {
        match try_parse_json_object(reply) {
            Some(value) => {
                let content = value
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or(reply)
                    .to_string();
                let confidence = value.get("confidence").and_then(Value::as_f64).unwrap_or(0.5);
                let next_action = value
                    .get("next_action")
                    .and_then(Value::as_str)
                    .and_then(parse_next_action);
                let suggested_agents = value
                    .get("suggested_agents")
                    .and_then(Value::as_array)
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                let requires_human = value
                    .get("requires_human")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);

                AgentResponse {
                    content,
                    agent_id: self.id.clone(),
                    confidence,
                    next_action,
                    suggested_agents,
                    requires_human,
                    intent_type: None,
                    escalation_reason: None,
                    metadata: HashMap::new(),
                    timestamp: chrono::Utc::now(),
                }
            }
            None => AgentResponse::new(reply, self.id.clone()).with_confidence(0.5),
        }
    }

    /// `_update_memory`: remember this exchange, capped at the last
    /// [`AGENT_MEMORY_CAP`] turns per conversation.
    async fn update_memory(&self, conversation_id: &str, user_content: &str, agent_content: &str) {
        let mut memory = self.memory.lock().await;
        let turns = memory.entry(conversation_id.to_string()).or_default();
        turns.push((user_content.to_string(), agent_content.to_string()));
        if turns.len() > AGENT_MEMORY_CAP {
            let drop = turns.len() - AGENT_MEMORY_CAP;
            turns.drain(0..drop);
        }
    }
}

fn parse_next_action(s: &str) -> Option<NextAction> {
    match s {
        "continue" => Some(NextAction::Continue),
        "transfer" => Some(NextAction::Transfer),
        "clarify" => Some(NextAction::Clarify),
        "retry" => Some(NextAction::Retry),
        "complete" => Some(NextAction::Complete),
        "human_handoff" => Some(NextAction::HumanHandoff),
        _ => None,
    }
}

#[async_trait]
impl SpecialistAgent for LlmBackedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// `process_message`: build the prompt, call the LLM, parse the reply,
    /// update memory. An LLM failure becomes an `AgentInvocationFailed` error
    /// rather than a response of its own — the executor isolates it into a
    /// low-confidence human-handoff reply (see `fuser::fuse`).
    async fn handle(&self, message: &Message, context: &HashMap<String, Value>) -> Result<AgentResponse, DispatcherError> {
        let prompt = self.build_prompt(message, context).await;

        match self.llm.chat(&self.system_prompt, &prompt).await {
            Ok(reply) => {
                let response = self.parse_response(&reply);
                self.update_memory(&message.conversation_id, &message.content, &response.content).await;
                Ok(response)
            }
            Err(e) => Err(DispatcherError::AgentInvocationFailed { agent_id: self.id.clone(), source: e }),
        }
    }
}

/// Classify a response's intent from its agent id, used where the LLM reply
/// didn't set one explicitly. Kept separate from [`LlmBackedAgent`] so it can
/// also be used by the fuser/dispatcher when post-processing responses.
pub fn default_intent_for_agent(agent_id: &str) -> Option<IntentType> {
    match agent_id {
        "reception_agent" => Some(IntentType::Greeting),
        "sales_agent" => Some(IntentType::SalesConsultation),
        "order_agent" => Some(IntentType::OrderInquiry),
        "knowledge_agent" => Some(IntentType::ProductInquiry),
        "styling_agent" => Some(IntentType::StyleAdvice),
        _ => Some(IntentType::Other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_adapter::test_support::ScriptedAdapter;

    fn msg(content: &str) -> Message {
        Message::new(content, "user-1", "conv-1")
    }

    #[tokio::test]
    async fn parses_well_formed_json_reply() {
        let agent = LlmBackedAgent::new(
            "sales_agent",
            vec!["recommend_products".to_string()],
            "你是销售顾问",
            Arc::new(ScriptedAdapter {
                reply: Ok(r#"{"content": "推荐这件外套", "confidence": 0.9, "next_action": "continue"}"#.to_string()),
            }),
        );
        let response = agent.handle(&msg("有什么推荐的外套吗"), &HashMap::new()).await.unwrap();
        assert_eq!(response.content, "推荐这件外套");
        assert_eq!(response.confidence, 0.9);
        assert_eq!(response.agent_id, "sales_agent");
    }

    #[tokio::test]
    async fn falls_back_to_raw_text_on_malformed_json() {
        let agent = LlmBackedAgent::new(
            "sales_agent",
            vec![],
            "你是销售顾问",
            Arc::new(ScriptedAdapter {
                reply: Ok("这是一段没有 JSON 结构的纯文本回复".to_string()),
            }),
        );
        let response = agent.handle(&msg("hi"), &HashMap::new()).await.unwrap();
        assert_eq!(response.content, "这是一段没有 JSON 结构的纯文本回复");
        assert_eq!(response.confidence, 0.5);
    }

    #[tokio::test]
    async fn llm_failure_surfaces_as_agent_invocation_failed() {
        let agent = LlmBackedAgent::new(
            "sales_agent",
            vec![],
            "你是销售顾问",
            Arc::new(ScriptedAdapter {
                reply: Err("provider down".to_string()),
            }),
        );
        let result = agent.handle(&msg("hi"), &HashMap::new()).await;
        assert!(matches!(
            result,
            Err(DispatcherError::AgentInvocationFailed { agent_id, .. }) if agent_id == "sales_agent"
        ));
    }

    #[tokio::test]
    async fn memory_is_capped_per_conversation() {
        let agent = LlmBackedAgent::new(
            "sales_agent",
            vec![],
            "你是销售顾问",
            Arc::new(ScriptedAdapter {
                reply: Ok(r#"{"content": "ok", "confidence": 0.8}"#.to_string()),
            }),
        );
        for i in 0..15 {
            agent.handle(&msg(&format!("msg {}", i)), &HashMap::new()).await.unwrap();
        }
        let memory = agent.memory.lock().await;
        assert_eq!(memory.get("conv-1").unwrap().len(), AGENT_MEMORY_CAP);
    }

    #[test]
    fn registry_preserves_registration_order() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(LlmBackedAgent::new(
            "reception_agent",
            vec![],
            "x",
            Arc::new(ScriptedAdapter { reply: Ok("{}".to_string()) }),
        )));
        registry.register(Arc::new(LlmBackedAgent::new(
            "sales_agent",
            vec![],
            "x",
            Arc::new(ScriptedAdapter { reply: Ok("{}".to_string()) }),
        )));
        assert_eq!(registry.ids(), &["reception_agent".to_string(), "sales_agent".to_string()]);
        assert!(registry.contains("sales_agent"));
        assert!(registry.get("order_agent").is_none());
    }
}
