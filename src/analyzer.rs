//! The Collaboration Analyzer: LLM-driven routing proposal + defensive
//! parsing + validation.
//!
//! Rule-based overrides are applied afterwards by [`crate::overrides`] — this
//! module only covers the LLM-driven proposal.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::DispatcherError;
use crate::json_repair::try_parse_json_object;
use crate::llm_adapter::LlmAdapter;
use crate::message::Message;
use crate::task::{AgentRole, CollaborationAnalysis, CollaborationMode, RecommendedAgent, TaskPriority};

const KNOWN_AGENT_IDS: &[&str] = &[
    "reception_agent",
    "sales_agent",
    "order_agent",
    "knowledge_agent",
    "styling_agent",
];

const SYSTEM_PROMPT: &str =
    "你是客户服务系统中的协作调度器，任务是判断是否需要让多个代理协作，并给出结构化 JSON 建议。";

const MAX_CONTEXT_LEN: usize = 4000;
/// Nesting levels of `context` preserved before a subtree is collapsed to a sentinel string.
const MAX_CONTEXT_DEPTH: usize = 3;
/// Longest array preserved per `context` level before it's truncated with a sentinel entry.
const MAX_CONTEXT_LIST_LEN: usize = 50;

/// Produces a [`CollaborationAnalysis`] for one `(message, context)` pair.
pub struct CollaborationAnalyzer {
    llm: Arc<dyn LlmAdapter>,
}

impl CollaborationAnalyzer {
    pub fn new(llm: Arc<dyn LlmAdapter>) -> Self {
        Self { llm }
    }

    /// Prompt the LLM, parse defensively, validate, normalize.
    ///
    /// Raises a [`DispatcherError`] on either failure rather than silently
    /// falling back itself — per the propagation policy, that decision (and
    /// the logging that goes with it) belongs to the caller.
    pub async fn analyze(
        &self,
        message: &Message,
        context: &HashMap<String, Value>,
    ) -> Result<CollaborationAnalysis, DispatcherError> {
        let prompt = build_prompt(message, context);

        let reply = self
            .llm
            .chat(SYSTEM_PROMPT, &prompt)
            .await
            .map_err(DispatcherError::LlmAdapterFailed)?;

        match try_parse_json_object(&reply) {
            Some(value) => Ok(validate(&value)),
            None => Err(DispatcherError::AnalysisParseFailed(truncate(&reply, 300))),
        }
    }
}

/// Recursively bound a `context` value to `MAX_CONTEXT_DEPTH` levels of
/// nesting and `MAX_CONTEXT_LIST_LEN` array entries per level, before it is
/// ever serialized. Subtrees past the depth limit collapse to a sentinel
/// string; arrays past the length limit are cut with a trailing sentinel
/// entry recording how many elements were dropped.
fn bound_context_value(value: &Value, depth: usize) -> Value {
    if depth >= MAX_CONTEXT_DEPTH {
        return match value {
            Value::Object(_) | Value::Array(_) => Value::String("(嵌套过深，已截断)".to_string()),
            other => other.clone(),
        };
    }

    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), bound_context_value(v, depth + 1)))
                .collect(),
        ),
        Value::Array(items) => {
            if items.len() > MAX_CONTEXT_LIST_LEN {
                let mut bounded: Vec<Value> = items
                    .iter()
                    .take(MAX_CONTEXT_LIST_LEN)
                    .map(|v| bound_context_value(v, depth + 1))
                    .collect();
                bounded.push(Value::String(format!(
                    "(还有 {} 项，已截断)",
                    items.len() - MAX_CONTEXT_LIST_LEN
                )));
                Value::Array(bounded)
            } else {
                Value::Array(items.iter().map(|v| bound_context_value(v, depth + 1)).collect())
            }
        }
        other => other.clone(),
    }
}

fn build_prompt(message: &Message, context: &HashMap<String, Value>) -> String {
    let bounded_context: serde_json::Map<String, Value> = context
        .iter()
        .map(|(k, v)| (k.clone(), bound_context_value(v, 1)))
        .collect();

    let payload = serde_json::json!({
        "message": {
            "content": message.content,
            "sender_id": message.sender_id,
            "conversation_id": message.conversation_id,
        },
        "context": Value::Object(bounded_context),
    });
    let context_json = serde_json::to_string_pretty(&payload).unwrap_or_default();
    // Backstop: the bounded tree above should already be well under the cap, but a
    // pathologically wide single level (many short keys) could still exceed it.
    let context_json = truncate(&context_json, MAX_CONTEXT_LEN);

    format!(
        "你是客户服务系统中的协作调度器，任务是判断是否需要让多个代理协作，并给出结构化 JSON 建议。\n\n\
         请严格输出如下 JSON 结构：\n\
         {{\n\
         \x20\x20\"requires_collaboration\": true|false,\n\
         \x20\x20\"reason\": \"为什么需要或不需要协作\",\n\
         \x20\x20\"collaboration_mode\": \"single|parallel|sequential\",\n\
         \x20\x20\"recommended_agents\": [\n\
         \x20\x20\x20\x20{{ \"agent_id\": \"reception_agent|sales_agent|order_agent|knowledge_agent|styling_agent\", \"role\": \"primary|support\" }}\n\
         \x20\x20]\n\
         }}\n\n\
         上下文：\n{}\n",
        context_json
    )
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.len() > max_len {
        format!("{}\n(上下文过长，已截断)", &text[..max_len])
    } else {
        text.to_string()
    }
}

/// Validate and normalize a parsed LLM reply into a [`CollaborationAnalysis`].
///
/// Unknown `agent_id`s are dropped; if nothing valid remains, falls back to
/// reception-primary/single. The first surviving entry becomes `primary`
/// (priority 1); the rest become `support` in listing order (priority 2, 3, ...).
fn validate(value: &Value) -> CollaborationAnalysis {
    let requires_collaboration = value
        .get("requires_collaboration")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let raw_agents = value
        .get("recommended_agents")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut normalized: Vec<RecommendedAgent> = Vec::new();
    for entry in &raw_agents {
        let Some(agent_id) = entry.get("agent_id").and_then(Value::as_str) else {
            continue;
        };
        if !KNOWN_AGENT_IDS.contains(&agent_id) {
            continue;
        }
        let is_first = normalized.is_empty();
        let role = entry
            .get("role")
            .and_then(Value::as_str)
            .map(|r| if r == "primary" { AgentRole::Primary } else { AgentRole::Support })
            .unwrap_or(if is_first { AgentRole::Primary } else { AgentRole::Support });
        let priority = if role == AgentRole::Primary { 1 } else { (normalized.len() + 1) as u8 };
        normalized.push(RecommendedAgent {
            agent_id: agent_id.to_string(),
            role,
            priority,
            parallel: false,
        });
    }

    if !normalized.iter().any(|a| a.role == AgentRole::Primary) {
        if let Some(first) = normalized.first_mut() {
            first.role = AgentRole::Primary;
            first.priority = 1;
        }
    }

    if normalized.is_empty() {
        return CollaborationAnalysis::default_single_reception();
    }

    let mode_str = value.get("collaboration_mode").and_then(Value::as_str);
    let collaboration_mode = match mode_str {
        Some("parallel") => CollaborationMode::Parallel,
        Some("sequential") => CollaborationMode::Sequential,
        Some("consultation") => CollaborationMode::Consultation,
        Some("single") => CollaborationMode::Single,
        _ => {
            if normalized.len() > 1 {
                CollaborationMode::Parallel
            } else {
                CollaborationMode::Single
            }
        }
    };

    let fallback_agent = normalized
        .iter()
        .find(|a| a.role == AgentRole::Primary)
        .map(|a| a.agent_id.clone())
        .unwrap_or_else(|| "reception_agent".to_string());

    CollaborationAnalysis {
        requires_collaboration,
        reason,
        collaboration_mode,
        recommended_agents: normalized,
        task_priority: TaskPriority::Normal,
        fallback_agent,
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
    async fn llm_failure_returns_llm_adapter_failed_error() {
        let analyzer = CollaborationAnalyzer::new(Arc::new(ScriptedAdapter {
            reply: Err("boom".to_string()),
        }));
        let result = analyzer.analyze(&msg("hi"), &HashMap::new()).await;
        assert!(matches!(result, Err(DispatcherError::LlmAdapterFailed(_))));
    }

    #[tokio::test]
    async fn malformed_json_returns_analysis_parse_failed_error() {
        let analyzer = CollaborationAnalyzer::new(Arc::new(ScriptedAdapter {
            reply: Ok("I cannot produce JSON right now".to_string()),
        }));
        let result = analyzer.analyze(&msg("hi"), &HashMap::new()).await;
        assert!(matches!(result, Err(DispatcherError::AnalysisParseFailed(_))));
    }

    #[tokio::test]
    async fn parses_well_formed_reply() {
        let reply = r#"{
            "requires_collaboration": true,
            "reason": "sales intent",
            "collaboration_mode": "parallel",
            "recommended_agents": [
                {"agent_id": "sales_agent", "role": "primary"},
                {"agent_id": "knowledge_agent", "role": "support"}
            ]
        }"#;
        let analyzer = CollaborationAnalyzer::new(Arc::new(ScriptedAdapter { reply: Ok(reply.to_string()) }));
        let analysis = analyzer.analyze(&msg("我想买衬衫"), &HashMap::new()).await.unwrap();
        assert_eq!(analysis.primary_agent_id(), Some("sales_agent"));
        assert_eq!(analysis.support_agent_ids(), vec!["knowledge_agent".to_string()]);
        assert_eq!(analysis.collaboration_mode, CollaborationMode::Parallel);
    }

    #[tokio::test]
    async fn drops_unknown_agent_ids() {
        let reply = r#"{"recommended_agents": [{"agent_id": "mystery_agent", "role": "primary"}, {"agent_id": "sales_agent", "role": "support"}]}"#;
        let analyzer = CollaborationAnalyzer::new(Arc::new(ScriptedAdapter { reply: Ok(reply.to_string()) }));
        let analysis = analyzer.analyze(&msg("hi"), &HashMap::new()).await.unwrap();
        assert_eq!(analysis.primary_agent_id(), Some("sales_agent"));
    }

    #[test]
    fn bound_context_value_truncates_long_lists_with_sentinel() {
        let items: Vec<Value> = (0..80).map(|i| Value::from(i)).collect();
        let bounded = bound_context_value(&Value::Array(items), 1);
        let arr = bounded.as_array().unwrap();
        assert_eq!(arr.len(), MAX_CONTEXT_LIST_LEN + 1);
        assert!(arr.last().unwrap().as_str().unwrap().contains("30"));
    }

    #[test]
    fn bound_context_value_collapses_past_max_depth() {
        let deep = serde_json::json!({"a": {"b": {"c": {"d": "too deep"}}}});
        let bounded = bound_context_value(&deep, 1);
        // depth 1 = {"a": ...}, depth 2 = {"b": ...}, depth 3 collapses {"c": {...}}
        let inner = &bounded["a"]["b"]["c"];
        assert!(inner.is_string());
        assert_ne!(inner, &deep["a"]["b"]["c"]);
    }

    #[test]
    fn build_prompt_bounds_context_before_serializing() {
        let mut context = HashMap::new();
        let items: Vec<Value> = (0..200).map(|i| Value::from(i)).collect();
        context.insert("history".to_string(), Value::Array(items));
        let prompt = build_prompt(&msg("hi"), &context);
        assert!(prompt.contains("已截断"));
    }
}
