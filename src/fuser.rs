//! Response Fusion: turns an [`ExecutionResult`] into the single
//! [`AgentResponse`] handed back to the caller.
//!
//! Covers primary selection, support-content aggregation into metadata, the
//! one auto-concatenation case (sequential + styling primary + successful
//! sales support), and handoff detection.

use std::collections::HashMap;

use serde_json::Value;

use crate::executor::{ExecutionResult, InvocationOutcome, InvocationRole};
use crate::message::{AgentResponse, NextAction};
use crate::task::CollaborationMode;

const SALES_RECOMMENDATION_HEADING: &str = "\n\n——\n商品推荐（销售智能体）：\n";

/// Normalize a suggested-agent string to a known `*_agent` id, passing
/// through anything already in that form or unrecognized.
fn normalize_agent_id(suggestion: &str) -> String {
    match suggestion {
        "sales" => "sales_agent".to_string(),
        "order" => "order_agent".to_string(),
        "knowledge" => "knowledge_agent".to_string(),
        "styling" => "styling_agent".to_string(),
        other => other.to_string(),
    }
}

/// Fuses one [`ExecutionResult`] into a caller-facing [`AgentResponse`] and
/// reports whether a handoff should be armed on the session.
pub struct FusionOutcome {
    pub response: AgentResponse,
    pub handoff_target: Option<String>,
}

/// Fuse multi-agent results into one response.
pub fn fuse(result: &ExecutionResult) -> FusionOutcome {
    if result.results.is_empty() {
        return FusionOutcome {
            response: AgentResponse::new("没有找到合适的处理方式", "dispatcher")
                .with_confidence(0.2)
                .with_next_action(NextAction::HumanHandoff),
            handoff_target: None,
        };
    }

    let primary = result
        .results
        .iter()
        .find(|r| r.role == InvocationRole::Primary)
        .unwrap_or_else(|| result.results.last().unwrap());

    let primary_response = match &primary.outcome {
        InvocationOutcome::Success(response) => response.clone(),
        InvocationOutcome::Failure { agent_id, error, .. } => {
            AgentResponse::new(format!("抱歉，{} 暂时无法处理您的请求。", agent_id), agent_id.clone())
                .with_confidence(0.1)
                .with_next_action(NextAction::HumanHandoff)
                .with_metadata(HashMap::from([("error".to_string(), Value::String(error.clone()))]))
        }
    };

    let mut content = primary_response.content.clone();

    let support_contents: Vec<Value> = result
        .results
        .iter()
        .filter(|r| r.role == InvocationRole::Support)
        .map(|r| match &r.outcome {
            InvocationOutcome::Success(response) => serde_json::json!({
                "agent_id": r.agent_id,
                "content": response.content,
                "confidence": response.confidence,
            }),
            InvocationOutcome::Failure { agent_id, error, .. } => serde_json::json!({
                "agent_id": agent_id,
                "error": error,
            }),
        })
        .collect();

    // The one case where a support agent's content is spliced into the main
    // reply rather than left in metadata: sequential workflow, styling
    // primary, sales support succeeded.
    if result.workflow_type == CollaborationMode::Sequential && primary.agent_id == "styling_agent" {
        if let Some(sales_content) = result.results.iter().find_map(|r| {
            if r.agent_id == "sales_agent" && r.role == InvocationRole::Support {
                match &r.outcome {
                    InvocationOutcome::Success(response) if !response.content.is_empty() => Some(response.content.clone()),
                    _ => None,
                }
            } else {
                None
            }
        }) {
            content.push_str(SALES_RECOMMENDATION_HEADING);
            content.push_str(&sales_content);
        }
    }

    let participating_agents: Vec<String> = result.results.iter().map(|r| r.agent_id.clone()).collect();

    let mut metadata = primary_response.metadata.clone();
    metadata.insert(
        "collaboration_info".to_string(),
        serde_json::json!({
            "task_id": result.task_id,
            "workflow_type": result.workflow_type,
            "participating_agents": participating_agents,
            "collaboration_success": true,
            "support_contents": support_contents,
        }),
    );

    let response = AgentResponse {
        content,
        agent_id: primary.agent_id.clone(),
        confidence: primary_response.confidence,
        next_action: primary_response.next_action,
        suggested_agents: primary_response.suggested_agents.clone(),
        requires_human: primary_response.requires_human,
        intent_type: primary_response.intent_type,
        escalation_reason: primary_response.escalation_reason.clone(),
        metadata,
        timestamp: chrono::Utc::now(),
    };

    let handoff_target = if response.next_action == Some(NextAction::Transfer) && !response.suggested_agents.is_empty() {
        Some(normalize_agent_id(&response.suggested_agents[0]))
    } else {
        None
    };

    FusionOutcome { response, handoff_target }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InvocationResult;

    fn success(agent_id: &str, role: InvocationRole, content: &str) -> InvocationResult {
        InvocationResult {
            agent_id: agent_id.to_string(),
            role,
            outcome: InvocationOutcome::Success(AgentResponse::new(content, agent_id)),
        }
    }

    #[test]
    fn empty_results_produce_human_handoff_response() {
        let result = ExecutionResult {
            task_id: "collab-x".to_string(),
            workflow_type: CollaborationMode::Single,
            results: vec![],
        };
        let outcome = fuse(&result);
        assert_eq!(outcome.response.next_action, Some(NextAction::HumanHandoff));
    }

    #[test]
    fn sequential_styling_primary_appends_sales_recommendation() {
        let result = ExecutionResult {
            task_id: "collab-1".to_string(),
            workflow_type: CollaborationMode::Sequential,
            results: vec![
                success("styling_agent", InvocationRole::Primary, "建议穿浅色系"),
                success("sales_agent", InvocationRole::Support, "这件衬衫很合适"),
            ],
        };
        let outcome = fuse(&result);
        assert!(outcome.response.content.contains("建议穿浅色系"));
        assert!(outcome.response.content.contains("商品推荐（销售智能体）"));
        assert!(outcome.response.content.contains("这件衬衫很合适"));
    }

    #[test]
    fn parallel_workflow_does_not_splice_support_content() {
        let result = ExecutionResult {
            task_id: "collab-2".to_string(),
            workflow_type: CollaborationMode::Parallel,
            results: vec![
                success("sales_agent", InvocationRole::Primary, "推荐这件外套"),
                success("knowledge_agent", InvocationRole::Support, "材质是纯棉"),
            ],
        };
        let outcome = fuse(&result);
        assert_eq!(outcome.response.content, "推荐这件外套");
        let info = outcome.response.metadata.get("collaboration_info").unwrap();
        assert_eq!(info["support_contents"][0]["content"], "材质是纯棉");
    }

    #[test]
    fn transfer_next_action_arms_a_handoff() {
        let mut response = AgentResponse::new("请稍等，为您转接", "reception_agent");
        response.next_action = Some(NextAction::Transfer);
        response.suggested_agents = vec!["sales".to_string()];
        let result = ExecutionResult {
            task_id: "collab-3".to_string(),
            workflow_type: CollaborationMode::Single,
            results: vec![InvocationResult {
                agent_id: "reception_agent".to_string(),
                role: InvocationRole::Primary,
                outcome: InvocationOutcome::Success(response),
            }],
        };
        let outcome = fuse(&result);
        assert_eq!(outcome.handoff_target, Some("sales_agent".to_string()));
    }

    #[test]
    fn failed_primary_becomes_low_confidence_human_handoff() {
        let result = ExecutionResult {
            task_id: "collab-4".to_string(),
            workflow_type: CollaborationMode::Single,
            results: vec![InvocationResult {
                agent_id: "reception_agent".to_string(),
                role: InvocationRole::Primary,
                outcome: InvocationOutcome::Failure {
                    agent_id: "reception_agent".to_string(),
                    role: InvocationRole::Primary,
                    error: "timed out".to_string(),
                },
            }],
        };
        let outcome = fuse(&result);
        assert_eq!(outcome.response.confidence, 0.1);
        assert_eq!(outcome.response.next_action, Some(NextAction::HumanHandoff));
    }
}
