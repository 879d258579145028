//! Analysis and task types that flow between the Analyzer, the override
//! pipeline, and the Executor.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;

/// A recommended agent's role within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Primary,
    Support,
}

/// How a turn's agents are composed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationMode {
    Single,
    Parallel,
    Sequential,
    Consultation,
}

/// Caller-facing urgency assigned by the analyzer/overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
}

/// One entry in `recommended_agents`: who, what role, how urgent, whether it
/// runs concurrently with the primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedAgent {
    pub agent_id: String,
    pub role: AgentRole,
    pub priority: u8,
    #[serde(default)]
    pub parallel: bool,
}

impl RecommendedAgent {
    pub fn primary(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            role: AgentRole::Primary,
            priority: 1,
            parallel: false,
        }
    }

    pub fn support(agent_id: impl Into<String>, priority: u8, parallel: bool) -> Self {
        Self {
            agent_id: agent_id.into(),
            role: AgentRole::Support,
            priority,
            parallel,
        }
    }
}

/// The Analyzer's recommendation for one turn, after LLM analysis and before
/// (or after) the override pipeline runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationAnalysis {
    pub requires_collaboration: bool,
    pub reason: String,
    pub collaboration_mode: CollaborationMode,
    pub recommended_agents: Vec<RecommendedAgent>,
    pub task_priority: TaskPriority,
    pub fallback_agent: String,
}

impl CollaborationAnalysis {
    /// The conservative default: reception handles alone, no collaboration.
    pub fn default_single_reception() -> Self {
        Self {
            requires_collaboration: false,
            reason: "默认单代理处理".to_string(),
            collaboration_mode: CollaborationMode::Single,
            recommended_agents: vec![RecommendedAgent::primary("reception_agent")],
            task_priority: TaskPriority::Normal,
            fallback_agent: "reception_agent".to_string(),
        }
    }

    pub fn primary_agent_id(&self) -> Option<&str> {
        self.recommended_agents
            .iter()
            .find(|a| a.role == AgentRole::Primary)
            .map(|a| a.agent_id.as_str())
    }

    pub fn support_agent_ids(&self) -> Vec<String> {
        self.recommended_agents
            .iter()
            .filter(|a| a.role == AgentRole::Support)
            .map(|a| a.agent_id.clone())
            .collect()
    }
}

/// A fully-built unit of work ready for the Executor.
#[derive(Debug, Clone)]
pub struct CollaborationTask {
    pub task_id: String,
    pub workflow_type: CollaborationMode,
    pub primary_agent: String,
    pub support_agents: Vec<String>,
    pub message: Message,
    pub priority: TaskPriority,
    pub context: HashMap<String, Value>,
}

/// Build a [`CollaborationTask`] from an analysis.
pub fn build_task(
    analysis: &CollaborationAnalysis,
    message: &Message,
    context: HashMap<String, Value>,
) -> CollaborationTask {
    let task_id = format!("collab-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    let primary_agent = analysis
        .primary_agent_id()
        .unwrap_or("reception_agent")
        .to_string();
    let support_agents = analysis.support_agent_ids();

    CollaborationTask {
        task_id,
        workflow_type: analysis.collaboration_mode,
        primary_agent,
        support_agents,
        message: message.clone(),
        priority: analysis.task_priority,
        context,
    }
}
