//! Domain data model for one conversational turn: the inbound [`Message`] and
//! the outbound [`AgentResponse`], plus the small enums that classify them.
//!
//! These are distinct from [`crate::cloudllm::client_wrapper::Message`], which
//! models a single LLM chat turn (system/user/assistant/tool). The types here
//! model a customer-service turn moving through the dispatcher.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a [`Message`] was authored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    System,
    AgentResponse,
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Text
    }
}

/// Caller-assigned urgency for a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    Medium,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Coarse intent classification attached to an [`AgentResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Greeting,
    ProductInquiry,
    SalesConsultation,
    OrderInquiry,
    SizeConsultation,
    StyleAdvice,
    Complaint,
    Other,
}

/// What the dispatcher or a calling UI should do next with an [`AgentResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Continue,
    Transfer,
    Clarify,
    Retry,
    Complete,
    HumanHandoff,
}

/// One inbound user (or system) message bound to a conversation.
///
/// Built once at the request boundary and treated as immutable for the
/// lifetime of the turn that processes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    pub sender_id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Construct a message with `now()` as its timestamp and default type/priority.
    pub fn new(content: impl Into<String>, sender_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender_id: sender_id.into(),
            conversation_id: conversation_id.into(),
            message_type: MessageType::default(),
            priority: Priority::default(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// A specialist agent's (or the fuser's) response to one [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub content: String,
    pub agent_id: String,
    pub confidence: f64,
    pub next_action: Option<NextAction>,
    #[serde(default)]
    pub suggested_agents: Vec<String>,
    #[serde(default)]
    pub requires_human: bool,
    pub intent_type: Option<IntentType>,
    pub escalation_reason: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl AgentResponse {
    pub fn new(content: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            agent_id: agent_id.into(),
            confidence: 0.8,
            next_action: Some(NextAction::Continue),
            suggested_agents: Vec::new(),
            requires_human: false,
            intent_type: None,
            escalation_reason: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_next_action(mut self, next_action: NextAction) -> Self {
        self.next_action = Some(next_action);
        self
    }

    pub fn with_suggested_agents(mut self, agents: Vec<String>) -> Self {
        self.suggested_agents = agents;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}
