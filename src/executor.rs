//! The Workflow Executor: runs a [`CollaborationTask`] against the
//! [`AgentRegistry`] in single/parallel/sequential/consultation mode, using a
//! `tokio::spawn`-per-agent plus ordered-collect pattern to keep results
//! deterministic regardless of completion order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::agent::AgentRegistry;
use crate::error::DispatcherError;
use crate::message::{AgentResponse, Message};
use crate::task::{CollaborationMode, CollaborationTask};

/// Role tag carried alongside each invocation's outcome, so the fuser can
/// tell primary from support results after they're collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationRole {
    Primary,
    Support,
}

/// The outcome of invoking one agent: either its response, or an isolated
/// failure that does not abort the rest of the batch.
#[derive(Debug, Clone)]
pub enum InvocationOutcome {
    Success(AgentResponse),
    Failure { agent_id: String, role: InvocationRole, error: String },
}

/// One agent's outcome, tagged with its role for the fuser.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub agent_id: String,
    pub role: InvocationRole,
    pub outcome: InvocationOutcome,
}

/// Everything the fuser needs: the task's workflow type and every agent's
/// outcome, in deterministic order (primary first, then supports in
/// recommendation order — independent of which finished first).
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub task_id: String,
    pub workflow_type: CollaborationMode,
    pub results: Vec<InvocationResult>,
}

/// Runs [`CollaborationTask`]s against a shared [`AgentRegistry`].
pub struct WorkflowExecutor {
    registry: Arc<AgentRegistry>,
    agent_timeout: Duration,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<AgentRegistry>, agent_timeout: Duration) -> Self {
        Self { registry, agent_timeout }
    }

    /// Invoke one agent with a bounded timeout, isolating "not found",
    /// "timed out", and any `DispatcherError` the agent's `handle` raises
    /// into a failed [`InvocationOutcome`] rather than letting it escape
    /// `execute` or panic the turn.
    async fn invoke(
        &self,
        agent_id: &str,
        role: InvocationRole,
        message: &Message,
        context: &HashMap<String, Value>,
    ) -> InvocationResult {
        let Some(agent) = self.registry.get(agent_id) else {
            return InvocationResult {
                agent_id: agent_id.to_string(),
                role,
                outcome: InvocationOutcome::Failure {
                    agent_id: agent_id.to_string(),
                    role,
                    error: DispatcherError::AgentNotFound(agent_id.to_string()).to_string(),
                },
            };
        };

        let message = message.clone();
        let context = context.clone();
        let fut = async move { agent.handle(&message, &context).await };

        match tokio::time::timeout(self.agent_timeout, fut).await {
            Ok(Ok(response)) => InvocationResult {
                agent_id: agent_id.to_string(),
                role,
                outcome: InvocationOutcome::Success(response),
            },
            Ok(Err(e)) => InvocationResult {
                agent_id: agent_id.to_string(),
                role,
                outcome: InvocationOutcome::Failure {
                    agent_id: agent_id.to_string(),
                    role,
                    error: e.to_string(),
                },
            },
            Err(_) => {
                log::warn!("agent '{}' timed out after {:?}", agent_id, self.agent_timeout);
                InvocationResult {
                    agent_id: agent_id.to_string(),
                    role,
                    outcome: InvocationOutcome::Failure {
                        agent_id: agent_id.to_string(),
                        role,
                        error: DispatcherError::Timeout { agent_id: agent_id.to_string() }.to_string(),
                    },
                }
            }
        }
    }

    /// Run every support agent concurrently against `message`, preserving
    /// `support_ids`'s order in the returned `Vec` regardless of completion
    /// order.
    async fn invoke_supports_concurrently(
        &self,
        support_ids: &[String],
        message: &Message,
        context: &HashMap<String, Value>,
    ) -> Vec<InvocationResult> {
        let mut handles = Vec::with_capacity(support_ids.len());
        for agent_id in support_ids {
            let agent_id = agent_id.clone();
            let registry = Arc::clone(&self.registry);
            let message = message.clone();
            let context = context.clone();
            let timeout = self.agent_timeout;

            handles.push(tokio::spawn(async move {
                let Some(agent) = registry.get(&agent_id) else {
                    return InvocationResult {
                        agent_id: agent_id.clone(),
                        role: InvocationRole::Support,
                        outcome: InvocationOutcome::Failure {
                            agent_id: agent_id.clone(),
                            role: InvocationRole::Support,
                            error: DispatcherError::AgentNotFound(agent_id.clone()).to_string(),
                        },
                    };
                };

                match tokio::time::timeout(timeout, agent.handle(&message, &context)).await {
                    Ok(Ok(response)) => InvocationResult {
                        agent_id: agent_id.clone(),
                        role: InvocationRole::Support,
                        outcome: InvocationOutcome::Success(response),
                    },
                    Ok(Err(e)) => InvocationResult {
                        agent_id: agent_id.clone(),
                        role: InvocationRole::Support,
                        outcome: InvocationOutcome::Failure {
                            agent_id: agent_id.clone(),
                            role: InvocationRole::Support,
                            error: e.to_string(),
                        },
                    },
                    Err(_) => InvocationResult {
                        agent_id: agent_id.clone(),
                        role: InvocationRole::Support,
                        outcome: InvocationOutcome::Failure {
                            agent_id: agent_id.clone(),
                            role: InvocationRole::Support,
                            error: DispatcherError::Timeout { agent_id: agent_id.clone() }.to_string(),
                        },
                    },
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (i, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_err) => results.push(InvocationResult {
                    agent_id: support_ids[i].clone(),
                    role: InvocationRole::Support,
                    outcome: InvocationOutcome::Failure {
                        agent_id: support_ids[i].clone(),
                        role: InvocationRole::Support,
                        error: format!("task join error: {}", join_err),
                    },
                }),
            }
        }
        results
    }

    /// Execute a [`CollaborationTask`], following
    /// `execute_collaboration_task`'s mode dispatch and its styling/sales
    /// safety net (a second enforcement point independent of override rule 9,
    /// since the task may have been built from an analysis the overrides
    /// never touched).
    ///
    /// Stays infallible by design: every `DispatcherError` an agent's
    /// `handle` raises is caught inside [`WorkflowExecutor::invoke`] (or its
    /// concurrent sibling) and turned into an `InvocationOutcome::Failure`
    /// before it ever reaches here, which is what lets a failed primary's
    /// supports still run and the fuser still produce a response.
    pub async fn execute(&self, task: &CollaborationTask) -> ExecutionResult {
        let mut support_agents = task.support_agents.clone();
        let mut workflow_type = task.workflow_type;

        if task.primary_agent == "styling_agent" && !support_agents.iter().any(|a| a == "sales_agent") {
            support_agents.push("sales_agent".to_string());
            workflow_type = CollaborationMode::Sequential;
        }

        let primary_result = self
            .invoke(&task.primary_agent, InvocationRole::Primary, &task.message, &task.context)
            .await;

        let mut results = vec![primary_result.clone()];

        if support_agents.is_empty() {
            return ExecutionResult {
                task_id: task.task_id.clone(),
                workflow_type,
                results,
            };
        }

        let support_results = match workflow_type {
            CollaborationMode::Sequential => {
                let derived_message = match &primary_result.outcome {
                    InvocationOutcome::Success(response) => {
                        let mut metadata = task.message.metadata.clone();
                        metadata.insert("source_agent".to_string(), Value::String(task.primary_agent.clone()));
                        metadata.insert(
                            "primary_response".to_string(),
                            serde_json::to_value(response).unwrap_or(Value::Null),
                        );
                        metadata.insert(
                            "original_message".to_string(),
                            serde_json::to_value(&task.message).unwrap_or(Value::Null),
                        );
                        task.message
                            .clone()
                            .with_content(response.content.clone())
                            .with_metadata(metadata)
                    }
                    InvocationOutcome::Failure { .. } => task.message.clone(),
                };
                self.invoke_supports_concurrently(&support_agents, &derived_message, &task.context).await
            }
            CollaborationMode::Parallel | CollaborationMode::Consultation | CollaborationMode::Single => {
                self.invoke_supports_concurrently(&support_agents, &task.message, &task.context).await
            }
        };

        results.extend(support_results);

        ExecutionResult {
            task_id: task.task_id.clone(),
            workflow_type,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::LlmBackedAgent;
    use crate::llm_adapter::test_support::ScriptedAdapter;
    use crate::message::Message;
    use crate::task::TaskPriority;

    fn agent(id: &str, reply: &str) -> Arc<dyn crate::agent::SpecialistAgent> {
        Arc::new(LlmBackedAgent::new(
            id,
            vec![],
            "system",
            Arc::new(ScriptedAdapter { reply: Ok(reply.to_string()) }),
        ))
    }

    fn registry_with(agents: Vec<Arc<dyn crate::agent::SpecialistAgent>>) -> Arc<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        for a in agents {
            registry.register(a);
        }
        Arc::new(registry)
    }

    fn task(primary: &str, supports: Vec<&str>, mode: CollaborationMode) -> CollaborationTask {
        CollaborationTask {
            task_id: "collab-test".to_string(),
            workflow_type: mode,
            primary_agent: primary.to_string(),
            support_agents: supports.into_iter().map(String::from).collect(),
            message: Message::new("hi", "user-1", "conv-1"),
            priority: TaskPriority::Normal,
            context: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn single_mode_invokes_only_primary() {
        let registry = registry_with(vec![agent("reception_agent", r#"{"content":"hi"}"#)]);
        let executor = WorkflowExecutor::new(registry, Duration::from_secs(5));
        let result = executor.execute(&task("reception_agent", vec![], CollaborationMode::Single)).await;
        assert_eq!(result.results.len(), 1);
    }

    #[tokio::test]
    async fn results_are_ordered_primary_first_then_supports_in_order() {
        let registry = registry_with(vec![
            agent("sales_agent", r#"{"content":"sales"}"#),
            agent("knowledge_agent", r#"{"content":"knowledge"}"#),
            agent("styling_agent", r#"{"content":"styling"}"#),
        ]);
        let executor = WorkflowExecutor::new(registry, Duration::from_secs(5));
        let result = executor
            .execute(&task("sales_agent", vec!["knowledge_agent", "styling_agent"], CollaborationMode::Parallel))
            .await;
        let ids: Vec<&str> = result.results.iter().map(|r| r.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["sales_agent", "knowledge_agent", "styling_agent"]);
    }

    #[tokio::test]
    async fn unregistered_support_agent_is_isolated_not_fatal() {
        let registry = registry_with(vec![agent("sales_agent", r#"{"content":"sales"}"#)]);
        let executor = WorkflowExecutor::new(registry, Duration::from_secs(5));
        let result = executor
            .execute(&task("sales_agent", vec!["ghost_agent"], CollaborationMode::Parallel))
            .await;
        assert_eq!(result.results.len(), 2);
        assert!(matches!(result.results[1].outcome, InvocationOutcome::Failure { .. }));
    }

    #[tokio::test]
    async fn styling_primary_without_sales_support_gets_sales_appended_sequentially() {
        let registry = registry_with(vec![
            agent("styling_agent", r#"{"content":"styling"}"#),
            agent("sales_agent", r#"{"content":"sales"}"#),
        ]);
        let executor = WorkflowExecutor::new(registry, Duration::from_secs(5));
        let result = executor.execute(&task("styling_agent", vec![], CollaborationMode::Sequential)).await;
        assert_eq!(result.workflow_type, CollaborationMode::Sequential);
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.results[1].agent_id, "sales_agent");
    }

    #[tokio::test]
    async fn sequential_derived_message_carries_primary_content_and_original_snapshot() {
        let registry = registry_with(vec![
            agent("styling_agent", r#"{"content":"pair it with black boots"}"#),
            agent("sales_agent", r#"{"content":"sales"}"#),
        ]);
        let executor = WorkflowExecutor::new(registry, Duration::from_secs(5));
        let t = task("styling_agent", vec!["sales_agent"], CollaborationMode::Sequential);
        let original_content = t.message.content.clone();
        let result = executor.execute(&t).await;

        // The support agent is an LlmBackedAgent whose scripted reply is fixed regardless
        // of input, so we instead assert on what invoke_supports_concurrently was actually
        // handed by reconstructing it the same way execute() does.
        let primary_response = match &result.results[0].outcome {
            InvocationOutcome::Success(r) => r.clone(),
            InvocationOutcome::Failure { .. } => panic!("primary should succeed"),
        };
        assert_eq!(primary_response.content, "pair it with black boots");

        let mut metadata = t.message.metadata.clone();
        metadata.insert("source_agent".to_string(), Value::String("styling_agent".to_string()));
        metadata.insert("primary_response".to_string(), serde_json::to_value(&primary_response).unwrap());
        metadata.insert("original_message".to_string(), serde_json::to_value(&t.message).unwrap());
        let derived = t.message.clone().with_content(primary_response.content.clone()).with_metadata(metadata);

        assert_eq!(derived.content, "pair it with black boots");
        assert_ne!(derived.content, original_content);
        assert_eq!(
            derived.metadata.get("original_message").and_then(|v| v.get("content")).and_then(|v| v.as_str()),
            Some(original_content.as_str())
        );
    }

    #[tokio::test]
    async fn unregistered_primary_is_isolated_and_supports_still_run() {
        let registry = registry_with(vec![agent("knowledge_agent", r#"{"content":"k"}"#)]);
        let executor = WorkflowExecutor::new(registry, Duration::from_secs(5));
        let result = executor
            .execute(&task("ghost_agent", vec!["knowledge_agent"], CollaborationMode::Parallel))
            .await;
        assert!(matches!(result.results[0].outcome, InvocationOutcome::Failure { .. }));
        assert!(matches!(result.results[1].outcome, InvocationOutcome::Success(_)));
    }
}
