//! Dispatcher-wide error type.
//!
//! A plain enum with a hand-written [`std::fmt::Display`] and
//! [`std::error::Error`] impl, no `thiserror`.

use std::error::Error;
use std::fmt;

/// Errors surfaced by the collaboration engine's components.
///
/// Per the propagation policy, this type is used freely between components
/// (`Analyzer::analyze`, agent `handle` calls) but never escapes
/// [`crate::dispatcher::Dispatcher::process_turn`] — the dispatcher catches
/// every variant and converts it into a well-formed `AgentResponse`.
/// [`crate::executor::WorkflowExecutor::execute`] is the one boundary where a
/// `DispatcherError` (raised by `handle`) is caught one layer earlier still:
/// the executor isolates it into a per-agent `InvocationOutcome::Failure`
/// rather than letting it escape `execute` itself, so a single agent's
/// failure never aborts the rest of a collaboration.
#[derive(Debug)]
pub enum DispatcherError {
    /// `agent_id` referenced by a task does not exist in the registry.
    AgentNotFound(String),

    /// An agent's `handle` call returned an error or panicked inside its join.
    AgentInvocationFailed { agent_id: String, source: String },

    /// An agent invocation did not complete within its configured timeout.
    Timeout { agent_id: String },

    /// The LLM adapter failed (all providers exhausted, or transport error).
    LlmAdapterFailed(String),

    /// The LLM's analysis reply could not be parsed as JSON even after repair.
    AnalysisParseFailed(String),
}

impl fmt::Display for DispatcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatcherError::AgentNotFound(id) => write!(f, "agent not found: {}", id),
            DispatcherError::AgentInvocationFailed { agent_id, source } => {
                write!(f, "agent {} invocation failed: {}", agent_id, source)
            }
            DispatcherError::Timeout { agent_id } => write!(f, "agent {} timed out", agent_id),
            DispatcherError::LlmAdapterFailed(msg) => write!(f, "llm adapter failed: {}", msg),
            DispatcherError::AnalysisParseFailed(msg) => {
                write!(f, "collaboration analysis parse failed: {}", msg)
            }
        }
    }
}

impl Error for DispatcherError {}
