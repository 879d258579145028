// src/lib.rs

//! Dispatcher + Collaboration Engine core for a multi-agent customer-service
//! system: routes one inbound message to one or more specialist agents,
//! fuses their responses, and tracks session and performance state across
//! turns.
//!
//! Built on top of the `cloudllm` LLM client layer (kept in-tree as
//! `cloudllm`), which supplies the provider wire formats
//! ([`cloudllm::client_wrapper::ClientWrapper`]) the dispatcher's
//! [`llm_adapter::FallbackLlmClient`] wraps.

pub mod cloudllm;

pub mod agent;
pub mod analyzer;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod fuser;
pub mod json_repair;
pub mod llm_adapter;
pub mod message;
pub mod metrics;
pub mod overrides;
pub mod session;
pub mod task;

pub use agent::{AgentRegistry, LlmBackedAgent, SpecialistAgent};
pub use config::DispatcherConfig;
pub use dispatcher::Dispatcher;
pub use error::DispatcherError;
pub use llm_adapter::{FallbackLlmClient, LlmAdapter};
pub use message::{AgentResponse, IntentType, Message, NextAction, Priority};
