//! LLM Adapter: a provider-fallback wrapper around
//! [`crate::cloudllm::client_wrapper::ClientWrapper`].
//!
//! The core does not reimplement provider wire formats — `cloudllm`'s
//! `ClientWrapper` implementations for OpenAI/Claude/Gemini/Grok already do
//! that. [`FallbackLlmClient`] adds the one thing the trait doesn't provide
//! on its own: trying more than one provider, in order, until one succeeds.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cloudllm::client_wrapper::{ClientWrapper, Message as LlmMessage, Role};

/// A chat request/response facade with built-in provider fallback.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Send `system_prompt` + `user_prompt` to the first provider that
    /// succeeds, returning its text content.
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String, String>;
}

/// Tries each [`ClientWrapper`] in order, returning the first success.
///
/// Each failure is logged at `WARN` and the next provider is attempted; if
/// every provider fails the last error message is returned.
pub struct FallbackLlmClient {
    providers: Vec<Arc<dyn ClientWrapper>>,
}

impl FallbackLlmClient {
    pub fn new(providers: Vec<Arc<dyn ClientWrapper>>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl LlmAdapter for FallbackLlmClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String, String> {
        if self.providers.is_empty() {
            return Err("no LLM providers configured".to_string());
        }

        let messages = [
            LlmMessage {
                role: Role::System,
                content: Arc::from(system_prompt),
                tool_calls: vec![],
            },
            LlmMessage {
                role: Role::User,
                content: Arc::from(user_prompt),
                tool_calls: vec![],
            },
        ];

        let mut last_error = String::new();
        for provider in &self.providers {
            match provider.send_message(&messages, None).await {
                Ok(response) => return Ok(response.content.to_string()),
                Err(e) => {
                    log::warn!("LLM provider {} failed, trying next: {}", provider.model_name(), e);
                    last_error = e.to_string();
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// A scripted [`ClientWrapper`] double, for analyzer/agent unit tests.
    pub struct ScriptedClient {
        pub model: String,
        pub reply: Result<String, String>,
    }

    #[async_trait]
    impl ClientWrapper for ScriptedClient {
        async fn send_message(
            &self,
            _messages: &[LlmMessage],
            _tools: Option<Vec<crate::cloudllm::client_wrapper::ToolDefinition>>,
        ) -> Result<LlmMessage, Box<dyn std::error::Error>> {
            match &self.reply {
                Ok(content) => Ok(LlmMessage {
                    role: Role::Assistant,
                    content: Arc::from(content.as_str()),
                    tool_calls: vec![],
                }),
                Err(e) => Err(e.clone().into()),
            }
        }

        fn model_name(&self) -> &str {
            &self.model
        }
    }

    /// A scripted [`LlmAdapter`] double that always returns the same reply.
    pub struct ScriptedAdapter {
        pub reply: Result<String, String>,
    }

    #[async_trait]
    impl LlmAdapter for ScriptedAdapter {
        async fn chat(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String, String> {
            self.reply.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedClient;
    use super::*;

    #[tokio::test]
    async fn falls_back_to_second_provider_on_first_failure() {
        let providers: Vec<Arc<dyn ClientWrapper>> = vec![
            Arc::new(ScriptedClient {
                model: "flaky".to_string(),
                reply: Err("rate limited".to_string()),
            }),
            Arc::new(ScriptedClient {
                model: "backup".to_string(),
                reply: Ok("hello from backup".to_string()),
            }),
        ];
        let client = FallbackLlmClient::new(providers);
        let result = client.chat("system", "user").await.unwrap();
        assert_eq!(result, "hello from backup");
    }

    #[tokio::test]
    async fn returns_last_error_when_all_providers_fail() {
        let providers: Vec<Arc<dyn ClientWrapper>> = vec![Arc::new(ScriptedClient {
            model: "only".to_string(),
            reply: Err("down".to_string()),
        })];
        let client = FallbackLlmClient::new(providers);
        let result = client.chat("system", "user").await;
        assert_eq!(result.unwrap_err(), "down");
    }

    #[tokio::test]
    async fn errors_with_no_providers() {
        let client = FallbackLlmClient::new(vec![]);
        assert!(client.chat("s", "u").await.is_err());
    }
}
