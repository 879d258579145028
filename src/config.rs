//! Runtime configuration for the dispatcher.
//!
//! Intentionally minimal, following [`crate::cloudllm::config::CloudLLMConfig`]'s
//! stance: no TOML/YAML/config-file parsing crate. Values are read once from
//! environment variables with sensible fallbacks.

use std::time::Duration;

/// Environment-sourced knobs for session eviction and call timeouts.
///
/// # Example
///
/// ```rust
/// use collab_dispatcher::config::DispatcherConfig;
///
/// let config = DispatcherConfig::default();
/// assert_eq!(config.agent_timeout, std::time::Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// `SESSION_IDLE_HOURS`, default 24.
    pub session_idle: Duration,
    /// `TURN_TIMEOUT_SECONDS`, default 60.
    pub turn_timeout: Duration,
    /// `AGENT_TIMEOUT_SECONDS`, default 30.
    pub agent_timeout: Duration,
}

fn read_env_secs(var: &str, default_secs: u64) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

// `SESSION_IDLE_HOURS` is expressed in hours, unlike the other two (seconds),
// so it needs its own conversion rather than `read_env_secs`.
fn read_env_hours(var: &str, default_hours: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default_hours)
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DispatcherConfig {
    /// Read configuration from the environment, same as [`Default::default`].
    pub fn from_env() -> Self {
        Self {
            session_idle: Duration::from_secs(read_env_hours("SESSION_IDLE_HOURS", 24) * 3600),
            turn_timeout: read_env_secs("TURN_TIMEOUT_SECONDS", 60),
            agent_timeout: read_env_secs("AGENT_TIMEOUT_SECONDS", 30),
        }
    }
}
