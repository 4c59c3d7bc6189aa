//! Configuration for debates.
//!
//! [`DebateSettings`] carries the user-level knobs (round cap, preferred
//! stack, observer port, agents). [`DispatchTimings`] controls how long the
//! engine waits on the external runtime. Users construct both manually; no
//! config-file parsing lives in this crate.
//!
//! # Example
//!
//! ```rust
//! use debatellm::config::{AgentConfig, DebateSettings};
//!
//! let settings = DebateSettings {
//!     agents: vec![
//!         AgentConfig::parse_flag("Architect=anthropic/claude-sonnet", 0).unwrap(),
//!         AgentConfig::parse_flag("openai/gpt-4o", 1).unwrap(),
//!     ],
//!     ..DebateSettings::default()
//! };
//!
//! assert_eq!(settings.max_rounds, 10);
//! assert_eq!(settings.agents[1].name, "Agent-2");
//! ```

use crate::debatellm::runtime::ModelRef;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Default safety cap on debate rounds.
pub const DEFAULT_MAX_ROUNDS: usize = 10;

/// Default port for the observer server.
pub const DEFAULT_HTTP_PORT: u16 = 3002;

/// One debate participant: a display name bound to a provider/model pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub name: String,
    #[serde(rename = "providerID")]
    pub provider_id: String,
    #[serde(rename = "modelID")]
    pub model_id: String,
}

impl AgentConfig {
    pub fn new(
        name: impl Into<String>,
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            provider_id: provider_id.into(),
            model_id: model_id.into(),
        }
    }

    /// Parse an agent flag of the form `provider/model` or
    /// `name=provider/model`.
    ///
    /// Unnamed agents are called `Agent-<index + 1>`. Only the first `/`
    /// splits provider from model, so model ids may contain slashes.
    pub fn parse_flag(value: &str, index: usize) -> Result<Self, ConfigError> {
        let (name, provider_model) = match value.find('=') {
            Some(eq) if eq > 0 => (value[..eq].to_string(), &value[eq + 1..]),
            _ => (format!("Agent-{}", index + 1), value),
        };

        match provider_model.find('/') {
            Some(slash) if slash > 0 && slash + 1 < provider_model.len() => Ok(Self {
                name,
                provider_id: provider_model[..slash].to_string(),
                model_id: provider_model[slash + 1..].to_string(),
            }),
            _ => Err(ConfigError::InvalidAgent(value.to_string())),
        }
    }

    pub fn model(&self) -> ModelRef {
        ModelRef {
            provider_id: self.provider_id.clone(),
            model_id: self.model_id.clone(),
        }
    }
}

/// User-facing debate settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebateSettings {
    /// Safety cap on rounds.
    pub max_rounds: usize,
    /// Preferred technology stack, passed to agents as a hint.
    pub stack: Option<String>,
    /// Debate participants in configured order.
    pub agents: Vec<AgentConfig>,
    /// Port the observer server binds to.
    pub http_port: u16,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            stack: None,
            agents: Vec::new(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

/// Timing knobs for waiting on the external runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTimings {
    /// Pause after firing a prompt before the first status poll.
    pub initial_delay: Duration,
    /// Pause between status polls.
    pub poll_interval: Duration,
    /// How long to wait for a busy signal before falling back to polling
    /// messages directly.
    pub busy_grace: Duration,
    /// Overall bound on one prompt's wait.
    pub timeout: Duration,
    /// Attempts to find assistant text once the session reports idle.
    pub extraction_attempts: usize,
    /// Pause between extraction attempts.
    pub extraction_retry_delay: Duration,
}

impl Default for DispatchTimings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            poll_interval: Duration::from_secs(2),
            busy_grace: Duration::from_secs(10),
            timeout: Duration::from_secs(600),
            extraction_attempts: 3,
            extraction_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Invalid user configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An agent flag did not match `provider/model` or `name=provider/model`.
    InvalidAgent(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidAgent(value) => write!(
                f,
                "Invalid agent format: \"{}\". Use \"provider/model\" or \"name=provider/model\"",
                value
            ),
        }
    }
}

impl Error for ConfigError {}
