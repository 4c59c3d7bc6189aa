//! Contract with the external agent runtime.
//!
//! The debate engine never talks to model providers directly. It drives an
//! agent runtime that owns conversational sessions: it creates one session
//! per agent, fires prompts into it, polls its status and messages, and
//! subscribes to a single raw activity feed shared by every session.
//!
//! The contract is deliberately loose about message shapes: providers put
//! assistant text in different places, so messages are exposed as raw JSON
//! and interpreted by [`session`](crate::session).
//!
//! A runtime handle is constructed once, shared as `Arc<dyn AgentRuntime>`
//! with every component that needs it, and released with
//! [`AgentRuntime::shutdown`].
//!
//! See [`OpencodeRuntime`](crate::clients::opencode::OpencodeRuntime) for the
//! HTTP implementation.

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::pin::Pin;

/// Read-only tools granted to agents exploring a project directory.
pub const EXPLORATION_TOOLS: &[&str] = &["read", "glob", "grep", "codesearch"];

/// Boxed error type used across the runtime contract.
pub type RuntimeError = Box<dyn Error + Send + Sync>;

/// The shared raw activity feed.
pub type RuntimeEventStream = Pin<Box<dyn Stream<Item = Result<RuntimeEvent, RuntimeError>> + Send>>;

/// Handle to a conversational session owned by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

/// Options applied when a session is created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Working directory the session's tools operate in.
    pub directory: Option<PathBuf>,
    /// Grant [`EXPLORATION_TOOLS`] to the session.
    pub enable_tools: bool,
}

/// Provider/model pair a prompt is routed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    #[serde(rename = "providerID")]
    pub provider_id: String,
    #[serde(rename = "modelID")]
    pub model_id: String,
}

/// A prompt submitted to a session. Delivery is fire-and-forget; completion
/// is observed through [`AgentRuntime::session_status`] and
/// [`AgentRuntime::get_messages`].
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRequest {
    pub session_id: String,
    pub model: ModelRef,
    pub system: String,
    pub text: String,
    /// Enable [`EXPLORATION_TOOLS`] for this prompt.
    pub enable_tools: bool,
}

/// Activity status of one session as reported by the runtime.
///
/// Runtimes disagree on how they report activity: some send
/// `{"type": "busy"}`, others `{"active": true}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl SessionStatus {
    pub fn busy() -> Self {
        Self {
            kind: Some("busy".to_string()),
            active: None,
        }
    }

    pub fn idle() -> Self {
        Self {
            kind: Some("idle".to_string()),
            active: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.kind.as_deref() == Some("busy") || self.active == Some(true)
    }
}

/// One entry of the raw activity feed: `{type, properties}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub properties: serde_json::Value,
}

/// Provider listing as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderListing {
    /// Every provider the runtime knows about, with its model catalogue.
    #[serde(default)]
    pub all: Vec<ProviderInfo>,
    /// Ids of providers with working credentials.
    #[serde(default)]
    pub connected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub models: HashMap<String, serde_json::Value>,
}

impl ProviderListing {
    /// `true` when `provider_id` is connected and offers `model_id`.
    pub fn has_model(&self, provider_id: &str, model_id: &str) -> bool {
        self.connected.iter().any(|id| id == provider_id)
            && self
                .all
                .iter()
                .any(|p| p.id == provider_id && p.models.contains_key(model_id))
    }
}

/// The operations the debate engine consumes from an agent runtime.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Create a new conversational session.
    async fn create_session(
        &self,
        title: &str,
        options: &SessionOptions,
    ) -> Result<SessionHandle, RuntimeError>;

    /// Submit a prompt without waiting for the model to answer.
    async fn send_prompt(&self, request: &PromptRequest) -> Result<(), RuntimeError>;

    /// Current status of every session the runtime tracks, keyed by id.
    /// Sessions absent from the map are idle.
    async fn session_status(&self) -> Result<HashMap<String, SessionStatus>, RuntimeError>;

    /// All messages of a session in conversation order. Each message is a
    /// raw JSON object, typically `{"info": {...}, "parts": [...]}`.
    async fn get_messages(&self, session_id: &str) -> Result<Vec<serde_json::Value>, RuntimeError>;

    /// Subscribe to the raw activity feed shared by all sessions.
    async fn subscribe_events(&self) -> Result<RuntimeEventStream, RuntimeError>;

    /// Providers and models available to the runtime.
    async fn list_providers(&self) -> Result<ProviderListing, RuntimeError>;

    /// Release any resources held by the runtime handle.
    async fn shutdown(&self) -> Result<(), RuntimeError> {
        Ok(())
    }
}
