//! Agent sessions and prompt dispatch.
//!
//! [`SessionManager`] creates one long-lived runtime session per agent before
//! the first round; the session is reused for every later round, so the
//! conversation history lives inside the runtime.
//!
//! [`PromptDispatcher::send_and_wait`] turns the runtime's fire-and-forget
//! prompt API into a blocking call:
//!
//! 1. Count the session's messages, then fire the prompt.
//! 2. Poll the session status. A busy → idle transition means the turn is
//!    done. Some providers never report busy, so once
//!    [`DispatchTimings::busy_grace`] has passed without a busy signal the
//!    dispatcher also accepts any new assistant message carrying text.
//! 3. Give up with [`DispatchError::Timeout`] after
//!    [`DispatchTimings::timeout`].
//! 4. Extract the reply from the messages that appeared after the prompt,
//!    retrying a few times because a session can report idle before its
//!    final message has all of its parts.
//!
//! Providers put assistant text in different places, so extraction walks an
//! ordered set of fallbacks: typed `text` parts, then any part with a `text`
//! field, then a message-level `content` field.

use crate::debatellm::config::{AgentConfig, DispatchTimings};
use crate::debatellm::runtime::{AgentRuntime, ModelRef, PromptRequest, SessionOptions};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Prefix of every session title created for an agent.
pub const SESSION_TITLE_PREFIX: &str = "debatellm";

/// Failure of one agent's prompt/wait cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The runtime refused to create the agent's session.
    Session { agent: String, message: String },
    /// The turn did not complete within the configured bound.
    Timeout { session_id: String, waited: Duration },
    /// The session went idle but no assistant text ever appeared.
    NoResponse {
        session_id: String,
        messages_before: usize,
        messages_after: usize,
    },
    /// Any other runtime failure while sending or fetching.
    Runtime(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Session { agent, message } => {
                write!(f, "Failed to create session for {}: {}", agent, message)
            }
            DispatchError::Timeout { session_id, waited } => write!(
                f,
                "Timeout waiting for session {} after {}s",
                session_id,
                waited.as_secs()
            ),
            DispatchError::NoResponse {
                session_id,
                messages_before,
                messages_after,
            } => write!(
                f,
                "No assistant response found in session {} (had {} msgs, now {})",
                session_id, messages_before, messages_after
            ),
            DispatchError::Runtime(message) => write!(f, "Runtime error: {}", message),
        }
    }
}

impl Error for DispatchError {}

/// An agent bound to its runtime session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSession {
    pub agent: AgentConfig,
    pub session_id: String,
}

/// Title given to an agent's session.
pub fn session_title(agent_name: &str) -> String {
    format!("{}-{}", SESSION_TITLE_PREFIX, agent_name)
}

/// Creates the per-agent sessions for a debate.
pub struct SessionManager {
    runtime: Arc<dyn AgentRuntime>,
}

impl SessionManager {
    pub fn new(runtime: Arc<dyn AgentRuntime>) -> Self {
        Self { runtime }
    }

    /// Create one session per agent, in configured order. Stops at the first
    /// failure.
    pub async fn create_sessions(
        &self,
        agents: &[AgentConfig],
        options: &SessionOptions,
    ) -> Result<Vec<AgentSession>, DispatchError> {
        let mut sessions = Vec::with_capacity(agents.len());
        for agent in agents {
            let handle = self
                .runtime
                .create_session(&session_title(&agent.name), options)
                .await
                .map_err(|e| DispatchError::Session {
                    agent: agent.name.clone(),
                    message: e.to_string(),
                })?;
            log::info!(
                "Created session {} for agent {} ({}/{})",
                handle.id,
                agent.name,
                agent.provider_id,
                agent.model_id
            );
            sessions.push(AgentSession {
                agent: agent.clone(),
                session_id: handle.id,
            });
        }
        Ok(sessions)
    }

    /// `sessionId -> agentName` lookup used to demultiplex the activity feed.
    pub fn session_map(sessions: &[AgentSession]) -> HashMap<String, String> {
        sessions
            .iter()
            .map(|s| (s.session_id.clone(), s.agent.name.clone()))
            .collect()
    }
}

/// Sends prompts and blocks until the agent's reply text is available.
#[derive(Clone)]
pub struct PromptDispatcher {
    runtime: Arc<dyn AgentRuntime>,
    timings: DispatchTimings,
}

impl PromptDispatcher {
    pub fn new(runtime: Arc<dyn AgentRuntime>, timings: DispatchTimings) -> Self {
        Self { runtime, timings }
    }

    pub fn timings(&self) -> &DispatchTimings {
        &self.timings
    }

    /// Fire a prompt at `session_id` and wait for the assistant's text reply.
    pub async fn send_and_wait(
        &self,
        session_id: &str,
        model: &ModelRef,
        system: &str,
        text: &str,
        enable_tools: bool,
    ) -> Result<String, DispatchError> {
        let messages_before = self.messages(session_id).await?.len();

        let request = PromptRequest {
            session_id: session_id.to_string(),
            model: model.clone(),
            system: system.to_string(),
            text: text.to_string(),
            enable_tools,
        };
        self.runtime
            .send_prompt(&request)
            .await
            .map_err(|e| DispatchError::Runtime(e.to_string()))?;

        self.wait_for_completion(session_id, messages_before).await?;
        self.extract(session_id, messages_before).await
    }

    async fn messages(&self, session_id: &str) -> Result<Vec<Value>, DispatchError> {
        self.runtime
            .get_messages(session_id)
            .await
            .map_err(|e| DispatchError::Runtime(e.to_string()))
    }

    async fn wait_for_completion(
        &self,
        session_id: &str,
        messages_before: usize,
    ) -> Result<(), DispatchError> {
        let start = Instant::now();
        let mut saw_busy = false;

        sleep(self.timings.initial_delay).await;

        loop {
            match self.runtime.session_status().await {
                Ok(statuses) => {
                    let busy = statuses
                        .get(session_id)
                        .map(|s| s.is_busy())
                        .unwrap_or(false);
                    if busy {
                        saw_busy = true;
                    } else if saw_busy {
                        log::debug!("Session {} went idle after {:?}", session_id, start.elapsed());
                        return Ok(());
                    }
                }
                // Transient status failures are bounded by the timeout.
                Err(e) => log::warn!("Status poll failed for session {}: {}", session_id, e),
            }

            if !saw_busy && start.elapsed() >= self.timings.busy_grace {
                if let Ok(messages) = self.runtime.get_messages(session_id).await {
                    if has_ready_reply(new_messages(&messages, messages_before)) {
                        log::debug!(
                            "Session {} never reported busy; found reply by polling messages",
                            session_id
                        );
                        return Ok(());
                    }
                }
            }

            if start.elapsed() >= self.timings.timeout {
                return Err(DispatchError::Timeout {
                    session_id: session_id.to_string(),
                    waited: start.elapsed(),
                });
            }

            sleep(self.timings.poll_interval).await;
        }
    }

    async fn extract(&self, session_id: &str, messages_before: usize) -> Result<String, DispatchError> {
        let attempts = self.timings.extraction_attempts.max(1);
        let mut messages = self.messages(session_id).await?;

        for attempt in 1..=attempts {
            if let Some(text) = extract_reply(new_messages(&messages, messages_before)) {
                return Ok(text);
            }
            if attempt < attempts {
                sleep(self.timings.extraction_retry_delay).await;
                messages = self.messages(session_id).await?;
            }
        }

        log::debug!(
            "No assistant text in session {}:\n{}",
            session_id,
            describe_messages(&messages)
        );
        Err(DispatchError::NoResponse {
            session_id: session_id.to_string(),
            messages_before,
            messages_after: messages.len(),
        })
    }
}

/// Messages that appeared after the first `before` entries.
pub fn new_messages(messages: &[Value], before: usize) -> &[Value] {
    &messages[before.min(messages.len())..]
}

fn role(message: &Value) -> Option<&str> {
    message
        .get("info")
        .and_then(|info| info.get("role"))
        .or_else(|| message.get("role"))
        .and_then(Value::as_str)
}

fn parts(message: &Value) -> &[Value] {
    message
        .get("parts")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn is_text_part(part: &Value) -> bool {
    part.get("type").and_then(Value::as_str) == Some("text")
}

/// `true` when any assistant message carries a non-empty typed text part.
pub fn has_ready_reply(messages: &[Value]) -> bool {
    messages.iter().any(|m| {
        role(m) == Some("assistant")
            && parts(m)
                .iter()
                .any(|p| is_text_part(p) && non_empty_str(p.get("text")).is_some())
    })
}

/// Text of the most recent assistant message that has any.
///
/// Assistant messages without text (error or step markers only) are skipped
/// in favour of earlier ones.
pub fn extract_reply(messages: &[Value]) -> Option<String> {
    messages
        .iter()
        .rev()
        .filter(|m| role(m) == Some("assistant"))
        .find_map(message_text)
        .map(str::to_string)
}

fn message_text(message: &Value) -> Option<&str> {
    let parts = parts(message);

    let typed = parts
        .iter()
        .filter(|p| is_text_part(p))
        .last()
        .and_then(|p| non_empty_str(p.get("text")));

    typed
        .or_else(|| parts.iter().find_map(|p| non_empty_str(p.get("text"))))
        .or_else(|| non_empty_str(message.get("info").and_then(|i| i.get("content"))))
        .or_else(|| non_empty_str(message.get("content")))
}

fn describe_messages(messages: &[Value]) -> String {
    messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let part_types: Vec<&str> = parts(m)
                .iter()
                .map(|p| p.get("type").and_then(Value::as_str).unwrap_or("?"))
                .collect();
            format!(
                "  msg[{}] role={} parts=[{}]",
                i,
                role(m).unwrap_or("unknown"),
                part_types.join(",")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
