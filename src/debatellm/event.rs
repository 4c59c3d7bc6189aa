//! Debate event protocol and handler trait.
//!
//! Everything an external observer can learn about a running debate flows
//! through [`DebateEvent`], whose JSON form is the stable wire envelope
//! `{"type": ..., "payload": ...}`:
//!
//! | `type`            | payload                                         | replayed on connect |
//! |-------------------|-------------------------------------------------|---------------------|
//! | `status`          | `{round, maxRounds, status, agents}`            | yes                 |
//! | `agent_stream`    | `{agent, type, sessionId, data}`                | no (ephemeral)      |
//! | `agent_error`     | `{agent, error}`                                | yes                 |
//! | `round_complete`  | `{round, consensus, convergence, agents}`       | yes                 |
//! | `debate_complete` | `{consensus, convergence, agents}`              | yes                 |
//! | `error`           | `{message}`                                     | no                  |
//! | `export`          | free-form, produced by external collaborators  | no                  |
//!
//! # Event Flow (one debate)
//!
//! ```text
//! status { round: 1 }
//!   └─ agent_stream { data: streaming_start }   (one per agent)
//!   └─ agent_stream { data: text | reasoning }  (cumulative snapshots, many)
//!   └─ agent_error                              (only for failed agents)
//! round_complete { round: 1 }
//! status { round: 2 }
//!   ...
//! debate_complete                               (exactly once, last)
//! ```
//!
//! `agent_stream` text is the **cumulative** text of that part, not a diff:
//! consumers replace what they have rather than append.
//!
//! Implement [`EventHandler`] to receive events in-process; the
//! [`Broadcaster`](crate::broadcaster::Broadcaster) is the handler that fans
//! events out to any number of observers.

use crate::debatellm::consensus::ConsensusSection;
use crate::debatellm::convergence::ConvergenceState;
use crate::debatellm::response::{agent_map, AgentResponses};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Raw-feed event type that carries streamed part snapshots.
pub const PART_UPDATED: &str = "message.part.updated";

/// Wire envelope for observer events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum DebateEvent {
    Status(StatusPayload),
    AgentStream(AgentStreamPayload),
    AgentError(AgentErrorPayload),
    RoundComplete(RoundCompletePayload),
    DebateComplete(DebateCompletePayload),
    Error(ErrorPayload),
    Export(serde_json::Value),
}

/// Event category, used as the replay-cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Status,
    AgentStream,
    AgentError,
    RoundComplete,
    DebateComplete,
    Error,
    Export,
}

impl EventKind {
    /// Durable categories in replay order.
    pub const DURABLE: [EventKind; 4] = [
        EventKind::Status,
        EventKind::AgentError,
        EventKind::RoundComplete,
        EventKind::DebateComplete,
    ];

    /// Whether the latest event of this kind is cached and replayed to newly
    /// connected observers.
    pub fn is_durable(&self) -> bool {
        Self::DURABLE.contains(self)
    }
}

impl DebateEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DebateEvent::Status(_) => EventKind::Status,
            DebateEvent::AgentStream(_) => EventKind::AgentStream,
            DebateEvent::AgentError(_) => EventKind::AgentError,
            DebateEvent::RoundComplete(_) => EventKind::RoundComplete,
            DebateEvent::DebateComplete(_) => EventKind::DebateComplete,
            DebateEvent::Error(_) => EventKind::Error,
            DebateEvent::Export(_) => EventKind::Export,
        }
    }

    /// Serialize to the JSON wire envelope.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub round: usize,
    pub max_rounds: usize,
    pub status: String,
    pub agents: Vec<String>,
}

/// One streamed update for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStreamPayload {
    pub agent: String,
    /// Raw-feed event type the update came from.
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub data: StreamData,
}

/// Body of an `agent_stream` update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamData {
    /// The agent has been dispatched a prompt; clear any previous text.
    StreamingStart,
    /// Full current text of an assistant text part.
    Text { text: String },
    /// Full current text of an assistant reasoning part.
    Reasoning { reasoning: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentErrorPayload {
    pub agent: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundCompletePayload {
    pub round: usize,
    pub consensus: Vec<ConsensusSection>,
    pub convergence: ConvergenceState,
    /// Responses of the agents that succeeded, in configured order.
    #[serde(with = "agent_map")]
    pub agents: AgentResponses,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateCompletePayload {
    pub consensus: Vec<ConsensusSection>,
    pub convergence: ConvergenceState,
    /// Responses of the agents that succeeded, in configured order.
    #[serde(with = "agent_map")]
    pub agents: AgentResponses,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Receiver of debate events.
///
/// The `Send + Sync` bound lets one handler be shared between the debate
/// loop and the background event forwarder as `Arc<dyn EventHandler>`.
/// Handlers are awaited in emission order, so a handler observes events in
/// exactly the order the loop produced them.
///
/// # Example: Minimal Logger
///
/// ```rust
/// use debatellm::event::{DebateEvent, EventHandler};
/// use async_trait::async_trait;
///
/// struct Logger;
///
/// #[async_trait]
/// impl EventHandler for Logger {
///     async fn on_debate_event(&self, event: &DebateEvent) {
///         log::info!("{:?}", event.kind());
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called for every event. The default implementation ignores it.
    async fn on_debate_event(&self, _event: &DebateEvent) {}
}
