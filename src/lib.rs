//! # DebateLLM
//!
//! DebateLLM runs structured design debates between independently hosted LLM agents. Each
//! agent proposes a technical specification, then critiques the other agents' proposals
//! round after round until every agent approves twice in a row or a round cap is reached.
//!
//! The crate provides carefully layered pieces for:
//!
//! * **Tolerant Parsing**: [`parser`] turns free-text model output into a validated
//!   [`Response`], recovering from fences, wrapper objects and verdict synonyms
//! * **Convergence**: [`convergence`] is a pure reducer tracking the unanimous-approval streak
//!   and the round cap
//! * **Consensus**: [`consensus`] aggregates every agent's per-section verdicts into agreed and
//!   disputed sections
//! * **Agent Dispatch**: [`session`] creates one long-lived session per agent and turns the
//!   runtime's fire-and-forget prompts into blocking calls with timeouts
//! * **Live Observation**: [`broadcaster`] and [`event_forwarder`] stream agent output and
//!   round results to any number of observers, replaying current state to late joiners
//! * **Runtimes**: the [`AgentRuntime`] trait abstracts the agent host; [`clients::opencode`]
//!   implements it over an OpenCode HTTP server
//!
//! ## Running a Debate
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use debatellm::broadcaster::Broadcaster;
//! use debatellm::clients::opencode::OpencodeRuntime;
//! use debatellm::config::AgentConfig;
//! use debatellm::debate::{Debate, DebateConfig};
//! use debatellm::runtime::AgentRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     debatellm::init_logger();
//!
//!     let runtime = Arc::new(OpencodeRuntime::launch(4096, None).await?);
//!     let broadcaster = Arc::new(Broadcaster::new());
//!
//!     let config = DebateConfig::new(
//!         "A collaborative markdown editor with realtime presence",
//!         vec![
//!             AgentConfig::parse_flag("Architect=anthropic/claude-sonnet-4-5", 0)?,
//!             AgentConfig::parse_flag("Critic=openai/gpt-5", 1)?,
//!         ],
//!     )
//!     .with_max_rounds(5);
//!
//!     let result = Debate::new(runtime.clone(), config)
//!         .with_event_handler(broadcaster.clone())
//!         .run()
//!         .await?;
//!
//!     println!(
//!         "{} after {} rounds",
//!         if result.is_converged() { "Converged" } else { "Aborted" },
//!         result.rounds.len()
//!     );
//!     for section in &result.consensus {
//!         println!("[{}] {}", if section.agreed { "agreed" } else { "disputed" }, section.title);
//!     }
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Watching a Debate
//!
//! Any [`EventHandler`] receives the typed event feed. The [`Broadcaster`] fans it out to
//! observers and replays the latest `status`, `agent_error`, `round_complete` and
//! `debate_complete` events to observers that connect late. With the `server` feature the
//! `server` module exposes the feed over a WebSocket at `/ws` and the final result at
//! `/result`.
//!
//! ```rust
//! use debatellm::broadcaster::Broadcaster;
//! use debatellm::event::{DebateEvent, StatusPayload};
//!
//! let broadcaster = Broadcaster::new();
//! broadcaster.broadcast(DebateEvent::Status(StatusPayload {
//!     round: 1,
//!     max_rounds: 10,
//!     status: "debating".into(),
//!     agents: vec!["Architect".into(), "Critic".into()],
//! }));
//!
//! // A late observer still learns which round is running.
//! let mut observer = broadcaster.connect();
//! assert!(matches!(observer.try_recv(), Some(DebateEvent::Status(_))));
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding DebateLLM can opt in to `RUST_LOG` driven diagnostics without
/// choosing a logging backend up front.
///
/// ```rust
/// debatellm::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `debatellm` module.
pub mod debatellm;

// Re-exporting key items for easier external access.
pub use debatellm::broadcaster;
pub use debatellm::broadcaster::{Broadcaster, Observer};
pub use debatellm::clients;
pub use debatellm::config;
pub use debatellm::config::{AgentConfig, DebateSettings, DispatchTimings};
pub use debatellm::consensus;
pub use debatellm::consensus::ConsensusSection;
pub use debatellm::convergence;
pub use debatellm::convergence::{ConvergenceReason, ConvergenceState};
pub use debatellm::debate;
pub use debatellm::debate::{Debate, DebateConfig, DebateError, DebateOutcome, DebateResult};
pub use debatellm::event;
pub use debatellm::event::{DebateEvent, EventHandler};
pub use debatellm::event_forwarder;
pub use debatellm::parser;
pub use debatellm::parser::{parse_response, ParseError};
pub use debatellm::prompts;
pub use debatellm::response;
pub use debatellm::response::{Response, Section, Verdict};
pub use debatellm::runtime;
pub use debatellm::runtime::AgentRuntime;
#[cfg(feature = "server")]
pub use debatellm::server;
pub use debatellm::session;
pub use debatellm::session::{DispatchError, PromptDispatcher, SessionManager};
