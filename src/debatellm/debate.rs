//! The round-by-round debate loop.
//!
//! A [`Debate`] drives a set of agents through the protocol:
//!
//! ```text
//! Init ──► RoundDispatch(1) ──► RoundAggregate(1) ──┬──► RoundDispatch(2) ...
//!                                                   ├──► Converged
//!                                                   └──► Aborted
//! ```
//!
//! * **Init** creates one runtime session per agent and starts the
//!   [`EventForwarder`] so observers can watch agents type.
//! * **RoundDispatch** sends every agent its prompt concurrently. Round 1 is
//!   the original task; later rounds show each agent the *other* agents'
//!   previous responses. Each agent turn re-prompts with a corrective
//!   instruction up to [`MAX_PARSE_RETRIES`] times when its reply cannot be
//!   parsed.
//! * **RoundAggregate** waits for every agent to settle. Failed agents are
//!   reported as `agent_error` events and left out of the round. With fewer
//!   than [`MIN_RESPONDING_AGENTS`] successes the debate aborts; otherwise
//!   consensus and convergence are computed and `round_complete` is emitted.
//! * **Converged** / **Aborted** stop the forwarder, emit `debate_complete`
//!   exactly once and return the accumulated [`DebateResult`].
//!
//! Per-agent failures never escape a round. Once round 1 has started,
//! [`Debate::run`] always returns `Ok`, with an aborted debate reported
//! through [`DebateOutcome::Aborted`].
//!
//! # Example
//!
//! ```rust,no_run
//! use debatellm::clients::opencode::OpencodeRuntime;
//! use debatellm::config::{AgentConfig, DebateSettings};
//! use debatellm::debate::{Debate, DebateConfig};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let runtime = Arc::new(OpencodeRuntime::connect("http://127.0.0.1:4096")?);
//!
//! let settings = DebateSettings {
//!     agents: vec![
//!         AgentConfig::parse_flag("anthropic/claude-sonnet-4-5", 0)?,
//!         AgentConfig::parse_flag("openai/gpt-5", 1)?,
//!     ],
//!     ..DebateSettings::default()
//! };
//!
//! let config = DebateConfig::from_settings("A realtime chat service", &settings);
//! let result = Debate::new(runtime, config).run().await?;
//!
//! for section in &result.consensus {
//!     println!("{}: agreed={}", section.title, section.agreed);
//! }
//! # Ok(())
//! # }
//! ```

use crate::debatellm::config::{AgentConfig, DebateSettings, DispatchTimings};
use crate::debatellm::consensus::{build_consensus, tally, ConsensusSection};
use crate::debatellm::convergence::ConvergenceState;
use crate::debatellm::event::{
    AgentErrorPayload, AgentStreamPayload, DebateCompletePayload, DebateEvent, ErrorPayload,
    EventHandler, RoundCompletePayload, StatusPayload, StreamData, PART_UPDATED,
};
use crate::debatellm::event_forwarder::EventForwarder;
use crate::debatellm::parser::{parse_response, ParseError};
use crate::debatellm::prompts;
use crate::debatellm::response::{agent_map, AgentResponses, Response};
use crate::debatellm::runtime::{AgentRuntime, ModelRef, SessionOptions};
use crate::debatellm::session::{AgentSession, DispatchError, PromptDispatcher, SessionManager};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Corrective re-prompts allowed after an unparseable reply.
pub const MAX_PARSE_RETRIES: usize = 2;

/// A round needs at least this many successful agents to count.
pub const MIN_RESPONDING_AGENTS: usize = 2;

/// `status` value broadcast while rounds are running.
pub const STATUS_DEBATING: &str = "debating";

/// Everything a single debate needs to know up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebateConfig {
    /// The project description every agent designs for.
    pub prompt: String,
    /// Safety cap on rounds.
    pub max_rounds: usize,
    pub stack: Option<String>,
    /// Participants; the first agent supplies final content for agreed
    /// sections.
    pub agents: Vec<AgentConfig>,
    /// Snapshot of an existing codebase injected into round-1 prompts.
    pub codebase_context: Option<String>,
    /// Directory the agents may explore with read-only tools.
    pub project_dir: Option<PathBuf>,
}

impl DebateConfig {
    pub fn new(prompt: impl Into<String>, agents: Vec<AgentConfig>) -> Self {
        Self {
            prompt: prompt.into(),
            max_rounds: crate::debatellm::config::DEFAULT_MAX_ROUNDS,
            stack: None,
            agents,
            codebase_context: None,
            project_dir: None,
        }
    }

    pub fn from_settings(prompt: impl Into<String>, settings: &DebateSettings) -> Self {
        Self {
            prompt: prompt.into(),
            max_rounds: settings.max_rounds,
            stack: settings.stack.clone(),
            agents: settings.agents.clone(),
            codebase_context: None,
            project_dir: None,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Ground the debate in an existing project.
    pub fn with_codebase(mut self, context: impl Into<String>, project_dir: impl Into<PathBuf>) -> Self {
        self.codebase_context = Some(context.into());
        self.project_dir = Some(project_dir.into());
        self
    }

    fn validate(&self) -> Result<(), DebateError> {
        if self.agents.len() < MIN_RESPONDING_AGENTS {
            return Err(DebateError::TooFewAgents(self.agents.len()));
        }
        if self.max_rounds == 0 {
            return Err(DebateError::InvalidConfig(
                "max_rounds must be at least 1".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for agent in &self.agents {
            if !names.insert(agent.name.as_str()) {
                return Err(DebateError::InvalidConfig(format!(
                    "duplicate agent name: {}",
                    agent.name
                )));
            }
        }
        Ok(())
    }
}

/// Debate-level failures.
#[derive(Debug, Clone, PartialEq)]
pub enum DebateError {
    /// The configuration cannot run a debate.
    InvalidConfig(String),
    /// Fewer than two agents were configured.
    TooFewAgents(usize),
    /// An agent session could not be created.
    Session(DispatchError),
    /// Fewer than two agents succeeded in a round.
    InsufficientAgents { round: usize, responded: usize },
}

impl fmt::Display for DebateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebateError::InvalidConfig(msg) => write!(f, "Invalid debate configuration: {}", msg),
            DebateError::TooFewAgents(n) => {
                write!(f, "A debate needs at least {} agents, got {}", MIN_RESPONDING_AGENTS, n)
            }
            DebateError::Session(e) => write!(f, "{}", e),
            DebateError::InsufficientAgents { round, responded } => write!(
                f,
                "Fewer than {} agents responded in round {} ({} succeeded)",
                MIN_RESPONDING_AGENTS, round, responded
            ),
        }
    }
}

impl Error for DebateError {}

/// Why one agent produced no response in a round.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentTurnError {
    /// Sending or waiting failed (timeout, no response, runtime error).
    Dispatch(DispatchError),
    /// Every attempt produced an unparseable reply.
    Parse { attempts: usize, last: ParseError },
    /// The agent's task ended without producing an outcome.
    Aborted(String),
}

impl fmt::Display for AgentTurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentTurnError::Dispatch(e) => write!(f, "{}", e),
            AgentTurnError::Parse { attempts, last } => {
                write!(f, "Failed to parse after {} attempts: {}", attempts, last)
            }
            AgentTurnError::Aborted(msg) => write!(f, "Agent task aborted: {}", msg),
        }
    }
}

impl Error for AgentTurnError {}

impl From<DispatchError> for AgentTurnError {
    fn from(e: DispatchError) -> Self {
        AgentTurnError::Dispatch(e)
    }
}

/// States of the debate loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebatePhase {
    Init,
    RoundDispatch(usize),
    RoundAggregate(usize),
    Converged,
    Aborted,
}

/// One completed round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub round: usize,
    /// Successful responses in configured order.
    #[serde(with = "agent_map")]
    pub responses: AgentResponses,
    pub consensus: Vec<ConsensusSection>,
    /// Convergence state after this round.
    pub convergence: ConvergenceState,
    pub completed_at: DateTime<Utc>,
}

/// How a debate ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DebateOutcome {
    Converged,
    Aborted {
        #[serde(serialize_with = "serialize_display")]
        reason: DebateError,
    },
}

fn serialize_display<T: fmt::Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Final snapshot of a debate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebateResult {
    pub id: Uuid,
    pub rounds: Vec<RoundResult>,
    /// Consensus over the last completed round's responses.
    pub consensus: Vec<ConsensusSection>,
    pub convergence_state: ConvergenceState,
    /// Last completed round's responses.
    #[serde(with = "agent_map")]
    pub agent_responses: AgentResponses,
    /// First non-empty project title suggested, in configured agent order.
    pub project_title: String,
    pub outcome: DebateOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DebateResult {
    pub fn is_converged(&self) -> bool {
        self.outcome == DebateOutcome::Converged
    }

    pub fn response(&self, agent: &str) -> Option<&Response> {
        self.agent_responses
            .iter()
            .find(|(name, _)| name == agent)
            .map(|(_, r)| r)
    }
}

/// One agent's prompt-and-parse cycle for one round.
struct AgentTurn {
    dispatcher: PromptDispatcher,
    agent: String,
    session_id: String,
    model: ModelRef,
    system: String,
    user: String,
    enable_tools: bool,
}

impl AgentTurn {
    async fn run(self) -> Result<Response, AgentTurnError> {
        let mut attempt = 0;
        loop {
            let text = if attempt == 0 {
                self.user.as_str()
            } else {
                prompts::CORRECTIVE_PROMPT
            };

            if attempt == 0 {
                log::info!("{}: sending prompt", self.agent);
            } else {
                log::info!("{}: sending prompt (retry {})", self.agent, attempt);
            }

            let raw = self
                .dispatcher
                .send_and_wait(
                    &self.session_id,
                    &self.model,
                    &self.system,
                    text,
                    attempt == 0 && self.enable_tools,
                )
                .await?;

            match parse_response(&raw) {
                Ok(response) => {
                    log::info!(
                        "{}: response parsed ({} sections, verdict: {})",
                        self.agent,
                        response.sections.len(),
                        response.overall_verdict
                    );
                    return Ok(response);
                }
                Err(e) if attempt < MAX_PARSE_RETRIES => {
                    log::warn!("{}: parse failed: {}", self.agent, e);
                    log::debug!("{}: raw start: {}", self.agent, head(&raw, 200));
                    attempt += 1;
                }
                Err(e) => {
                    return Err(AgentTurnError::Parse {
                        attempts: attempt + 1,
                        last: e,
                    })
                }
            }
        }
    }
}

fn head(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// A configured debate, ready to run against an agent runtime.
pub struct Debate {
    id: Uuid,
    runtime: Arc<dyn AgentRuntime>,
    config: DebateConfig,
    timings: DispatchTimings,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl Debate {
    pub fn new(runtime: Arc<dyn AgentRuntime>, config: DebateConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            runtime,
            config,
            timings: DispatchTimings::default(),
            event_handler: None,
        }
    }

    /// Receive every debate event, including forwarded agent streams.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn with_timings(mut self, timings: DispatchTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &DebateConfig {
        &self.config
    }

    async fn emit(&self, event: DebateEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_debate_event(&event).await;
        }
    }

    fn enter(&self, phase: DebatePhase) {
        log::debug!("Debate {}: {:?}", self.id, phase);
    }

    async fn fail_setup(&self, error: DebateError) -> DebateError {
        log::error!("Debate {} cannot start: {}", self.id, error);
        self.emit(DebateEvent::Error(ErrorPayload {
            message: error.to_string(),
        }))
        .await;
        error
    }

    /// Run the debate to a terminal state.
    ///
    /// Returns `Err` only for setup failures before round 1. An aborted
    /// debate is still `Ok`, with [`DebateOutcome::Aborted`] and every round
    /// completed before the abort.
    pub async fn run(&self) -> Result<DebateResult, DebateError> {
        let started_at = Utc::now();
        self.enter(DebatePhase::Init);

        if let Err(e) = self.config.validate() {
            return Err(self.fail_setup(e).await);
        }

        let options = SessionOptions {
            directory: self.config.project_dir.clone(),
            enable_tools: self.config.project_dir.is_some(),
        };
        let sessions = match SessionManager::new(self.runtime.clone())
            .create_sessions(&self.config.agents, &options)
            .await
        {
            Ok(sessions) => sessions,
            Err(e) => return Err(self.fail_setup(DebateError::Session(e)).await),
        };

        let mut forwarder = self.event_handler.as_ref().map(|handler| {
            EventForwarder::start(
                self.runtime.clone(),
                SessionManager::session_map(&sessions),
                handler.clone(),
            )
        });

        let dispatcher = PromptDispatcher::new(self.runtime.clone(), self.timings);
        let agent_names: Vec<String> = sessions.iter().map(|s| s.agent.name.clone()).collect();

        let mut convergence = ConvergenceState::new(self.config.max_rounds);
        let mut rounds: Vec<RoundResult> = Vec::new();
        let mut latest: AgentResponses = Vec::new();
        let mut abort: Option<DebateError> = None;

        while !convergence.converged {
            let round = convergence.round + 1;
            self.enter(DebatePhase::RoundDispatch(round));
            log::info!("Round {} of at most {}", round, self.config.max_rounds);

            self.emit(DebateEvent::Status(StatusPayload {
                round,
                max_rounds: self.config.max_rounds,
                status: STATUS_DEBATING.to_string(),
                agents: agent_names.clone(),
            }))
            .await;

            for session in &sessions {
                self.emit(DebateEvent::AgentStream(AgentStreamPayload {
                    agent: session.agent.name.clone(),
                    event_type: PART_UPDATED.to_string(),
                    session_id: session.session_id.clone(),
                    data: StreamData::StreamingStart,
                }))
                .await;
            }

            let outcomes = self.dispatch_round(&dispatcher, &sessions, round, &latest).await;

            self.enter(DebatePhase::RoundAggregate(round));
            let mut responses: AgentResponses = Vec::with_capacity(sessions.len());
            for (session, outcome) in sessions.iter().zip(outcomes) {
                match outcome {
                    Ok(response) => responses.push((session.agent.name.clone(), response)),
                    Err(e) => {
                        log::warn!("{}: failed in round {}: {}", session.agent.name, round, e);
                        self.emit(DebateEvent::AgentError(AgentErrorPayload {
                            agent: session.agent.name.clone(),
                            error: e.to_string(),
                        }))
                        .await;
                    }
                }
            }

            if responses.len() < MIN_RESPONDING_AGENTS {
                let error = DebateError::InsufficientAgents {
                    round,
                    responded: responses.len(),
                };
                log::error!("{}; aborting debate", error);
                abort = Some(error);
                break;
            }

            let consensus = build_consensus(&responses);
            convergence = convergence.advance_with(responses.iter().map(|(_, r)| r));

            let (agreed, disputed) = tally(&consensus);
            let verdicts: Vec<String> = responses
                .iter()
                .map(|(name, r)| format!("{}: {}", name, r.overall_verdict))
                .collect();
            log::info!(
                "Round {}: {} agreed, {} disputed | {}",
                round,
                agreed,
                disputed,
                verdicts.join(", ")
            );

            rounds.push(RoundResult {
                round,
                responses: responses.clone(),
                consensus: consensus.clone(),
                convergence: convergence.clone(),
                completed_at: Utc::now(),
            });

            self.emit(DebateEvent::RoundComplete(RoundCompletePayload {
                round,
                consensus,
                convergence: convergence.clone(),
                agents: responses.clone(),
            }))
            .await;

            latest = responses;

            if let Some(reason) = convergence.reason {
                log::info!("Converged after round {}: {}", round, reason);
            }
        }

        let outcome = match abort {
            Some(reason) => {
                self.enter(DebatePhase::Aborted);
                DebateOutcome::Aborted { reason }
            }
            None => {
                self.enter(DebatePhase::Converged);
                DebateOutcome::Converged
            }
        };

        if let Some(forwarder) = forwarder.as_mut() {
            forwarder.stop().await;
        }

        let consensus = build_consensus(&latest);
        let project_title = latest
            .iter()
            .map(|(_, r)| r.project_title.as_str())
            .find(|t| !t.is_empty())
            .unwrap_or_default()
            .to_string();

        self.emit(DebateEvent::DebateComplete(DebateCompletePayload {
            consensus: consensus.clone(),
            convergence: convergence.clone(),
            agents: latest.clone(),
        }))
        .await;

        Ok(DebateResult {
            id: self.id,
            rounds,
            consensus,
            convergence_state: convergence,
            agent_responses: latest,
            project_title,
            outcome,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Run every agent's turn concurrently and wait for all of them.
    ///
    /// Outcomes are returned in session order.
    async fn dispatch_round(
        &self,
        dispatcher: &PromptDispatcher,
        sessions: &[AgentSession],
        round: usize,
        previous: &[(String, Response)],
    ) -> Vec<Result<Response, AgentTurnError>> {
        let mut tasks = Vec::with_capacity(sessions.len());

        for session in sessions {
            let name = session.agent.name.as_str();
            let (system, user) = if round == 1 {
                (
                    prompts::system_prompt_round1(
                        name,
                        self.config.stack.as_deref(),
                        self.config.codebase_context.as_deref(),
                    ),
                    prompts::user_prompt_round1(&self.config.prompt),
                )
            } else {
                let others: Vec<(&str, &Response)> = previous
                    .iter()
                    .filter(|(other, _)| other != name)
                    .map(|(other, r)| (other.as_str(), r))
                    .collect();
                (
                    prompts::system_prompt_round_n(name, round),
                    prompts::user_prompt_round_n(&others),
                )
            };

            let turn = AgentTurn {
                dispatcher: dispatcher.clone(),
                agent: name.to_string(),
                session_id: session.session_id.clone(),
                model: session.agent.model(),
                system,
                user,
                enable_tools: round == 1 && self.config.project_dir.is_some(),
            };
            tasks.push(tokio::spawn(turn.run()));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            outcomes.push(match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(AgentTurnError::Aborted(e.to_string())),
            });
        }
        outcomes
    }
}
