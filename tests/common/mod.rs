#![allow(dead_code)]

use async_trait::async_trait;
use debatellm::config::{AgentConfig, DispatchTimings};
use debatellm::event::{DebateEvent, EventHandler};
use debatellm::runtime::{
    AgentRuntime, PromptRequest, ProviderListing, RuntimeError, RuntimeEvent, RuntimeEventStream,
    SessionHandle, SessionOptions, SessionStatus,
};
use debatellm::session::SESSION_TITLE_PREFIX;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// What a scripted agent does with one prompt.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with this text.
    Text(String),
    /// Stay busy forever.
    Hang,
    /// Finish without any text.
    Empty,
}

#[derive(Default)]
struct MockState {
    next_id: usize,
    /// session id -> agent name
    sessions: HashMap<String, String>,
    session_options: Vec<(String, SessionOptions)>,
    scripts: HashMap<String, Vec<Reply>>,
    prompts_seen: HashMap<String, usize>,
    prompts: Vec<(String, PromptRequest)>,
    messages: HashMap<String, Vec<Value>>,
    busy_polls: HashMap<String, usize>,
    hanging: Vec<String>,
    fail_sessions_for: Option<String>,
}

/// In-memory agent runtime driven by per-agent reply scripts.
///
/// The last reply of a script repeats once the script runs out.
pub struct MockRuntime {
    state: Mutex<MockState>,
    event_tx: mpsc::UnboundedSender<RuntimeEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<RuntimeEvent>>>,
    never_busy: bool,
    stall_feed: bool,
}

impl MockRuntime {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(MockState::default()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            never_busy: false,
            stall_feed: false,
        }
    }

    /// Never report a busy status, like providers without a busy signal.
    pub fn never_busy(mut self) -> Self {
        self.never_busy = true;
        self
    }

    /// Never finish opening the activity feed, like a server that accepts
    /// the connection but never sends headers.
    pub fn stall_feed(mut self) -> Self {
        self.stall_feed = true;
        self
    }

    pub fn script(self, agent: &str, replies: Vec<Reply>) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(agent.to_string(), replies);
        self
    }

    pub fn fail_session_for(self, agent: &str) -> Self {
        self.state.lock().unwrap().fail_sessions_for = Some(agent.to_string());
        self
    }

    /// Every prompt received, as `(agent, request)`, in arrival order.
    pub fn prompts(&self) -> Vec<(String, PromptRequest)> {
        self.state.lock().unwrap().prompts.clone()
    }

    pub fn prompts_for(&self, agent: &str) -> Vec<PromptRequest> {
        self.prompts()
            .into_iter()
            .filter(|(a, _)| a == agent)
            .map(|(_, p)| p)
            .collect()
    }

    pub fn session_options(&self) -> Vec<(String, SessionOptions)> {
        self.state.lock().unwrap().session_options.clone()
    }

    pub fn session_id_for(&self, agent: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .iter()
            .find(|(_, name)| name.as_str() == agent)
            .map(|(id, _)| id.clone())
    }

    /// Append a raw message to a session without going through a prompt.
    pub fn seed_message(&self, session_id: &str, message: Value) {
        self.state
            .lock()
            .unwrap()
            .messages
            .entry(session_id.to_string())
            .or_default()
            .push(message);
    }

    /// Inject a raw activity-feed event.
    pub fn push_event(&self, event_type: &str, properties: Value) {
        let _ = self.event_tx.send(RuntimeEvent {
            event_type: event_type.to_string(),
            properties,
        });
    }
}

#[async_trait]
impl AgentRuntime for MockRuntime {
    async fn create_session(
        &self,
        title: &str,
        options: &SessionOptions,
    ) -> Result<SessionHandle, RuntimeError> {
        let agent = title
            .strip_prefix(&format!("{}-", SESSION_TITLE_PREFIX))
            .unwrap_or(title)
            .to_string();

        let mut state = self.state.lock().unwrap();
        if state.fail_sessions_for.as_deref() == Some(agent.as_str()) {
            return Err("session quota exceeded".into());
        }

        state.next_id += 1;
        let id = format!("ses_{}", state.next_id);
        state.sessions.insert(id.clone(), agent);
        state.session_options.push((id.clone(), options.clone()));
        Ok(SessionHandle {
            id,
            title: title.to_string(),
        })
    }

    async fn send_prompt(&self, request: &PromptRequest) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        let sid = request.session_id.clone();
        let agent = state
            .sessions
            .get(&sid)
            .cloned()
            .ok_or_else(|| format!("unknown session {}", sid))?;

        state.prompts.push((agent.clone(), request.clone()));
        let seen = state.prompts_seen.entry(agent.clone()).or_insert(0);
        let index = *seen;
        *seen += 1;

        let reply = state
            .scripts
            .get(&agent)
            .and_then(|script| script.get(index).or_else(|| script.last()))
            .cloned()
            .unwrap_or(Reply::Empty);

        state.next_id += 1;
        let user_id = format!("msg_{}", state.next_id);
        state.next_id += 1;
        let assistant_id = format!("msg_{}", state.next_id);

        let _ = self.event_tx.send(RuntimeEvent {
            event_type: "message.updated".into(),
            properties: json!({"info": {"id": user_id, "role": "user", "sessionID": sid}}),
        });
        let _ = self.event_tx.send(RuntimeEvent {
            event_type: "message.part.updated".into(),
            properties: json!({"part": {"sessionID": sid, "messageID": user_id, "type": "text", "text": request.text}}),
        });

        let messages = state.messages.entry(sid.clone()).or_default();
        messages.push(json!({
            "info": {"id": user_id, "role": "user"},
            "parts": [{"type": "text", "text": request.text}]
        }));

        match reply {
            Reply::Text(text) => {
                messages.push(json!({
                    "info": {"id": assistant_id, "role": "assistant"},
                    "parts": [{"type": "step-start"}, {"type": "text", "text": text}]
                }));
                let _ = self.event_tx.send(RuntimeEvent {
                    event_type: "message.updated".into(),
                    properties: json!({"info": {"id": assistant_id, "role": "assistant", "sessionID": sid}}),
                });
                let _ = self.event_tx.send(RuntimeEvent {
                    event_type: "message.part.updated".into(),
                    properties: json!({"part": {"sessionID": sid, "messageID": assistant_id, "type": "text", "text": text}}),
                });
                state.busy_polls.insert(sid, 1);
            }
            Reply::Empty => {
                messages.push(json!({
                    "info": {"id": assistant_id, "role": "assistant"},
                    "parts": [{"type": "step-finish"}]
                }));
                state.busy_polls.insert(sid, 1);
            }
            Reply::Hang => state.hanging.push(sid),
        }
        Ok(())
    }

    async fn session_status(&self) -> Result<HashMap<String, SessionStatus>, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        let mut statuses = HashMap::new();
        if self.never_busy {
            return Ok(statuses);
        }
        for sid in state.hanging.clone() {
            statuses.insert(sid, SessionStatus::busy());
        }
        for (sid, polls) in state.busy_polls.iter_mut() {
            if *polls > 0 {
                *polls -= 1;
                statuses.insert(sid.clone(), SessionStatus::busy());
            } else {
                statuses.entry(sid.clone()).or_insert_with(SessionStatus::idle);
            }
        }
        Ok(statuses)
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<Value>, RuntimeError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .messages
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn subscribe_events(&self) -> Result<RuntimeEventStream, RuntimeError> {
        if self.stall_feed {
            futures_util::future::pending::<()>().await;
        }
        let rx = self
            .event_rx
            .lock()
            .unwrap()
            .take()
            .ok_or("already subscribed")?;
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (Ok(event), rx))
        });
        Ok(Box::pin(stream))
    }

    async fn list_providers(&self) -> Result<ProviderListing, RuntimeError> {
        Ok(ProviderListing::default())
    }
}

/// Collects every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<DebateEvent>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<DebateEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn on_debate_event(&self, event: &DebateEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Short timings so failure paths finish quickly.
pub fn fast_timings() -> DispatchTimings {
    DispatchTimings {
        initial_delay: Duration::from_millis(1),
        poll_interval: Duration::from_millis(5),
        busy_grace: Duration::from_millis(40),
        timeout: Duration::from_millis(250),
        extraction_attempts: 2,
        extraction_retry_delay: Duration::from_millis(5),
    }
}

pub fn agents(names: &[&str]) -> Vec<AgentConfig> {
    names
        .iter()
        .map(|name| AgentConfig::new(*name, "mock", "model"))
        .collect()
}

/// A well-formed reply. `sections` holds `(title, content, verdict)`.
pub fn reply(sections: &[(&str, &str, &str)], overall: &str) -> Reply {
    let sections: Vec<Value> = sections
        .iter()
        .map(|(title, content, verdict)| {
            json!({"title": title, "content": content, "verdict": verdict, "reasoning": ""})
        })
        .collect();
    Reply::Text(
        json!({
            "sections": sections,
            "overall_verdict": overall,
            "change_requests": [],
            "summary": "summary",
            "project_title": "test-project"
        })
        .to_string(),
    )
}

/// A reply approving every listed title with the given content.
pub fn approve_all(titles: &[&str], content: &str) -> Reply {
    let sections: Vec<(&str, &str, &str)> = titles.iter().map(|t| (*t, content, "approve")).collect();
    reply(&sections, "approve")
}

/// Wait until `cond` holds, polling briefly. Returns whether it did.
pub async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
