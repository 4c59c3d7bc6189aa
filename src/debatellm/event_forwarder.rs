//! Live forwarding of agent activity to observers.
//!
//! The runtime exposes one raw activity feed shared by every session. It
//! interleaves user prompts, assistant output, tool calls and step markers,
//! and most part events do not say who authored the message they belong to.
//! [`StreamFilter`] therefore tracks the ids of assistant-authored messages
//! (learned from `message.updated` events) and forwards only text and
//! reasoning parts that belong to one of those messages on a known session.
//!
//! Each forwarded update carries the part's full current text, because the
//! feed delivers snapshots rather than diffs.
//!
//! [`EventForwarder`] runs the filter in the background: a reader task pulls
//! the feed and pushes accepted updates onto a bounded channel, and a pump
//! task drains the channel into an [`EventHandler`]. [`EventForwarder::stop`]
//! cancels the reader and waits for the pump to drain, so once it returns no
//! further `agent_stream` events can be emitted.

use crate::debatellm::event::{AgentStreamPayload, DebateEvent, EventHandler, StreamData, PART_UPDATED};
use crate::debatellm::runtime::{AgentRuntime, RuntimeEvent};
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Raw-feed event announcing message metadata, including its role.
pub const MESSAGE_UPDATED: &str = "message.updated";

/// Capacity of the queue between the feed reader and the pump.
pub const FORWARD_BUFFER: usize = 256;

/// Stateful filter from raw feed events to observer stream updates.
pub struct StreamFilter {
    sessions: Arc<HashMap<String, String>>,
    assistant_messages: HashSet<String>,
}

impl StreamFilter {
    /// `sessions` maps runtime session ids to agent names.
    pub fn new(sessions: Arc<HashMap<String, String>>) -> Self {
        Self {
            sessions,
            assistant_messages: HashSet::new(),
        }
    }

    /// Number of messages currently known to be assistant-authored.
    pub fn known_assistant_messages(&self) -> usize {
        self.assistant_messages.len()
    }

    /// Feed one raw event through the filter.
    pub fn apply(&mut self, event: &RuntimeEvent) -> Option<AgentStreamPayload> {
        let props = &event.properties;
        match event.event_type.as_str() {
            MESSAGE_UPDATED => {
                let info = props.get("info")?;
                if info.get("role").and_then(Value::as_str) == Some("assistant") {
                    if let Some(id) = info.get("id").and_then(Value::as_str) {
                        self.assistant_messages.insert(id.to_string());
                    }
                }
                None
            }
            PART_UPDATED => self.part_update(props),
            _ => None,
        }
    }

    fn part_update(&self, props: &Value) -> Option<AgentStreamPayload> {
        let session_id = extract_session_id(props)?;
        let agent = self.sessions.get(session_id)?;

        let part = props.get("part").filter(|p| p.is_object()).unwrap_or(props);

        let message_id = part.get("messageID").and_then(Value::as_str)?;
        if !self.assistant_messages.contains(message_id) {
            return None;
        }

        let text_field = |key: &str| part.get(key).and_then(Value::as_str).map(str::to_string);
        let data = match part.get("type").and_then(Value::as_str)? {
            "text" => StreamData::Text {
                text: text_field("text")?,
            },
            "reasoning" => StreamData::Reasoning {
                reasoning: text_field("reasoning").or_else(|| text_field("text"))?,
            },
            _ => return None,
        };

        Some(AgentStreamPayload {
            agent: agent.clone(),
            event_type: PART_UPDATED.to_string(),
            session_id: session_id.to_string(),
            data,
        })
    }
}

/// Find the session id of a raw event.
///
/// Part events carry it on the part, message events on the info block, and
/// some runtimes put it at the top level under one of several spellings.
pub fn extract_session_id(props: &Value) -> Option<&str> {
    const KEYS: [&str; 3] = ["sessionID", "session_id", "sessionId"];

    fn lookup<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a str> {
        keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_str))
    }

    props
        .get("part")
        .and_then(|part| lookup(part, &KEYS[..2]))
        .or_else(|| props.get("info").and_then(|info| lookup(info, &KEYS[..2])))
        .or_else(|| lookup(props, &KEYS))
}

/// Counters reported when a forwarder stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    /// Raw events read from the feed.
    pub events_seen: usize,
    /// `agent_stream` events delivered to the handler.
    pub forwarded: usize,
}

/// Background subscription to the runtime's activity feed.
pub struct EventForwarder {
    cancel: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<usize>>,
    pump: Option<JoinHandle<usize>>,
}

impl EventForwarder {
    /// Subscribe to `runtime`'s feed and start forwarding assistant output
    /// for the sessions in `sessions` to `handler`.
    ///
    /// Subscription failures are logged and end the forwarder; they never
    /// affect the debate itself.
    pub fn start(
        runtime: Arc<dyn AgentRuntime>,
        sessions: HashMap<String, String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let (tx, mut rx) = mpsc::channel::<AgentStreamPayload>(FORWARD_BUFFER);
        let sessions = Arc::new(sessions);

        log::info!("Starting event forwarder for {} sessions", sessions.len());

        let reader = tokio::spawn(async move {
            let subscribed = tokio::select! {
                biased;
                _ = &mut cancel_rx => {
                    log::debug!("Event forwarder cancelled before the subscription opened");
                    return 0;
                }
                subscribed = runtime.subscribe_events() => subscribed,
            };
            let mut stream = match subscribed {
                Ok(stream) => stream,
                Err(e) => {
                    log::error!("Event subscription failed: {}", e);
                    return 0;
                }
            };

            let mut filter = StreamFilter::new(sessions);
            let mut seen = 0usize;

            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => break,
                    next = stream.next() => match next {
                        Some(Ok(event)) => {
                            seen += 1;
                            if let Some(update) = filter.apply(&event) {
                                if tx.send(update).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            log::warn!("Event stream error: {}", e);
                            break;
                        }
                        None => {
                            log::debug!("Event stream ended after {} events", seen);
                            break;
                        }
                    }
                }
            }
            seen
        });

        let pump = tokio::spawn(async move {
            let mut forwarded = 0usize;
            while let Some(update) = rx.recv().await {
                handler
                    .on_debate_event(&DebateEvent::AgentStream(update))
                    .await;
                forwarded += 1;
            }
            forwarded
        });

        Self {
            cancel: Some(cancel_tx),
            reader: Some(reader),
            pump: Some(pump),
        }
    }

    /// Cancel the subscription and wait until every accepted update has been
    /// delivered. Calling it again is a no-op.
    pub async fn stop(&mut self) -> ForwarderStats {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }

        let mut stats = ForwarderStats::default();
        if let Some(reader) = self.reader.take() {
            match reader.await {
                Ok(seen) => stats.events_seen = seen,
                Err(e) => log::warn!("Event reader task failed: {}", e),
            }
        }
        if let Some(pump) = self.pump.take() {
            match pump.await {
                Ok(forwarded) => stats.forwarded = forwarded,
                Err(e) => log::warn!("Event pump task failed: {}", e),
            }
        }

        log::info!(
            "Event forwarder stopped after {} events ({} forwarded)",
            stats.events_seen,
            stats.forwarded
        );
        stats
    }
}

impl Drop for EventForwarder {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}
