//! Fan-out of debate events to connected observers.
//!
//! The [`Broadcaster`] keeps one bounded queue per connected observer and a
//! cache holding the latest event of every durable category (see
//! [`EventKind::DURABLE`]). A newly connected observer first receives the
//! cached events, then every live event, so it can rebuild the current
//! debate state without re-running anything. `agent_stream` events are
//! never cached.
//!
//! A slow observer loses `agent_stream` updates first: they are only queued
//! while more than [`STREAM_HEADROOM`] slots are free, and each update is a
//! full snapshot, so the next one supersedes any that were skipped. An
//! observer whose queue fills up completely is disconnected; reconnecting
//! replays the cached state.
//!
//! Caching, replay and delivery all happen under one short-lived lock, so an
//! observer can neither miss an event broadcast while it connects nor see
//! one twice. Observers disconnect by dropping their [`Observer`]; the
//! debate is unaffected.
//!
//! # Example
//!
//! ```rust
//! use debatellm::broadcaster::Broadcaster;
//! use debatellm::event::{DebateEvent, ErrorPayload};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let broadcaster = Broadcaster::new();
//! let mut observer = broadcaster.connect();
//!
//! broadcaster.broadcast(DebateEvent::Error(ErrorPayload { message: "boom".into() }));
//! assert!(matches!(observer.recv().await, Some(DebateEvent::Error(_))));
//! # }
//! ```

use crate::debatellm::event::{DebateEvent, EventHandler, EventKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Capacity of each observer's queue.
pub const OBSERVER_BUFFER: usize = 256;

/// Queue slots kept free for non-stream events.
pub const STREAM_HEADROOM: usize = 32;

struct BroadcastState {
    next_id: u64,
    observers: Vec<(u64, mpsc::Sender<DebateEvent>)>,
    cache: HashMap<EventKind, DebateEvent>,
}

/// Event fan-out with replay-on-connect for durable categories.
pub struct Broadcaster {
    state: Mutex<BroadcastState>,
}

/// One connected observer's receiving end.
pub struct Observer {
    id: u64,
    rx: mpsc::Receiver<DebateEvent>,
}

impl Observer {
    /// Identifier assigned at connect time.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. Returns `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<DebateEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<DebateEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<DebateEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BroadcastState {
                next_id: 0,
                observers: Vec::new(),
                cache: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BroadcastState> {
        // Nothing inside the lock can leave the state half-updated, so a
        // poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new observer and queue the cached durable events for it.
    pub fn connect(&self) -> Observer {
        let (tx, rx) = mpsc::channel(OBSERVER_BUFFER);
        let mut state = self.lock();

        for kind in EventKind::DURABLE.iter() {
            if let Some(event) = state.cache.get(kind) {
                // Fresh queue, far larger than the durable set.
                let _ = tx.try_send(event.clone());
            }
        }

        let id = state.next_id;
        state.next_id += 1;
        state.observers.push((id, tx));
        log::debug!("Observer {} connected ({} total)", id, state.observers.len());

        Observer { id, rx }
    }

    /// Deliver `event` to every connected observer, caching it first if its
    /// category is durable.
    ///
    /// Never waits on an observer. Stream updates are skipped for observers
    /// short on queue space, and observers that have gone away or whose
    /// queue is full are pruned.
    pub fn broadcast(&self, event: DebateEvent) {
        let mut state = self.lock();

        let kind = event.kind();
        if kind.is_durable() {
            state.cache.insert(kind, event.clone());
        }

        state.observers.retain(|(id, tx)| {
            if tx.is_closed() {
                log::debug!("Observer {} disconnected", id);
                return false;
            }
            if kind == EventKind::AgentStream && tx.capacity() <= STREAM_HEADROOM {
                log::trace!("Observer {} is behind; skipping stream update", id);
                return true;
            }
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    log::warn!("Observer {} queue is full; disconnecting", id);
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    log::debug!("Observer {} disconnected", id);
                    false
                }
            }
        });
    }

    /// Number of observers that were connected at the last broadcast.
    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    /// Latest cached event of a durable category.
    pub fn cached(&self, kind: EventKind) -> Option<DebateEvent> {
        self.lock().cache.get(&kind).cloned()
    }

    /// Forget all cached state, e.g. before starting a new debate.
    pub fn clear_cache(&self) {
        self.lock().cache.clear();
    }
}

#[async_trait]
impl EventHandler for Broadcaster {
    async fn on_debate_event(&self, event: &DebateEvent) {
        self.broadcast(event.clone());
    }
}
