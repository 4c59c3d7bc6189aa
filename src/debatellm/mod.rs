// src/debatellm/mod.rs

pub mod broadcaster;
pub mod clients;
pub mod config;
pub mod consensus;
pub mod convergence;
pub mod debate;
pub mod event;
pub mod event_forwarder;
pub mod parser;
pub mod prompts;
pub mod response;
pub mod runtime;
#[cfg(feature = "server")]
pub mod server;
pub mod session;

// Export Debate directly so callers can write debatellm::Debate
// instead of debatellm::debate::Debate.
pub use debate::Debate;
