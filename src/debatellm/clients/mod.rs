//! Concrete [`AgentRuntime`](crate::runtime::AgentRuntime) implementations.

pub mod opencode;
