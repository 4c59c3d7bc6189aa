//! Convergence state machine.
//!
//! A debate converges either naturally, when every agent approves the whole
//! proposal in two consecutive rounds, or by exhausting its round cap.
//! [`ConvergenceState::advance`] is a pure reducer applied exactly once per
//! completed round.
//!
//! # Example
//!
//! ```rust
//! use debatellm::convergence::{ConvergenceReason, ConvergenceState};
//! use debatellm::response::Verdict;
//!
//! let state = ConvergenceState::new(5)
//!     .advance(&[Verdict::Approve, Verdict::Approve])
//!     .advance(&[Verdict::Approve, Verdict::Approve]);
//!
//! assert!(state.converged);
//! assert_eq!(state.reason, Some(ConvergenceReason::Natural));
//! ```

use crate::debatellm::response::{Response, Verdict};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of consecutive unanimous rounds required for natural convergence.
pub const REQUIRED_CONSECUTIVE_APPROVALS: usize = 2;

/// Why a debate stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceReason {
    /// Every agent approved for two consecutive rounds.
    Natural,
    /// The round cap was reached without natural convergence.
    CapExhausted,
}

impl fmt::Display for ConvergenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceReason::Natural => write!(
                f,
                "All agents approved for {} consecutive rounds",
                REQUIRED_CONSECUTIVE_APPROVALS
            ),
            ConvergenceReason::CapExhausted => write!(f, "Max rounds reached"),
        }
    }
}

/// Running convergence bookkeeping for one debate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergenceState {
    /// Unanimous-approval streak; reset to 0 by any non-unanimous round.
    pub consecutive_approvals: usize,
    /// Number of completed rounds.
    pub round: usize,
    /// Safety cap on rounds.
    pub max_rounds: usize,
    /// Terminal flag.
    pub converged: bool,
    /// Set once `converged` is `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ConvergenceReason>,
}

impl ConvergenceState {
    /// Fresh state before round 1.
    pub fn new(max_rounds: usize) -> Self {
        Self {
            consecutive_approvals: 0,
            round: 0,
            max_rounds,
            converged: false,
            reason: None,
        }
    }

    /// Fold one completed round's overall verdicts into the state.
    ///
    /// Natural convergence takes priority when it coincides with the cap.
    pub fn advance(&self, overall_verdicts: &[Verdict]) -> Self {
        let unanimous = overall_verdicts.iter().all(|v| *v == Verdict::Approve);
        let consecutive_approvals = if unanimous {
            self.consecutive_approvals + 1
        } else {
            0
        };
        let round = self.round + 1;

        let reason = if consecutive_approvals >= REQUIRED_CONSECUTIVE_APPROVALS {
            Some(ConvergenceReason::Natural)
        } else if round >= self.max_rounds {
            Some(ConvergenceReason::CapExhausted)
        } else {
            None
        };

        Self {
            consecutive_approvals,
            round,
            max_rounds: self.max_rounds,
            converged: reason.is_some(),
            reason,
        }
    }

    /// Convenience wrapper over [`advance`](Self::advance) for full responses.
    pub fn advance_with<'a, I>(&self, responses: I) -> Self
    where
        I: IntoIterator<Item = &'a Response>,
    {
        let verdicts: Vec<Verdict> = responses.into_iter().map(|r| r.overall_verdict).collect();
        self.advance(&verdicts)
    }
}
