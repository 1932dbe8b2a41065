//! Request pipeline states.
//!
//! ```text
//! Received -> Authenticating -> RateChecking -> Handling -> Responding -> Done
//!                  |                 |                         ^
//!                  +-> Rejected <----+-------------------------+
//! ```
//!
//! Public routes go straight from `Received` to `RateChecking`.

use std::fmt;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Authenticating,
    RateChecking,
    Handling,
    Responding,
    Done,
    /// Short-circuited with the given status
    Rejected(u16),
}

impl PipelineState {
    /// Whether `next` may follow `self`.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Received, Authenticating)
                | (Received, RateChecking)
                | (Authenticating, RateChecking)
                | (Authenticating, Rejected(401))
                | (RateChecking, Handling)
                | (RateChecking, Rejected(429))
                | (Handling, Responding)
                | (Rejected(_), Responding)
                | (Responding, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == PipelineState::Done
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Received => write!(f, "RECEIVED"),
            PipelineState::Authenticating => write!(f, "AUTHENTICATING"),
            PipelineState::RateChecking => write!(f, "RATE_CHECKING"),
            PipelineState::Handling => write!(f, "HANDLING"),
            PipelineState::Responding => write!(f, "RESPONDING"),
            PipelineState::Done => write!(f, "DONE"),
            PipelineState::Rejected(status) => write!(f, "REJECTED({})", status),
        }
    }
}

/// The path one request took through the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineTrace {
    states: Vec<PipelineState>,
}

impl Default for PipelineTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineTrace {
    pub fn new() -> Self {
        Self {
            states: vec![PipelineState::Received],
        }
    }

    pub fn current(&self) -> PipelineState {
        self.states
            .last()
            .copied()
            .unwrap_or(PipelineState::Received)
    }

    /// Moves to `next`. An illegal transition is logged and not recorded.
    pub fn advance(&mut self, next: PipelineState) -> bool {
        let current = self.current();
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "Illegal pipeline transition");
            return false;
        }
        self.states.push(next);
        true
    }

    pub fn states(&self) -> &[PipelineState] {
        &self.states
    }

    /// Whether the request was short-circuited.
    pub fn rejected(&self) -> Option<u16> {
        self.states.iter().find_map(|state| match state {
            PipelineState::Rejected(status) => Some(*status),
            _ => None,
        })
    }
}
