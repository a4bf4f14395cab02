//! Run lifecycle state.
//!
//! # State Machine
//!
//! ```text
//! Idle ──> Configuring ──> Running ──> Finalizing ──> Done
//!               │             │             ▲
//!               └─────────────┴──> Aborted ─┘ (shutdown still runs)
//! ```
//!
//! `Aborted` is terminal for the run's outcome, but the orchestrator still passes
//! through the shutdown sequence before returning.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Created, nothing sent to hardware yet
    Idle,
    /// Applying the run configuration to the instruments
    Configuring,
    /// Acquisition loop active
    Running,
    /// Putting the supply into its safe state
    Finalizing,
    /// Completed normally
    Done,
    /// Ended by a fatal error
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "Idle"),
            RunState::Configuring => write!(f, "Configuring"),
            RunState::Running => write!(f, "Running"),
            RunState::Finalizing => write!(f, "Finalizing"),
            RunState::Done => write!(f, "Done"),
            RunState::Aborted => write!(f, "Aborted"),
        }
    }
}

impl RunState {
    /// Check whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Configuring)
                | (Configuring, Running)
                | (Configuring, Aborted)
                | (Running, Finalizing)
                | (Running, Aborted)
                | (Aborted, Finalizing)
                | (Finalizing, Done)
                | (Finalizing, Aborted)
        )
    }

    /// Check if a run can be started from this state.
    pub fn can_begin(&self) -> bool {
        matches!(self, RunState::Idle)
    }

    /// Check if the state is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Aborted)
    }
}
