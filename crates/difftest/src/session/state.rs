//! Session states.

use std::fmt;

use serde::Serialize;

use crate::compare::DivergenceReport;

/// Why a session stopped stepping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// DUT and REF disagreed after a batch.
    Diverged(Box<DivergenceReport>),
    /// The reference reached an end or abort state.
    BackendEnded,
    /// A stop was requested through the [`StopHandle`](super::StopHandle).
    UserStop,
    /// The guest program ended after its final batch compared equal.
    GuestExit {
        /// Exit code reported by the DUT.
        code: u64,
    },
    /// A batch failed part-way; the machines are no longer in a comparable state.
    Faulted {
        /// Rendered error.
        error: String,
    },
}

/// Lifecycle state of a session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, backend not yet initialized.
    #[default]
    Idle,
    /// Initialized and stepping.
    Running,
    /// Stopped for good.
    Halted(HaltReason),
}

impl SessionState {
    /// Returns `true` while batches may be stepped.
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns `true` once the session reached a terminal state.
    pub const fn is_halted(&self) -> bool {
        matches!(self, Self::Halted(_))
    }

    /// The halt reason, if halted.
    pub const fn halt_reason(&self) -> Option<&HaltReason> {
        match self {
            Self::Halted(reason) => Some(reason),
            _ => None,
        }
    }

    /// The divergence report, if the session halted on one.
    pub fn divergence(&self) -> Option<&DivergenceReport> {
        match self {
            Self::Halted(HaltReason::Diverged(report)) => Some(report),
            _ => None,
        }
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Diverged(report) => write!(f, "diverged: {report}"),
            Self::BackendEnded => write!(f, "reference ended"),
            Self::UserStop => write!(f, "stopped by user"),
            Self::GuestExit { code } => write!(f, "guest exited with code {code}"),
            Self::Faulted { error } => write!(f, "faulted: {error}"),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Halted(reason) => write!(f, "halted ({reason})"),
        }
    }
}
