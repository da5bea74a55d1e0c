//! Run state machine, progress events and the final run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::metrics::{MetricsSnapshot, SpiderMetrics};

/// Orchestrator state.
///
/// ```text
/// Idle -> Acquiring -> Processing -> Persisting -> Completed
///            ^______________________________|   (next batch)
/// any active state -> Paused -> back to a stage
/// any non-terminal state -> Failed | Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Acquiring,
    Processing,
    Persisting,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl RunState {
    /// Completed, Failed and Stopped accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    fn is_stage(&self) -> bool {
        matches!(self, Self::Acquiring | Self::Processing | Self::Persisting)
    }

    /// Whether the machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;

        if self.is_terminal() {
            return false;
        }

        match (*self, next) {
            (_, Failed) | (_, Stopped) => true,
            (Idle, Acquiring) => true,
            (Idle, _) => false,
            (Paused, next) => next.is_stage(),
            (_, Paused) => true,
            (_, Completed) => true,
            (_, next) => next.is_stage(),
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Processing => "processing",
            Self::Persisting => "persisting",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Progress notification emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: RunState,
    pub current: usize,
    pub total: usize,
}

/// Final report for one run, produced whether or not the run succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,

    /// Terminal state the run ended in
    pub state: RunState,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,

    /// Listings selected for the run after filters and the cap
    pub listings_selected: usize,

    pub records_persisted: usize,

    /// Checkpoint written at the end of the run, if it moved
    pub checkpoint: Option<DateTime<Utc>>,

    /// Reason the run halted early, if it did
    pub halt_reason: Option<String>,

    pub spider: SpiderMetrics,

    pub metrics: MetricsSnapshot,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RunState::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Idle.can_transition_to(Acquiring));
        assert!(Acquiring.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Persisting));
        assert!(Persisting.can_transition_to(Acquiring));
        assert!(Persisting.can_transition_to(Completed));
    }

    #[test]
    fn test_pause_and_stop() {
        assert!(Processing.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Processing));
        assert!(Paused.can_transition_to(Stopped));
        assert!(!Paused.can_transition_to(Completed));
        assert!(!Idle.can_transition_to(Paused));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [Completed, Failed, Stopped] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Acquiring));
            assert!(!terminal.can_transition_to(Failed));
        }
    }

    #[test]
    fn test_idle_cannot_skip_acquisition() {
        assert!(!Idle.can_transition_to(Processing));
        assert!(!Idle.can_transition_to(Completed));
        assert!(Idle.can_transition_to(Failed));
    }
}
