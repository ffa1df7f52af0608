//! Per-job processing state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Processing state of a single job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Dequeued, nothing started yet.
    Queued,
    /// Probing the source for metadata.
    Extracting,
    /// Producing quality variants.
    Transcoding,
    /// Extracting preview thumbnails.
    ThumbnailGen,
    /// Writing the streaming manifest.
    ManifestGen,
    /// Finished with at least the required artifacts.
    Completed,
    /// Finished without a usable result.
    Failed,
}

impl JobState {
    /// Returns true for states no transition leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Next state on the success path.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Queued => Some(Self::Extracting),
            Self::Extracting => Some(Self::Transcoding),
            Self::Transcoding => Some(Self::ThumbnailGen),
            Self::ThumbnailGen => Some(Self::ManifestGen),
            Self::ManifestGen => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Returns true if moving from `self` to `to` is allowed.
    pub fn can_transition_to(self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Failed || self.next() == Some(to)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Extracting => write!(f, "extracting"),
            Self::Transcoding => write!(f, "transcoding"),
            Self::ThumbnailGen => write!(f, "thumbnail_gen"),
            Self::ManifestGen => write!(f, "manifest_gen"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Rejected state change.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: JobState,
    pub to: JobState,
    pub at: DateTime<Utc>,
}

/// Tracks a job's state and the path it took.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: JobState,
    history: Vec<Transition>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Starts a machine in `Queued`.
    pub fn new() -> Self {
        Self {
            state: JobState::Queued,
            history: Vec::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Transitions taken so far.
    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Moves to `to` if the transition is allowed.
    pub fn advance(&mut self, to: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.history.push(Transition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
        Ok(())
    }

    /// Moves to `Failed`.
    pub fn fail(&mut self) -> Result<(), InvalidTransition> {
        self.advance(JobState::Failed)
    }
}
