//! Observable pipeline outcomes.
//!
//! Workers and the recycler report everything that does not end up on the
//! output queue through an unbounded event channel. Consumers drain it with
//! `PipelineHandle::try_event` / `drain_events`; nobody is required to.

use crate::pipeline::id::Level;
use std::fmt;

/// Why a stage discarded an item instead of emitting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// A fan-in entry expired before every fragment slot was filled.
    IncompleteReconstruction {
        container: String,
        filled: usize,
        expected: usize,
    },
    /// A status callback refused the item.
    Rejected { command: String, target: String },
    /// Stage-specific reason.
    Stage(String),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::IncompleteReconstruction {
                container,
                filled,
                expected,
            } => write!(
                f,
                "incomplete reconstruction of {container} ({filled}/{expected} fragments)"
            ),
            DropReason::Rejected { command, target } => {
                write!(f, "'{command}' rejected for {target}")
            }
            DropReason::Stage(msg) => f.write_str(msg),
        }
    }
}

/// Messages sent from workers and the recycler to whoever is listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A worker thread is up and reading its inbox.
    StageStarted { level: Level, stage: String },

    /// A fan-in stage retained a fragment and is waiting for the rest.
    Pending {
        level: Level,
        stage: String,
        container: String,
    },

    /// A stage discarded an item.
    Dropped {
        level: Level,
        stage: String,
        reason: DropReason,
    },

    /// `Stage::handle` failed; the worker at `level` has stopped.
    StageFailed {
        level: Level,
        stage: String,
        message: String,
    },

    /// The recycler could not deliver to `level` because its worker is gone.
    Undeliverable { level: Level },
}

impl PipelineEvent {
    /// Level the event originated from.
    pub fn level(&self) -> Level {
        match self {
            PipelineEvent::StageStarted { level, .. }
            | PipelineEvent::Pending { level, .. }
            | PipelineEvent::Dropped { level, .. }
            | PipelineEvent::StageFailed { level, .. }
            | PipelineEvent::Undeliverable { level } => *level,
        }
    }
}
