//! Pipeline-specific error types.

use crate::pipeline::id::Level;
use crate::tree::TreeError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the pipeline orchestrator and its handles.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Timed out after {0:?} waiting for output")]
    Timeout(Duration),

    #[error("Pipeline is closed")]
    Closed,

    #[error("Entry queue is full")]
    Full,

    #[error("Channel send error")]
    ChannelSend,

    #[error("Channel receive error")]
    ChannelRecv,

    #[error("Failed to spawn worker for level {level}: {source}")]
    Spawn {
        level: Level,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown stage kind: {0}")]
    UnknownStage(String),

    #[error("Invalid option '{key}' for stage {stage}: {message}")]
    InvalidOption {
        stage: String,
        key: String,
        message: String,
    },
}

/// An unrecovered failure inside `Stage::handle`.
///
/// Returning one stops the worker that owns the stage.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("{0}")]
    Failed(String),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

pub type StageResult = std::result::Result<(), StageError>;
