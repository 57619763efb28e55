//! Level-routed, multi-threaded stage pipeline.
//!
//! Trees enter at level 0 and climb one registered level at a time until
//! they reach the terminal sink. Every stage runs on its own thread and only
//! talks to the rest of the pipeline through channels.
//!
//! # Architecture
//!
//! ```text
//! [entry] ──► [level 0] ──► [middle] ──► recycler ──► [level 1] ──► ...
//!                                            └─────────► [sink] ──► [output]
//! ```
//!
//! # Design
//!
//! - **Recycler** is the only thing that raises an item's level; workers
//!   always hand their output back tagged with their own level.
//! - **Level snapshot**: the recycler owns an immutable `LevelTable`,
//!   replaced over a control channel when a stage registers.
//! - **Actor stages**: each stage exclusively owns its state, so fan-in
//!   ledgers need no locking.
//! - **Explicit outcomes**: a stage emits, reports a pending reconstruction,
//!   or drops with a reason; the latter two become [`PipelineEvent`]s.

pub mod envelope;
pub mod error;
pub mod event;
pub mod id;
pub mod options;
pub mod orchestrator;
mod recycler;
pub mod stage;
pub mod stage_kind;
pub mod stages;
mod worker;

pub use envelope::{Delivery, Envelope};
pub use error::{PipelineError, PipelineResult, StageError, StageResult};
pub use event::{DropReason, PipelineEvent};
pub use id::Level;
pub use options::{ConfigValue, StageOptions};
pub use orchestrator::{Pipeline, PipelineHandle};
pub use stage::{Stage, StageContext, StageOutput};
pub use stage_kind::StageKind;
