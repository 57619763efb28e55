//! # jobpipe: level-routed job tree pipeline
//!
//! A concurrent, multi-stage pipeline for tree-shaped work items (a job with
//! sources, documents and pages), plus stages that split a tree into
//! fragments and reassemble it further down the line.
//!
//! ## Architecture
//!
//! - **Tree**: the `job > source > document > page` model and its XML form
//! - **Pipeline**: one thread per stage, a recycler promoting items between
//!   levels, and a terminal sink feeding the output queue
//! - **Stages**: split/merge by document and by page, page data hashing,
//!   soak/flush, timing and dumping
//! - **Communication**: crossbeam channels only; no shared mutable state
//!   beyond the settings table
//!
//! ## Configuration
//!
//! Pipelines can be described in TOML (or JSON) and are looked for by default
//! under the platform config directory:
//!
//! - **Linux**: `~/.config/jobpipe/pipeline.toml`
//! - **macOS**: `~/Library/Application Support/jobpipe/pipeline.toml`
//! - **Windows**: `%APPDATA%\jobpipe\pipeline.toml`
//!
//! ## Example
//!
//! ```no_run
//! use jobpipe::pipeline::stages::{MergeByDocument, SplitByDocument};
//! use jobpipe::{JobTree, Pipeline};
//! use std::time::Duration;
//!
//! fn main() -> jobpipe::Result<()> {
//!     let mut pipeline = Pipeline::new(30)?;
//!     pipeline.add_stage(SplitByDocument::new())?;
//!     pipeline.add_stage(MergeByDocument::new())?;
//!
//!     let tree = JobTree::from_xml(&std::fs::read_to_string("job.xml")?)?;
//!     pipeline.submit(tree)?;
//!     let done = pipeline.retrieve(Some(Duration::from_secs(10)))?;
//!     println!("{}", done.to_xml()?);
//!
//!     pipeline.close();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod tree;

// Re-export commonly used types
pub use config::{PipelineConfig, SharedSettings, StageSpec};
pub use error::{JobPipeError, Result, ResultExt};
pub use pipeline::{
    Delivery, DropReason, Pipeline, PipelineError, PipelineEvent, PipelineHandle, Stage,
    StageContext, StageKind,
};
pub use tree::{Element, FragmentKind, JobTree, TreeError};
