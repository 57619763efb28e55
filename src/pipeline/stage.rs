//! Stage abstraction for the pipeline.
//!
//! A stage is bound to exactly one level and owned by exactly one worker
//! thread, so it can keep private state across items without locking.
//! `can_handle` is a pure applicability test; when it returns `false` the
//! worker forwards the tree untouched. `handle` reports its results through
//! the `StageContext`: any number of emitted trees plus pending/dropped
//! outcomes that surface as pipeline events.

use crate::pipeline::error::StageResult;
use crate::pipeline::event::DropReason;
use crate::pipeline::id::Level;
use crate::tree::JobTree;

/// One result of a stage invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    /// Promote this tree to the next level.
    Emit(JobTree),
    /// Input retained; nothing is emitted until the container is complete.
    Pending { container: String },
    /// Input discarded.
    Dropped(DropReason),
}

/// Output buffer handed to `Stage::handle` and `Stage::on_idle`.
pub struct StageContext {
    level: Level,
    outputs: Vec<StageOutput>,
}

impl StageContext {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            outputs: Vec::new(),
        }
    }

    /// Level of the stage being invoked.
    pub fn level(&self) -> Level {
        self.level
    }

    pub fn emit(&mut self, tree: JobTree) {
        self.outputs.push(StageOutput::Emit(tree));
    }

    pub fn pending(&mut self, container: impl Into<String>) {
        self.outputs.push(StageOutput::Pending {
            container: container.into(),
        });
    }

    pub fn dropped(&mut self, reason: DropReason) {
        self.outputs.push(StageOutput::Dropped(reason));
    }

    pub fn outputs(&self) -> &[StageOutput] {
        &self.outputs
    }

    /// Take every output recorded so far.
    pub fn drain(&mut self) -> Vec<StageOutput> {
        std::mem::take(&mut self.outputs)
    }

    /// Emitted trees only, consuming the context.
    pub fn into_emitted(self) -> Vec<JobTree> {
        self.outputs
            .into_iter()
            .filter_map(|out| match out {
                StageOutput::Emit(tree) => Some(tree),
                _ => None,
            })
            .collect()
    }
}

/// A processing step bound to one pipeline level.
pub trait Stage: Send {
    /// Human-readable name, used for the worker thread and in events.
    fn name(&self) -> &str;

    /// Whether `handle` applies to this tree. Must not mutate anything.
    fn can_handle(&self, tree: &JobTree) -> bool;

    /// Transform one tree. An `Err` stops this stage's worker for good.
    fn handle(&mut self, ctx: &mut StageContext, tree: JobTree) -> StageResult;

    /// Called whenever the worker's inbox stays empty for a poll interval.
    fn on_idle(&mut self, _ctx: &mut StageContext) {}

    /// Called once when the worker exits.
    fn on_end(&mut self) {}
}

impl Stage for Box<dyn Stage> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn can_handle(&self, tree: &JobTree) -> bool {
        (**self).can_handle(tree)
    }

    fn handle(&mut self, ctx: &mut StageContext, tree: JobTree) -> StageResult {
        (**self).handle(ctx, tree)
    }

    fn on_idle(&mut self, ctx: &mut StageContext) {
        (**self).on_idle(ctx)
    }

    fn on_end(&mut self) {
        (**self).on_end()
    }
}
