//! Logs the time between consecutive items passing a point in the pipeline.

use crate::pipeline::error::StageResult;
use crate::pipeline::stage::{Stage, StageContext};
use crate::tree::JobTree;
use std::time::{Duration, Instant};

pub struct Timer {
    label: String,
    last: Instant,
}

impl Timer {
    pub const NAME: &'static str = "timer";
    pub const DEFAULT_LABEL: &'static str = "elapsed";

    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            last: Instant::now(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Time since the previous item (or construction), resetting the clock.
    fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        self.last = now;
        elapsed
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LABEL)
    }
}

impl Stage for Timer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, _tree: &JobTree) -> bool {
        true
    }

    fn handle(&mut self, ctx: &mut StageContext, tree: JobTree) -> StageResult {
        let elapsed = self.lap();
        tracing::info!(
            "{}: {:.4} sec ({:?})",
            self.label,
            elapsed.as_secs_f64(),
            tree.source_id()
        );
        ctx.emit(tree);
        Ok(())
    }
}
