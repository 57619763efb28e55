//! Small stages used to exercise the pipeline machinery

use crossbeam_channel::Receiver;
use jobpipe::pipeline::{StageError, StageResult};
use jobpipe::{JobTree, Stage, StageContext};

/// Never accepts anything
pub struct Decline;

impl Stage for Decline {
    fn name(&self) -> &str {
        "decline"
    }

    fn can_handle(&self, _tree: &JobTree) -> bool {
        false
    }

    fn handle(&mut self, _ctx: &mut StageContext, _tree: JobTree) -> StageResult {
        Err(StageError::Failed("declining stage was handed a tree".into()))
    }
}

/// Records its own name as an attribute on the job root
pub struct Stamp(pub &'static str);

impl Stage for Stamp {
    fn name(&self) -> &str {
        self.0
    }

    fn can_handle(&self, _tree: &JobTree) -> bool {
        true
    }

    fn handle(&mut self, ctx: &mut StageContext, mut tree: JobTree) -> StageResult {
        let seen = match tree.root().get("visited") {
            Some(prev) => format!("{prev},{}", self.0),
            None => self.0.to_string(),
        };
        tree.root_mut().set("visited", seen);
        ctx.emit(tree);
        Ok(())
    }
}

/// Fails on a job whose id matches, passes everything else through
pub struct FailOn(pub &'static str);

impl Stage for FailOn {
    fn name(&self) -> &str {
        "fail-on"
    }

    fn can_handle(&self, _tree: &JobTree) -> bool {
        true
    }

    fn handle(&mut self, ctx: &mut StageContext, tree: JobTree) -> StageResult {
        if tree.id() == Some(self.0) {
            return Err(StageError::Failed(format!("refusing {}", self.0)));
        }
        ctx.emit(tree);
        Ok(())
    }
}

/// Blocks in `handle` until a unit is sent on the paired channel
pub struct Latch(pub Receiver<()>);

impl Stage for Latch {
    fn name(&self) -> &str {
        "latch"
    }

    fn can_handle(&self, _tree: &JobTree) -> bool {
        true
    }

    fn handle(&mut self, ctx: &mut StageContext, tree: JobTree) -> StageResult {
        let _ = self.0.recv();
        ctx.emit(tree);
        Ok(())
    }
}
