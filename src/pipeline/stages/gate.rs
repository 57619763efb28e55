//! Status reporting with a veto.
//!
//! [`ValidationGate`] reports each tree to an external [`StatusCallback`]
//! as `(source id, command, value)`. A tree that fails the gate's validator
//! additionally raises a `warn` dispatch; a dispatch the callback refuses
//! drops the tree.

use crate::pipeline::error::StageResult;
use crate::pipeline::event::DropReason;
use crate::pipeline::stage::{Stage, StageContext};
use crate::tree::JobTree;
use std::sync::Arc;

/// Receiver of status updates, typically the job-tracking front end.
#[cfg_attr(test, mockall::automock)]
pub trait StatusCallback: Send + Sync {
    /// Returns `false` to refuse the update.
    fn dispatch(&self, target: &str, command: &str, value: Option<String>) -> bool;
}

type Validator = Box<dyn Fn(&JobTree) -> bool + Send>;
type ValueFn = Box<dyn Fn(&JobTree) -> Option<String> + Send>;

pub struct ValidationGate {
    command: String,
    validator: Validator,
    value: ValueFn,
    callback: Arc<dyn StatusCallback>,
}

impl ValidationGate {
    pub const NAME: &'static str = "validation-gate";

    /// Command used when a tree fails validation.
    pub const WARN: &'static str = "warn";

    pub fn new(command: impl Into<String>, callback: Arc<dyn StatusCallback>) -> Self {
        Self {
            command: command.into(),
            validator: Box::new(|_| true),
            value: Box::new(|_| None),
            callback,
        }
    }

    pub fn with_validator(mut self, f: impl Fn(&JobTree) -> bool + Send + 'static) -> Self {
        self.validator = Box::new(f);
        self
    }

    /// Derive the dispatched value from the tree, e.g. a document count.
    pub fn with_value(mut self, f: impl Fn(&JobTree) -> Option<String> + Send + 'static) -> Self {
        self.value = Box::new(f);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Stage for ValidationGate {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, tree: &JobTree) -> bool {
        tree.source_id().is_some()
    }

    fn handle(&mut self, ctx: &mut StageContext, tree: JobTree) -> StageResult {
        let target = tree.source_id().unwrap_or_default().to_string();

        if !(self.validator)(&tree) {
            tracing::warn!("{}: validation failed for {}", self.command, target);
            self.callback.dispatch(
                &target,
                Self::WARN,
                Some(format!("{} failed validation", self.command)),
            );
        }

        let value = (self.value)(&tree);
        if self.callback.dispatch(&target, &self.command, value) {
            ctx.emit(tree);
        } else {
            tracing::warn!("'{}' refused for {}, dropping tree", self.command, target);
            ctx.dropped(DropReason::Rejected {
                command: self.command.clone(),
                target,
            });
        }
        Ok(())
    }
}
