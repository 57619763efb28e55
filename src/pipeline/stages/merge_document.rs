//! Fan-in by document.
//!
//! Collects document fragments per source id until the master skeleton has
//! arrived and every one of its document slots is filled, then splices the
//! fragments in, clears the marker and emits the source once. A fragment
//! document without a slot of its own but with a `parent` id is attached
//! under that document's `attachment` wrapper.

use crate::pipeline::error::StageResult;
use crate::pipeline::event::DropReason;
use crate::pipeline::stage::{Stage, StageContext};
use crate::pipeline::stages::ledger::{Ledger, LedgerEntry};
use crate::tree::{attrs, tags, Element, FragmentKind, JobTree};
use std::time::{Duration, Instant};

pub struct MergeByDocument {
    ledger: Ledger,
}

impl MergeByDocument {
    pub const NAME: &'static str = "merge-by-document";

    pub fn new() -> Self {
        Self::with_timeout(None)
    }

    /// Evict containers that see no activity for `timeout`.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            ledger: Ledger::new(timeout),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn expire(&mut self, ctx: &mut StageContext, now: Instant) {
        for (container, entry) in self.ledger.expire(now) {
            let expected = entry.master().map(slot_ids).map_or(0, |s| s.len());
            tracing::warn!(
                "Abandoning reconstruction of source {} after timeout",
                container
            );
            ctx.dropped(DropReason::IncompleteReconstruction {
                container,
                filled: entry.fragment_count(),
                expected,
            });
        }
    }

    fn try_complete(&mut self, ctx: &mut StageContext, container: &str) {
        let ready = self.ledger.get(container).is_some_and(|entry| {
            entry
                .master()
                .is_some_and(|m| slot_ids(m).iter().all(|id| entry.has_fragment(id)))
        });
        if !ready {
            ctx.pending(container);
            return;
        }
        let Some(mut entry) = self.ledger.remove(container) else {
            return;
        };
        if let Some(tree) = assemble(ctx, &mut entry) {
            tracing::debug!("Reassembled source {}", container);
            ctx.emit(tree);
        }
    }
}

impl Default for MergeByDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// Ids of the master's top-level document slots.
fn slot_ids(master: &JobTree) -> Vec<String> {
    master
        .documents()
        .filter_map(Element::id)
        .map(str::to_string)
        .collect()
}

/// Splice every fragment into the master. Consumes the entry's contents.
fn assemble(ctx: &mut StageContext, entry: &mut LedgerEntry) -> Option<JobTree> {
    let mut master = entry.take_master()?;
    let mut fragments = entry.take_fragments();
    let source = master.source_mut()?;

    for slot in source.children_named_mut(tags::DOCUMENT) {
        let Some(id) = slot.id().map(str::to_string) else {
            continue;
        };
        if let Some(pos) = fragments.iter().position(|(k, _)| *k == id) {
            *slot = fragments.remove(pos).1;
        }
    }

    // Remaining fragments have no slot; hang them under their parent.
    // Parents may themselves be waiting, so repeat until nothing moves.
    loop {
        let before = fragments.len();
        fragments.retain(|(_, document)| !attach_to_parent(source, document));
        if fragments.is_empty() || fragments.len() == before {
            break;
        }
    }
    for (id, _) in fragments {
        tracing::warn!("Document {} has no slot or parent in its source", id);
        ctx.dropped(DropReason::Stage(format!(
            "document {id} has no slot or parent in its source"
        )));
    }

    source.set_pending(false);
    Some(master)
}

/// Attach `document` under the `attachment` wrapper of its parent, if present.
fn attach_to_parent(source: &mut Element, document: &Element) -> bool {
    let Some(parent_id) = document.get(attrs::PARENT) else {
        return false;
    };
    let Some(parent) =
        source.find_mut(&|e| e.is(tags::DOCUMENT) && e.id() == Some(parent_id))
    else {
        return false;
    };
    if parent.child(tags::ATTACHMENT).is_none() {
        parent.children.push(Element::new(tags::ATTACHMENT));
    }
    if let Some(wrapper) = parent.child_mut(tags::ATTACHMENT) {
        wrapper.children.push(document.clone());
    }
    true
}

impl Stage for MergeByDocument {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, tree: &JobTree) -> bool {
        if tree.source_count() != 1 {
            return false;
        }
        let is_master = tree.source().is_some_and(Element::is_pending);
        let is_fragment = tree.fragment_kind() == Some(FragmentKind::Document)
            && tree.documents().count() == 1;
        is_master || is_fragment
    }

    fn handle(&mut self, ctx: &mut StageContext, tree: JobTree) -> StageResult {
        let now = Instant::now();
        self.expire(ctx, now);

        let Some(container) = tree.source_id().map(str::to_string) else {
            ctx.dropped(DropReason::Stage("source without id".to_string()));
            return Ok(());
        };

        if tree.source().is_some_and(Element::is_pending) {
            if !self.ledger.touch(&container, now).set_master(tree) {
                tracing::warn!("Duplicate master for source {}", container);
                ctx.dropped(DropReason::Stage(format!(
                    "duplicate master for source {container}"
                )));
                return Ok(());
            }
        } else {
            let Some(document) = tree.documents().next().cloned() else {
                return Ok(());
            };
            let Some(doc_id) = document.id().map(str::to_string) else {
                ctx.dropped(DropReason::Stage(format!(
                    "document without id in source {container}"
                )));
                return Ok(());
            };
            if !self.ledger.touch(&container, now).add_fragment(&doc_id, document) {
                tracing::warn!("Duplicate document {} for source {}", doc_id, container);
                ctx.dropped(DropReason::Stage(format!(
                    "duplicate document {doc_id} for source {container}"
                )));
                return Ok(());
            }
        }

        self.try_complete(ctx, &container);
        Ok(())
    }

    fn on_idle(&mut self, ctx: &mut StageContext) {
        self.expire(ctx, Instant::now());
    }

    fn on_end(&mut self) {
        for container in self.ledger.containers() {
            tracing::warn!("Source {} still awaiting reconstruction at shutdown", container);
        }
    }
}
