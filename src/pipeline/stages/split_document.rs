//! Fan-out by document.
//!
//! A single-source tree becomes one fragment per top-level document plus the
//! original tree as the master skeleton: its source marked
//! `pending-reconstruction` and every document emptied. Fragments keep the
//! job and source attributes and carry the document's full subtree.

use crate::pipeline::error::StageResult;
use crate::pipeline::stage::{Stage, StageContext};
use crate::tree::{tags, FragmentKind, JobTree};

pub struct SplitByDocument;

impl SplitByDocument {
    pub const NAME: &'static str = "split-by-document";

    pub fn new() -> Self {
        Self
    }
}

impl Default for SplitByDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for SplitByDocument {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, tree: &JobTree) -> bool {
        if tree.source_count() != 1 || tree.fragment_kind() == Some(FragmentKind::Document) {
            return false;
        }
        let Some(source) = tree.source() else {
            return false;
        };
        if source.is_pending() {
            return false;
        }
        // one document with at most one page is already minimal
        match tree.documents().count() {
            0 => false,
            1 => tree.page_count() > 1,
            _ => true,
        }
    }

    fn handle(&mut self, ctx: &mut StageContext, tree: JobTree) -> StageResult {
        let Some(source) = tree.source() else {
            ctx.emit(tree);
            return Ok(());
        };

        let mut fragments = 0;
        for document in source.children_named(tags::DOCUMENT) {
            let mut fragment = tree.fragment_shell(FragmentKind::Document);
            fragment
                .root_mut()
                .children
                .push(source.shallow_copy().with_child(document.clone()));
            ctx.emit(fragment);
            fragments += 1;
        }

        let mut master = tree;
        if let Some(source) = master.source_mut() {
            source.set_pending(true);
            for document in source.children_named_mut(tags::DOCUMENT) {
                document.children.clear();
                document.text = None;
            }
        }
        tracing::debug!(
            "Split source {:?} into {} document fragments",
            master.source_id(),
            fragments
        );
        ctx.emit(master);
        Ok(())
    }
}
