//! Fan-in by page.
//!
//! Same protocol as the document merge one level deeper: fragments are keyed
//! by their top-level document id and re-threaded into the master's emptied
//! page slots by page id.

use crate::pipeline::error::StageResult;
use crate::pipeline::event::DropReason;
use crate::pipeline::stage::{Stage, StageContext};
use crate::pipeline::stages::ledger::{Ledger, LedgerEntry};
use crate::tree::{tags, Element, FragmentKind, JobTree};
use std::time::{Duration, Instant};

pub struct MergeByPage {
    ledger: Ledger,
}

impl MergeByPage {
    pub const NAME: &'static str = "merge-by-page";

    pub fn new() -> Self {
        Self::with_timeout(None)
    }

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
                "Abandoning reconstruction of document {} after timeout",
                container
            );
            ctx.dropped(DropReason::IncompleteReconstruction {
                container,
                filled: entry.fragment_count(),
                expected,
            });
        }
    }
}

impl Default for MergeByPage {
    fn default() -> Self {
        Self::new()
    }
}

fn top_document(tree: &JobTree) -> Option<&Element> {
    tree.documents().next()
}

/// Page ids below the master's top-level document.
fn slot_ids(master: &JobTree) -> Vec<String> {
    top_document(master)
        .map(|d| {
            d.descendants()
                .filter(|e| e.is(tags::PAGE))
                .filter_map(Element::id)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn assemble(ctx: &mut StageContext, entry: &mut LedgerEntry) -> Option<JobTree> {
    let mut master = entry.take_master()?;
    let mut fragments = entry.take_fragments();
    let document = master.source_mut()?.child_mut(tags::DOCUMENT)?;

    document.for_each_descendant_mut(&mut |e| {
        if !e.is(tags::PAGE) {
            return;
        }
        let Some(id) = e.id() else {
            return;
        };
        if let Some(pos) = fragments.iter().position(|(k, _)| k == id) {
            *e = fragments.remove(pos).1;
        }
    });
    for (id, _) in fragments {
        tracing::warn!("Page {} has no slot in its document", id);
        ctx.dropped(DropReason::Stage(format!(
            "page {id} has no slot in its document"
        )));
    }

    document.set_pending(false);
    Some(master)
}

impl Stage for MergeByPage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, tree: &JobTree) -> bool {
        if tree.source_count() != 1 {
            return false;
        }
        let mut documents = tree.documents();
        let (Some(document), None) = (documents.next(), documents.next()) else {
            return false;
        };
        let is_master = document.is_pending();
        let is_fragment =
            tree.fragment_kind() == Some(FragmentKind::Page) && tree.page_count() == 1;
        is_master || is_fragment
    }

    fn handle(&mut self, ctx: &mut StageContext, tree: JobTree) -> StageResult {
        let now = Instant::now();
        self.expire(ctx, now);

        let Some(container) = top_document(&tree).and_then(Element::id).map(str::to_string)
        else {
            ctx.dropped(DropReason::Stage("document without id".to_string()));
            return Ok(());
        };

        if top_document(&tree).is_some_and(Element::is_pending) {
            if !self.ledger.touch(&container, now).set_master(tree) {
                tracing::warn!("Duplicate master for document {}", container);
                ctx.dropped(DropReason::Stage(format!(
                    "duplicate master for document {container}"
                )));
                return Ok(());
            }
        } else {
            let Some(page) = tree.pages().next().cloned() else {
                return Ok(());
            };
            let Some(page_id) = page.id().map(str::to_string) else {
                ctx.dropped(DropReason::Stage(format!(
                    "page without id in document {container}"
                )));
                return Ok(());
            };
            if !self.ledger.touch(&container, now).add_fragment(&page_id, page) {
                tracing::warn!("Duplicate page {} for document {}", page_id, container);
                ctx.dropped(DropReason::Stage(format!(
                    "duplicate page {page_id} for document {container}"
                )));
                return Ok(());
            }
        }

        let ready = self.ledger.get(&container).is_some_and(|entry| {
            entry
                .master()
                .is_some_and(|m| slot_ids(m).iter().all(|id| entry.has_fragment(id)))
        });
        if !ready {
            ctx.pending(container);
            return Ok(());
        }
        if let Some(mut entry) = self.ledger.remove(&container) {
            if let Some(tree) = assemble(ctx, &mut entry) {
                tracing::debug!("Reassembled document {}", container);
                ctx.emit(tree);
            }
        }
        Ok(())
    }

    fn on_idle(&mut self, ctx: &mut StageContext) {
        self.expire(ctx, Instant::now());
    }

    fn on_end(&mut self) {
        for container in self.ledger.containers() {
            tracing::warn!(
                "Document {} still awaiting reconstruction at shutdown",
                container
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::Level;
    use crate::pipeline::stage::StageOutput;
    use crate::pipeline::stages::split_page::SplitByPage;
    use crate::pipeline::stages::testing::{nested_tree, source_tree};
    use proptest::prelude::*;

    fn split(tree: JobTree) -> Vec<JobTree> {
        let mut stage = SplitByPage::new();
        let mut ctx = StageContext::new(Level(0));
        stage.handle(&mut ctx, tree).unwrap();
        ctx.into_emitted()
    }

    fn merge_all(merge: &mut MergeByPage, trees: Vec<JobTree>) -> Vec<JobTree> {
        let mut ctx = StageContext::new(Level(1));
        for tree in trees {
            assert!(merge.can_handle(&tree));
            merge.handle(&mut ctx, tree).unwrap();
        }
        ctx.into_emitted()
    }

    #[test]
    fn test_round_trip() {
        let original = source_tree("S1", &[("D1", 4)]);
        let mut parts = split(original.clone());
        parts.rotate_left(2);

        let mut merge = MergeByPage::new();
        let out = merge_all(&mut merge, parts);
        assert_eq!(out, vec![original]);
        assert!(merge.ledger().is_empty());
    }

    #[test]
    fn test_nested_round_trip() {
        let original = nested_tree();
        let mut merge = MergeByPage::new();
        let out = merge_all(&mut merge, split(original.clone()));
        assert_eq!(out, vec![original]);
    }

    #[test]
    fn test_missing_page_keeps_pending() {
        let mut parts = split(source_tree("S1", &[("D1", 3)]));
        parts.remove(1);

        let mut merge = MergeByPage::new();
        let mut ctx = StageContext::new(Level(1));
        for tree in parts {
            merge.handle(&mut ctx, tree).unwrap();
        }
        assert!(ctx
            .outputs()
            .iter()
            .all(|o| matches!(o, StageOutput::Pending { container } if container == "D1")));
        assert!(merge.ledger().contains("D1"));
    }

    #[test]
    fn test_document_fragments_are_not_page_fragments() {
        let merge = MergeByPage::new();
        let mut tree = source_tree("S1", &[("D1", 1)]);
        tree.set_fragment_kind(FragmentKind::Document);
        assert!(!merge.can_handle(&tree));
    }

    proptest! {
        #[test]
        fn prop_page_round_trip(pages in 2usize..12, shift in 0usize..12) {
            let original = source_tree("S1", &[("D1", pages)]);
            let mut parts = split(original.clone());
            let len = parts.len();
            parts.rotate_left(shift % len);

            let mut merge = MergeByPage::new();
            let out = merge_all(&mut merge, parts);
            prop_assert_eq!(out, vec![original]);
        }
    }
}
