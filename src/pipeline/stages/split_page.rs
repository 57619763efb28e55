//! Fan-out by page.
//!
//! Works on a tree holding a single top-level document (typically a
//! document fragment). Each page becomes a fragment carrying the minimal
//! ancestor chain `source > document > [attachment > document >] page`,
//! with every ancestor's non-hierarchy children (metadata) copied along.
//! The master keeps every page in place but empties it and marks the
//! top-level document `pending-reconstruction`.

use crate::pipeline::error::StageResult;
use crate::pipeline::stage::{Stage, StageContext};
use crate::tree::{tags, Element, FragmentKind, JobTree};

/// Elements that form the hierarchy rather than metadata.
const HIERARCHY: [&str; 3] = [tags::PAGE, tags::DOCUMENT, tags::ATTACHMENT];

pub struct SplitByPage;

impl SplitByPage {
    pub const NAME: &'static str = "split-by-page";

    pub fn new() -> Self {
        Self
    }
}

impl Default for SplitByPage {
    fn default() -> Self {
        Self::new()
    }
}

/// Child-index paths from `element` to every page below it, in document order.
fn page_paths(element: &Element, path: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
    for (i, child) in element.children.iter().enumerate() {
        path.push(i);
        if child.is(tags::PAGE) {
            out.push(path.clone());
        } else {
            page_paths(child, path, out);
        }
        path.pop();
    }
}

/// Rebuild the chain from `source` down to the page at `path`.
fn chain_to(source: &Element, path: &[usize]) -> Option<Element> {
    let mut nodes = Vec::with_capacity(path.len());
    let mut current = source;
    for &i in path {
        current = current.children.get(i)?;
        nodes.push(current);
    }

    let mut built = nodes.pop()?.clone();
    for ancestor in nodes.into_iter().rev() {
        let mut copy = ancestor.shallow_copy();
        copy.children.extend(
            ancestor
                .children
                .iter()
                .filter(|c| !HIERARCHY.contains(&c.tag.as_str()))
                .cloned(),
        );
        copy.children.push(built);
        built = copy;
    }
    Some(source.shallow_copy().with_child(built))
}

impl Stage for SplitByPage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, tree: &JobTree) -> bool {
        if tree.source_count() != 1 || tree.fragment_kind() == Some(FragmentKind::Page) {
            return false;
        }
        if tree.source().is_some_and(Element::is_pending) {
            return false;
        }
        let mut documents = tree.documents();
        match (documents.next(), documents.next()) {
            (Some(document), None) => !document.is_pending() && tree.page_count() > 1,
            _ => false,
        }
    }

    fn handle(&mut self, ctx: &mut StageContext, tree: JobTree) -> StageResult {
        let Some(source) = tree.source() else {
            ctx.emit(tree);
            return Ok(());
        };

        let mut paths = Vec::new();
        page_paths(source, &mut Vec::new(), &mut paths);
        for path in &paths {
            if let Some(chain) = chain_to(source, path) {
                let mut fragment = tree.fragment_shell(FragmentKind::Page);
                fragment.root_mut().children.push(chain);
                ctx.emit(fragment);
            }
        }

        let mut master = tree;
        if let Some(document) = master
            .source_mut()
            .and_then(|s| s.child_mut(tags::DOCUMENT))
        {
            document.set_pending(true);
            document.for_each_descendant_mut(&mut |e| {
                if e.is(tags::PAGE) {
                    e.children.clear();
                    e.text = None;
                }
            });
        }
        tracing::debug!(
            "Split source {:?} into {} page fragments",
            master.source_id(),
            paths.len()
        );
        ctx.emit(master);
        Ok(())
    }
}
