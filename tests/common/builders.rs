//! Test data builders for creating job trees

use jobpipe::tree::{attrs, tags};
use jobpipe::{Element, JobTree};

/// A page with one data file reference and a bit of text
pub fn page(id: &str) -> Element {
    Element::new(tags::PAGE)
        .with_attr(attrs::ID, id)
        .with_child(
            Element::new(tags::DATA)
                .with_attr(attrs::PATH, "images")
                .with_attr(attrs::FILENAME, format!("{id}.tif")),
        )
        .with_child(Element::new(tags::TEXT).with_text(format!("text of {id}")))
}

/// Builder for a single-source job tree
pub struct SourceBuilder {
    job_id: String,
    source: Element,
}

impl SourceBuilder {
    pub fn new(source_id: &str) -> Self {
        Self {
            job_id: format!("J-{source_id}"),
            source: Element::new(tags::SOURCE)
                .with_attr(attrs::ID, source_id)
                .with_attr(attrs::NAME, format!("Source {source_id}"))
                .with_attr(attrs::HREF, format!("/data/{source_id}")),
        }
    }

    pub fn attr(mut self, key: &str, value: &str) -> Self {
        self.source.set(key, value);
        self
    }

    /// Top-level document with pages `{id}-P1..={pages}`
    pub fn document(mut self, id: &str, pages: usize) -> Self {
        self.source.children.push(document(id, pages));
        self
    }

    /// Document nested under `parent`'s attachment wrapper
    pub fn attached(mut self, parent: &str, id: &str, pages: usize) -> Self {
        let child = document(id, pages).with_attr(attrs::PARENT, parent);
        if let Some(parent) = self
            .source
            .find_mut(&|e: &Element| e.is(tags::DOCUMENT) && e.id() == Some(parent))
        {
            match parent.child_mut(tags::ATTACHMENT) {
                Some(wrapper) => wrapper.children.push(child),
                None => parent
                    .children
                    .push(Element::new(tags::ATTACHMENT).with_child(child)),
            }
        } else {
            panic!("no document {parent} to attach {id} to");
        }
        self
    }

    pub fn build(self) -> JobTree {
        let root = Element::new(tags::JOB)
            .with_attr(attrs::ID, self.job_id)
            .with_child(self.source);
        JobTree::from_root(root).expect("valid job root")
    }
}

fn document(id: &str, pages: usize) -> Element {
    let mut doc = Element::new(tags::DOCUMENT).with_attr(attrs::ID, id);
    for n in 1..=pages {
        doc.children.push(page(&format!("{id}-P{n}")));
    }
    doc
}

/// Ids of every page in document order
pub fn page_ids(tree: &JobTree) -> Vec<String> {
    tree.pages()
        .filter_map(|p| p.id().map(str::to_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_builder() {
        let tree = SourceBuilder::new("S1")
            .document("D1", 2)
            .attached("D1", "D2", 1)
            .build();

        assert_eq!(tree.source_id(), Some("S1"));
        assert_eq!(page_ids(&tree), vec!["D1-P1", "D1-P2", "D2-P1"]);
    }
}
