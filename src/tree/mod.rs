//! Hierarchical job tree.
//!
//! A job tree is the unit of work moving through the pipeline:
//!
//! ```text
//! job
//! +-- source            (id, href, name, type, size, pending-reconstruction)
//!     +-- document      (id, parent, pending-reconstruction)
//!     |   +-- page      (id, name)
//!     |   |   +-- data  (path, filename, size, checksum, missing)
//!     |   |   +-- number / meta / order / text
//!     |   +-- attachment
//!     |       +-- document
//!     |           +-- page ...
//!     +-- document ...
//! ```
//!
//! Nodes are owned `Element`s with ordered attributes and their text kept in
//! place (leading text plus the tail after each child), so a tree that no
//! stage touches serializes back to exactly the same XML, apart from
//! whitespace-only runs between elements.

pub mod xml;

use std::fmt;
use thiserror::Error;

/// Element names used by the job tree format.
pub mod tags {
    pub const JOB: &str = "job";
    pub const SOURCE: &str = "source";
    pub const DOCUMENT: &str = "document";
    pub const ATTACHMENT: &str = "attachment";
    pub const PAGE: &str = "page";
    pub const DATA: &str = "data";
    pub const NUMBER: &str = "number";
    pub const META: &str = "meta";
    pub const ORDER: &str = "order";
    pub const TEXT: &str = "text";
}

/// Attribute names used by the job tree format.
pub mod attrs {
    pub const ID: &str = "id";
    pub const PARENT: &str = "parent";
    pub const HREF: &str = "href";
    pub const TEMPHREF: &str = "temphref";
    pub const NAME: &str = "name";
    pub const TYPE: &str = "type";
    pub const SIZE: &str = "size";
    pub const VALUE: &str = "value";
    pub const PATH: &str = "path";
    pub const FILENAME: &str = "filename";
    pub const OLDPATH: &str = "oldpath";
    pub const OLDFILENAME: &str = "oldfilename";
    pub const CHECKSUM: &str = "checksum";
    pub const MISSING: &str = "missing";
    pub const CREATED: &str = "created";
    /// Marks a container as an incomplete fan-in master.
    pub const PENDING: &str = "pending-reconstruction";
    /// Set on the `job` root of a fan-out fragment (`document` or `page`).
    pub const FRAGMENT: &str = "fragment";
}

/// Errors raised while building, parsing or writing job trees.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("XML error at byte {position}: {message}")]
    Xml { position: usize, message: String },

    #[error("Expected <{expected}> root element, found <{found}>")]
    UnexpectedRoot { expected: String, found: String },

    #[error("Unclosed element <{0}>")]
    Unclosed(String),

    #[error("Document has no root element")]
    Empty,

    #[error("Document has more than one root element")]
    MultipleRoots,
}

/// A single tree node: tag, ordered attributes, optional text and children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub tag: String,
    attributes: Vec<(String, String)>,
    /// Text before the first child.
    pub text: Option<String>,
    /// Text following this element inside its parent (mixed content).
    pub tail: Option<String>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Builder-style child append.
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[inline]
    pub fn is(&self, tag: &str) -> bool {
        self.tag == tag
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, keeping its original position if it already exists.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        let pos = self.attributes.iter().position(|(k, _)| k == key)?;
        Some(self.attributes.remove(pos).1)
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Replace all attributes with those of `other`.
    pub fn copy_attrs_from(&mut self, other: &Element) {
        self.attributes = other.attributes.clone();
    }

    #[inline]
    pub fn id(&self) -> Option<&str> {
        self.get(attrs::ID)
    }

    /// True when the pending-reconstruction marker is set.
    pub fn is_pending(&self) -> bool {
        self.get(attrs::PENDING) == Some("true")
    }

    pub fn set_pending(&mut self, pending: bool) {
        if pending {
            self.set(attrs::PENDING, "true");
        } else {
            self.remove_attr(attrs::PENDING);
        }
    }

    /// Copy of this element with its attributes only (no text, no children).
    pub fn shallow_copy(&self) -> Element {
        Element {
            tag: self.tag.clone(),
            attributes: self.attributes.clone(),
            ..Default::default()
        }
    }

    /// First direct child with the given tag.
    pub fn child(&self, tag: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.is(tag))
    }

    pub fn child_mut(&mut self, tag: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.is(tag))
    }

    /// Direct children with the given tag.
    pub fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.is(tag))
    }

    pub fn children_named_mut<'a>(
        &'a mut self,
        tag: &'a str,
    ) -> impl Iterator<Item = &'a mut Element> + 'a {
        self.children.iter_mut().filter(move |c| c.is(tag))
    }

    /// Pre-order iterator over every element below this one.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }

    /// Number of descendants with the given tag.
    pub fn count(&self, tag: &str) -> usize {
        self.descendants().filter(|e| e.is(tag)).count()
    }

    /// Apply `f` to every descendant in pre-order.
    pub fn for_each_descendant_mut(&mut self, f: &mut impl FnMut(&mut Element)) {
        for child in &mut self.children {
            f(child);
            child.for_each_descendant_mut(f);
        }
    }

    /// First descendant (pre-order) matching the predicate.
    pub fn find_mut(&mut self, pred: &impl Fn(&Element) -> bool) -> Option<&mut Element> {
        for child in &mut self.children {
            if pred(child) {
                return Some(child);
            }
            if let Some(found) = child.find_mut(pred) {
                return Some(found);
            }
        }
        None
    }
}

/// Pre-order traversal over an element's descendants.
pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Which decomposition produced a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    Document,
    Page,
}

impl FragmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FragmentKind::Document => "document",
            FragmentKind::Page => "page",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(FragmentKind::Document),
            "page" => Some(FragmentKind::Page),
            _ => None,
        }
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job tree rooted at a `job` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTree {
    root: Element,
}

impl Default for JobTree {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTree {
    /// Create an empty `<job/>` tree.
    pub fn new() -> Self {
        Self {
            root: Element::new(tags::JOB),
        }
    }

    /// Wrap an existing element; it must be a `job` element.
    pub fn from_root(root: Element) -> Result<Self, TreeError> {
        if !root.is(tags::JOB) {
            return Err(TreeError::UnexpectedRoot {
                expected: tags::JOB.to_string(),
                found: root.tag,
            });
        }
        Ok(Self { root })
    }

    /// Parse a job tree from XML text.
    pub fn from_xml(input: &str) -> Result<Self, TreeError> {
        Self::from_root(xml::parse(input)?)
    }

    /// Serialize to compact XML.
    pub fn to_xml(&self) -> Result<String, TreeError> {
        xml::write(&self.root)
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    pub fn into_root(self) -> Element {
        self.root
    }

    /// The `id` attribute of the job root, if any.
    pub fn id(&self) -> Option<&str> {
        self.root.id()
    }

    pub fn sources(&self) -> impl Iterator<Item = &Element> {
        self.root.children_named(tags::SOURCE)
    }

    pub fn source_count(&self) -> usize {
        self.sources().count()
    }

    /// First source element.
    pub fn source(&self) -> Option<&Element> {
        self.root.child(tags::SOURCE)
    }

    pub fn source_mut(&mut self) -> Option<&mut Element> {
        self.root.child_mut(tags::SOURCE)
    }

    pub fn source_id(&self) -> Option<&str> {
        self.source().and_then(Element::id)
    }

    /// Top-level documents of the first source.
    pub fn documents(&self) -> impl Iterator<Item = &Element> {
        self.source()
            .into_iter()
            .flat_map(|s| s.children_named(tags::DOCUMENT))
    }

    /// Every page under every source, in document order.
    pub fn pages(&self) -> impl Iterator<Item = &Element> {
        self.sources()
            .flat_map(|s| s.descendants())
            .filter(|e| e.is(tags::PAGE))
    }

    pub fn page_count(&self) -> usize {
        self.pages().count()
    }

    /// The fan-out granularity this tree is a fragment of, if any.
    pub fn fragment_kind(&self) -> Option<FragmentKind> {
        self.root.get(attrs::FRAGMENT).and_then(FragmentKind::parse)
    }

    pub fn set_fragment_kind(&mut self, kind: FragmentKind) {
        self.root.set(attrs::FRAGMENT, kind.as_str());
    }

    /// An empty tree carrying this job's attributes, marked as a fragment.
    pub fn fragment_shell(&self, kind: FragmentKind) -> JobTree {
        let mut shell = JobTree {
            root: self.root.shallow_copy(),
        };
        shell.set_fragment_kind(kind);
        shell
    }
}

impl fmt::Display for JobTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_xml() {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "<{} .../>", self.root.tag),
        }
    }
}
