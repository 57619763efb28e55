//! Moving page data in and out of the tree.
//!
//! [`Soak`] reads every file a `data` node refers to into the node's text
//! (base64), so the tree carries its own content across a transfer.
//! [`Flush`] does the reverse: writes each node's content to disk, under the
//! staging directory when one is configured, and empties the node.

use crate::config::SharedSettings;
use crate::pipeline::error::{StageError, StageResult};
use crate::pipeline::stage::{Stage, StageContext};
use crate::pipeline::stages::{data_file, staging_dir};
use crate::tree::{attrs, tags, Element, JobTree};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::path::{Path, PathBuf};

/// Settings key consulted by `Flush` when no `tempdir` option is given.
pub const TEMPDIR_SETTING: &str = "paths/tempdir";

fn has_content(data: &Element) -> bool {
    data.text.as_deref().is_some_and(|t| !t.is_empty())
}

fn page_data(tree: &JobTree) -> impl Iterator<Item = &Element> {
    tree.pages().filter_map(|p| p.child(tags::DATA))
}

pub struct Soak;

impl Soak {
    pub const NAME: &'static str = "soak";

    pub fn new() -> Self {
        Self
    }
}

impl Default for Soak {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for Soak {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, tree: &JobTree) -> bool {
        let Some(source) = tree.source() else {
            return false;
        };
        staging_dir(source).is_some()
            && page_data(tree).next().is_some()
            && !page_data(tree).any(has_content)
    }

    fn handle(&mut self, ctx: &mut StageContext, mut tree: JobTree) -> StageResult {
        let Some(base) = tree.source().and_then(staging_dir) else {
            ctx.emit(tree);
            return Ok(());
        };

        if let Some(source) = tree.source_mut() {
            source.for_each_descendant_mut(&mut |element| {
                if !element.is(tags::DATA) {
                    return;
                }
                let path = data_file(&base, element, true);
                match std::fs::read(&path) {
                    Ok(bytes) => element.text = Some(STANDARD.encode(bytes)),
                    Err(e) => {
                        tracing::warn!("Cannot soak {:?}: {}", path, e);
                        element.set(attrs::MISSING, "true");
                    }
                }
            });
        }

        ctx.emit(tree);
        Ok(())
    }
}

pub struct Flush {
    tempdir: Option<PathBuf>,
    settings: SharedSettings,
    /// Settings revision the cached staging dir was read at.
    cached: Option<(u64, Option<PathBuf>)>,
}

impl Flush {
    pub const NAME: &'static str = "flush";

    pub fn new(tempdir: Option<PathBuf>, settings: SharedSettings) -> Self {
        Self {
            tempdir,
            settings,
            cached: None,
        }
    }

    /// The explicit `tempdir`, else the shared setting (re-read on change).
    fn staging(&mut self) -> Option<PathBuf> {
        if self.tempdir.is_some() {
            return self.tempdir.clone();
        }
        let revision = self.settings.revision();
        match &self.cached {
            Some((rev, dir)) if *rev == revision => dir.clone(),
            _ => {
                let dir = self.settings.get_string(TEMPDIR_SETTING).map(PathBuf::from);
                self.cached = Some((revision, dir.clone()));
                dir
            }
        }
    }
}

/// Decode and write every soaked `data` node below `element`.
fn flush_all(element: &mut Element, base: &Path) -> StageResult {
    for child in &mut element.children {
        if child.is(tags::DATA) && has_content(child) {
            let path = data_file(base, child, true);
            let text = child.text.take().unwrap_or_default();
            let bytes = STANDARD
                .decode(text.trim())
                .map_err(|e| StageError::Failed(format!("bad data in {:?}: {}", path, e)))?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, bytes)?;
            tracing::trace!("Flushed {:?}", path);
        }
        flush_all(child, base)?;
    }
    Ok(())
}

impl Stage for Flush {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, tree: &JobTree) -> bool {
        tree.source().is_some()
            && page_data(tree).next().is_some()
            && page_data(tree).all(has_content)
    }

    fn handle(&mut self, ctx: &mut StageContext, mut tree: JobTree) -> StageResult {
        let staging = self.staging();
        let Some(source) = tree.source_mut() else {
            ctx.emit(tree);
            return Ok(());
        };
        if let Some(dir) = staging {
            source.set(attrs::TEMPHREF, dir.to_string_lossy());
        }
        let Some(base) = staging_dir(source) else {
            return Err(StageError::Failed(format!(
                "source {:?} has no href to flush to",
                source.id()
            )));
        };
        flush_all(source, &base)?;

        ctx.emit(tree);
        Ok(())
    }
}
