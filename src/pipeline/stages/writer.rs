//! Dumps each tree to disk as it passes, then forwards it unchanged.
//!
//! Files are named `{level}-{job id}-{filename}`; without a configured
//! filename a random `{uuid}.xml` is chosen once per stage.

use crate::pipeline::error::StageResult;
use crate::pipeline::stage::{Stage, StageContext};
use crate::tree::JobTree;
use std::path::{Path, PathBuf};

pub struct TreeWriter {
    dir: PathBuf,
    filename: String,
}

impl TreeWriter {
    pub const NAME: &'static str = "tree-writer";

    pub fn new(dir: impl Into<PathBuf>, filename: Option<String>) -> Self {
        Self {
            dir: dir.into(),
            filename: filename.unwrap_or_else(|| format!("{}.xml", uuid::Uuid::new_v4())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    fn path_for(&self, ctx: &StageContext, tree: &JobTree) -> PathBuf {
        let id = tree.id().or_else(|| tree.source_id()).unwrap_or("job");
        self.dir
            .join(format!("{}-{}-{}", ctx.level(), id, self.filename))
    }

    fn write(&self, path: &Path, tree: &JobTree) -> std::io::Result<()> {
        let xml = tree
            .to_xml()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(path, xml)
    }
}

impl Stage for TreeWriter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, _tree: &JobTree) -> bool {
        true
    }

    fn handle(&mut self, ctx: &mut StageContext, tree: JobTree) -> StageResult {
        let path = self.path_for(ctx, &tree);
        match self.write(&path, &tree) {
            Ok(()) => tracing::debug!("Wrote {:?}", path),
            Err(e) => tracing::warn!("Failed to write {:?}: {}", path, e),
        }
        ctx.emit(tree);
        Ok(())
    }
}
