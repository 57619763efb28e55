//! Page data checksums and sizes.
//!
//! For every page's `data` node, hashes the referenced file with SHA-256 and
//! records `size` and `checksum`. Files that cannot be read are flagged
//! `missing="true"`. The source gets the total size of everything read.

use crate::pipeline::error::StageResult;
use crate::pipeline::stage::{Stage, StageContext};
use crate::pipeline::stages::{data_file, source_dir};
use crate::tree::{attrs, tags, JobTree};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const CHUNK_SIZE: usize = 64 * 1024;

pub struct HashAndSize;

impl HashAndSize {
    pub const NAME: &'static str = "hash-and-size";

    pub fn new() -> Self {
        Self
    }
}

impl Default for HashAndSize {
    fn default() -> Self {
        Self::new()
    }
}

/// Size and lowercase hex SHA-256 of a file, read in chunks.
fn digest_file(path: &Path) -> std::io::Result<(u64, String)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        size += n as u64;
    }

    Ok((size, format!("{:x}", hasher.finalize())))
}

impl Stage for HashAndSize {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, tree: &JobTree) -> bool {
        tree.source().is_some_and(|s| s.get(attrs::HREF).is_some())
            && tree.pages().any(|p| p.child(tags::DATA).is_some())
    }

    fn handle(&mut self, ctx: &mut StageContext, mut tree: JobTree) -> StageResult {
        let Some(base) = tree.source().and_then(source_dir) else {
            ctx.emit(tree);
            return Ok(());
        };

        if let Some(source) = tree.source_mut() {
            let mut total = 0u64;
            let mut missing = 0usize;
            source.for_each_descendant_mut(&mut |element| {
                if !element.is(tags::PAGE) {
                    return;
                }
                let Some(data) = element.child_mut(tags::DATA) else {
                    return;
                };
                let path = data_file(&base, data, false);
                match digest_file(&path) {
                    Ok((size, checksum)) => {
                        data.set(attrs::SIZE, size.to_string());
                        data.set(attrs::CHECKSUM, checksum);
                        data.remove_attr(attrs::MISSING);
                        total += size;
                    }
                    Err(e) => {
                        tracing::debug!("Cannot hash {:?}: {}", path, e);
                        data.set(attrs::MISSING, "true");
                        missing += 1;
                    }
                }
            });
            source.set(attrs::SIZE, total.to_string());

            if missing > 0 {
                tracing::warn!(
                    "Source {:?}: {} page files missing under {:?}",
                    source.id(),
                    missing,
                    base
                );
            }
        }

        ctx.emit(tree);
        Ok(())
    }
}
