//! Built-in stages.
//!
//! - **Fan-out / fan-in**: [`SplitByDocument`], [`MergeByDocument`],
//!   [`SplitByPage`], [`MergeByPage`], sharing the [`Ledger`].
//! - **Page data**: [`HashAndSize`], [`Soak`], [`Flush`].
//! - **Utility**: [`Timer`], [`TreeWriter`], [`ValidationGate`].
//!
//! Every stage is constructible from configuration through
//! [`StageKind`](crate::pipeline::StageKind) except the gate, which needs a
//! callback object and is registered in code.

pub mod gate;
pub mod hash;
pub mod ledger;
pub mod merge_document;
pub mod merge_page;
pub mod soak;
pub mod split_document;
pub mod split_page;
pub mod timer;
pub mod writer;

pub use gate::{StatusCallback, ValidationGate};
pub use hash::HashAndSize;
pub use ledger::{Ledger, LedgerEntry};
pub use merge_document::MergeByDocument;
pub use merge_page::MergeByPage;
pub use soak::{Flush, Soak};
pub use split_document::SplitByDocument;
pub use split_page::SplitByPage;
pub use timer::Timer;
pub use writer::TreeWriter;

use crate::tree::{attrs, Element};
use std::path::{Path, PathBuf};

/// Path of the file a `data` node refers to, relative to `base`.
///
/// With `prefer_old`, `oldpath`/`oldfilename` win over `path`/`filename`.
pub(crate) fn data_file(base: &Path, data: &Element, prefer_old: bool) -> PathBuf {
    let pick = |old: &str, current: &str| {
        let value = if prefer_old {
            data.get(old).or_else(|| data.get(current))
        } else {
            data.get(current)
        };
        value.unwrap_or_default().to_string()
    };
    base.join(pick(attrs::OLDPATH, attrs::PATH))
        .join(pick(attrs::OLDFILENAME, attrs::FILENAME))
}

/// Directory page data lives under: `href`, or its parent when it names a file.
pub(crate) fn source_dir(source: &Element) -> Option<PathBuf> {
    let href = Path::new(source.get(attrs::HREF)?);
    if href.is_dir() {
        Some(href.to_path_buf())
    } else {
        Some(href.parent().unwrap_or(href).to_path_buf())
    }
}

/// Staging location of a source: `temphref` if set, else `href`.
pub(crate) fn staging_dir(source: &Element) -> Option<PathBuf> {
    source
        .get(attrs::TEMPHREF)
        .or_else(|| source.get(attrs::HREF))
        .map(PathBuf::from)
}
