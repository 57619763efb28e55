//! Stage kinds that can be named in configuration.
//!
//! Each kind knows its configuration name, the options it accepts and how
//! to build a boxed [`Stage`] from them.

use crate::config::SharedSettings;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::options::StageOptions;
use crate::pipeline::stage::Stage;
use crate::pipeline::stages::{
    Flush, HashAndSize, MergeByDocument, MergeByPage, Soak, SplitByDocument, SplitByPage, Timer,
    TreeWriter,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Option key shared by both merge stages.
pub const RECONSTRUCTION_TIMEOUT: &str = "reconstruction_timeout_ms";

/// Built-in stage kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    // Fan-out / fan-in
    SplitByDocument,
    MergeByDocument,
    SplitByPage,
    MergeByPage,

    // Page data
    HashAndSize,
    Soak,
    Flush,

    // Utility
    Timer,
    TreeWriter,
}

impl StageKind {
    /// Configuration name, also the running stage's `name()`.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::SplitByDocument => SplitByDocument::NAME,
            StageKind::MergeByDocument => MergeByDocument::NAME,
            StageKind::SplitByPage => SplitByPage::NAME,
            StageKind::MergeByPage => MergeByPage::NAME,
            StageKind::HashAndSize => HashAndSize::NAME,
            StageKind::Soak => Soak::NAME,
            StageKind::Flush => Flush::NAME,
            StageKind::Timer => Timer::NAME,
            StageKind::TreeWriter => TreeWriter::NAME,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            StageKind::SplitByDocument => "Split by Document",
            StageKind::MergeByDocument => "Merge by Document",
            StageKind::SplitByPage => "Split by Page",
            StageKind::MergeByPage => "Merge by Page",
            StageKind::HashAndSize => "Hash and Size",
            StageKind::Soak => "Soak",
            StageKind::Flush => "Flush",
            StageKind::Timer => "Timer",
            StageKind::TreeWriter => "Tree Writer",
        }
    }

    pub fn all() -> &'static [StageKind] {
        &[
            StageKind::SplitByDocument,
            StageKind::MergeByDocument,
            StageKind::SplitByPage,
            StageKind::MergeByPage,
            StageKind::HashAndSize,
            StageKind::Soak,
            StageKind::Flush,
            StageKind::Timer,
            StageKind::TreeWriter,
        ]
    }

    pub fn description(&self) -> &'static str {
        match self {
            StageKind::SplitByDocument => {
                "Splits a source into one fragment per top-level document.\n\
                 Emits a master tree marked pending reconstruction."
            }
            StageKind::MergeByDocument => {
                "Reassembles document fragments under their master.\n\
                 Holds partial sets until every document has arrived."
            }
            StageKind::SplitByPage => {
                "Splits a single-document source into one fragment per page.\n\
                 Each fragment keeps its ancestor chain."
            }
            StageKind::MergeByPage => {
                "Reassembles page fragments under their document.\n\
                 Holds partial sets until every page has arrived."
            }
            StageKind::HashAndSize => {
                "Records size and SHA-256 of every page file.\n\
                 Flags files that cannot be read as missing."
            }
            StageKind::Soak => {
                "Embeds page files in the tree as base64.\n\
                 Used before moving a tree off this machine."
            }
            StageKind::Flush => {
                "Writes embedded page data back to disk.\n\
                 Targets the staging directory when configured."
            }
            StageKind::Timer => "Logs the time between consecutive items.",
            StageKind::TreeWriter => "Writes each tree to a directory as XML.",
        }
    }

    /// Option keys this kind reads.
    pub fn option_keys(&self) -> &'static [&'static str] {
        match self {
            StageKind::MergeByDocument | StageKind::MergeByPage => &[RECONSTRUCTION_TIMEOUT],
            StageKind::Flush => &["tempdir"],
            StageKind::Timer => &["label"],
            StageKind::TreeWriter => &["dir", "filename"],
            _ => &[],
        }
    }

    /// Instantiate the stage, validating option types.
    ///
    /// Unknown option keys are logged and ignored.
    pub fn build(
        &self,
        options: &StageOptions,
        settings: &SharedSettings,
    ) -> PipelineResult<Box<dyn Stage>> {
        let name = self.name();
        let known = self.option_keys();
        for key in options.keys().filter(|k| !known.contains(k)) {
            tracing::warn!("Ignoring unknown option '{}' for stage {}", key, name);
        }

        let stage: Box<dyn Stage> = match self {
            StageKind::SplitByDocument => Box::new(SplitByDocument::new()),
            StageKind::MergeByDocument => Box::new(MergeByDocument::with_timeout(
                options.millis(name, RECONSTRUCTION_TIMEOUT)?,
            )),
            StageKind::SplitByPage => Box::new(SplitByPage::new()),
            StageKind::MergeByPage => Box::new(MergeByPage::with_timeout(
                options.millis(name, RECONSTRUCTION_TIMEOUT)?,
            )),
            StageKind::HashAndSize => Box::new(HashAndSize::new()),
            StageKind::Soak => Box::new(Soak::new()),
            StageKind::Flush => Box::new(Flush::new(
                options.path(name, "tempdir")?,
                settings.clone(),
            )),
            StageKind::Timer => Box::new(Timer::new(
                options.str(name, "label")?.unwrap_or(Timer::DEFAULT_LABEL),
            )),
            StageKind::TreeWriter => {
                let dir = options.path(name, "dir")?.ok_or_else(|| {
                    PipelineError::InvalidOption {
                        stage: name.to_string(),
                        key: "dir".to_string(),
                        message: "required".to_string(),
                    }
                })?;
                let filename = options.str(name, "filename")?.map(str::to_string);
                Box::new(TreeWriter::new(dir, filename))
            }
        };
        Ok(stage)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::all()
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| PipelineError::UnknownStage(s.to_string()))
    }
}
