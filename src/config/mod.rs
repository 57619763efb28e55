//! Configuration module for jobpipe
//!
//! A pipeline is described by a [`PipelineConfig`]:
//! - entry queue capacity and worker timing
//! - shared settings handed to every stage
//! - the ordered list of stages to register
//!
//! # Config Location
//!
//! Without `--config`, the binary looks for `pipeline.toml` in the
//! platform-appropriate config directory:
//! - **Linux**: `~/.config/jobpipe/`
//! - **macOS**: `~/Library/Application Support/jobpipe/`
//! - **Windows**: `%APPDATA%\jobpipe\`
//!
//! # Example
//!
//! ```toml
//! capacity = 30
//! poll_interval_ms = 25
//!
//! [settings.paths]
//! tempdir = "/var/tmp/jobpipe"
//!
//! [[stages]]
//! kind = "split-by-document"
//!
//! [[stages]]
//! kind = "timer"
//! options = { label = "documents" }
//!
//! [[stages]]
//! kind = "merge-by-document"
//! options = { reconstruction_timeout_ms = 60000 }
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{JobPipeError, Result};
use crate::pipeline::{StageKind, StageOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name under the platform config dir
pub const APP_DIR: &str = "jobpipe";

/// Default config filename
pub const CONFIG_FILE: &str = "pipeline.toml";

/// Default entry queue capacity
pub const DEFAULT_CAPACITY: usize = 30;

/// Default worker wait granularity in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 25;

/// Default time `close` waits for workers in milliseconds
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 250;

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_DIR).join(CONFIG_FILE))
}

/// On-disk format, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
}

impl Format {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Toml,
        }
    }
}

/// One stage to register, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub kind: StageKind,

    #[serde(default, skip_serializing_if = "StageOptions::is_empty")]
    pub options: StageOptions,
}

impl StageSpec {
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            options: StageOptions::new(),
        }
    }

    pub fn with_options(mut self, options: StageOptions) -> Self {
        self.options = options;
        self
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Entry queue capacity; `submit` blocks once this many items wait
    pub capacity: usize,

    /// How long a worker waits on its inbox before checking for shutdown
    pub poll_interval_ms: u64,

    /// How long `close` waits for workers to exit
    pub shutdown_grace_ms: u64,

    /// Shared settings, `section -> key -> value`
    pub settings: SettingsTable,

    /// Stages in processing order
    pub stages: Vec<StageSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            settings: SettingsTable::new(),
            stages: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn with_stage(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(JobPipeError::Config(
                "capacity must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(JobPipeError::Config(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load a configuration file (TOML, or JSON for `.json` paths)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            JobPipeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = match Format::of(path) {
            Format::Json => serde_json::from_str(&content).map_err(|e| {
                JobPipeError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?,
            Format::Toml => toml::from_str(&content).map_err(|e| {
                JobPipeError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, or use defaults if loading fails
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    JobPipeError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = match Format::of(path) {
            Format::Json => serde_json::to_string_pretty(self)
                .map_err(|e| JobPipeError::Serialization(e.to_string()))?,
            Format::Toml => toml::to_string_pretty(self)
                .map_err(|e| JobPipeError::Serialization(e.to_string()))?,
        };

        std::fs::write(path, content)
            .map_err(|e| JobPipeError::Config(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved pipeline config to {:?}", path);
        Ok(())
    }
}

impl std::fmt::Display for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "capacity {}, stages [", self.capacity)?;
        for (i, spec) in self.stages.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", spec.kind)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ConfigValue;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.capacity, 30);
        assert_eq!(config.poll_interval(), Duration::from_millis(25));
        assert_eq!(config.shutdown_grace(), Duration::from_millis(250));
        assert!(config.stages.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config: PipelineConfig = toml::from_str(
            r#"
            capacity = 4

            [settings.paths]
            tempdir = "/var/tmp/jobpipe"

            [[stages]]
            kind = "split-by-page"

            [[stages]]
            kind = "merge-by-page"
            options = { reconstruction_timeout_ms = 500 }
            "#,
        )
        .unwrap();

        assert_eq!(config.capacity, 4);
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.stages.len(), 2);
        assert_eq!(config.stages[0].kind, StageKind::SplitByPage);
        assert_eq!(
            config.stages[1].options.get("reconstruction_timeout_ms"),
            Some(&ConfigValue::Int(500))
        );
        assert_eq!(
            config.settings["paths"]["tempdir"],
            ConfigValue::String("/var/tmp/jobpipe".into())
        );
    }

    #[test]
    fn test_zero_capacity_is_invalid() {
        let config = PipelineConfig::with_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_display() {
        let config = PipelineConfig::default()
            .with_stage(StageSpec::new(StageKind::SplitByDocument))
            .with_stage(StageSpec::new(StageKind::MergeByDocument));
        assert_eq!(
            config.to_string(),
            "capacity 30, stages [split-by-document, merge-by-document]"
        );
    }

    #[test]
    fn test_format_by_extension() {
        assert_eq!(Format::of(Path::new("a/pipeline.json")), Format::Json);
        assert_eq!(Format::of(Path::new("a/pipeline.toml")), Format::Toml);
        assert_eq!(Format::of(Path::new("pipeline")), Format::Toml);
    }
}
