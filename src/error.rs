//! Error handling for jobpipe
//!
//! This module defines the crate-level error type and a Result alias used
//! by configuration loading, the binary and anything that crosses module
//! boundaries. Pipeline internals use the narrower errors in
//! [`crate::pipeline::error`].

use crate::pipeline::PipelineError;
use crate::tree::TreeError;
use thiserror::Error;

/// Main error type for jobpipe operations
#[derive(Error, Debug)]
pub enum JobPipeError {
    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed job tree XML
    #[error("XML error: {0}")]
    Xml(String),

    /// Structural job tree errors
    #[error("Tree error: {0}")]
    Tree(TreeError),

    /// Pipeline construction and runtime errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<JobPipeError>,
    },
}

impl JobPipeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        JobPipeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<TreeError> for JobPipeError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::Xml { .. } => JobPipeError::Xml(err.to_string()),
            other => JobPipeError::Tree(other),
        }
    }
}

/// Result type alias for jobpipe operations
pub type Result<T> = std::result::Result<T, JobPipeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PipelineError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| JobPipeError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| JobPipeError::from(e).with_context(f()))
    }
}
