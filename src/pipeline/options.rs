//! Free-form named configuration handed to stages at registration.

use crate::pipeline::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// A single option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::String(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::String(v)
    }
}

/// Named options for one stage, e.g. `label = "ocr"` or `dir = "/tmp/out"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageOptions(BTreeMap<String, ConfigValue>);

impl StageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// String option; present-but-wrong-type is an error.
    pub fn str(&self, stage: &str, key: &str) -> PipelineResult<Option<&str>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| invalid(stage, key, "expected a string")),
        }
    }

    pub fn path(&self, stage: &str, key: &str) -> PipelineResult<Option<PathBuf>> {
        Ok(self.str(stage, key)?.map(PathBuf::from))
    }

    pub fn bool(&self, stage: &str, key: &str) -> PipelineResult<Option<bool>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_bool()
                .map(Some)
                .ok_or_else(|| invalid(stage, key, "expected a boolean")),
        }
    }

    /// Non-negative integer milliseconds as a `Duration`.
    pub fn millis(&self, stage: &str, key: &str) -> PipelineResult<Option<Duration>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(v) => match v.as_int() {
                Some(ms) if ms >= 0 => Ok(Some(Duration::from_millis(ms as u64))),
                _ => Err(invalid(stage, key, "expected a non-negative integer")),
            },
        }
    }
}

fn invalid(stage: &str, key: &str, message: &str) -> PipelineError {
    PipelineError::InvalidOption {
        stage: stage.to_string(),
        key: key.to_string(),
        message: message.to_string(),
    }
}
