//! Shared runtime settings
//!
//! Settings are a two-level table addressed as `"section/key"`, shared by
//! every stage built from the same configuration. Each write bumps a
//! revision counter so stages can cheaply tell whether anything they derived
//! from the settings is stale.
//!
//! Writing `false` or an empty string removes the key (and the section once
//! it is empty). Reading a key that was set to `true` yields `Bool(true)`.

use crate::error::{JobPipeError, Result};
use crate::pipeline::ConfigValue;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Section name -> key -> value.
pub type SettingsTable = BTreeMap<String, BTreeMap<String, ConfigValue>>;

/// Split `"section/key"` into its parts.
fn split_path(path: &str) -> Result<(&str, &str)> {
    match path.split_once('/') {
        Some((section, key)) if !section.is_empty() && !key.is_empty() => Ok((section, key)),
        _ => Err(JobPipeError::Config(format!(
            "Incorrect settings path '{}', expected 'section/key'",
            path
        ))),
    }
}

fn is_removal(value: &ConfigValue) -> bool {
    match value {
        ConfigValue::Bool(b) => !b,
        ConfigValue::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Sectioned settings with a revision counter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    table: SettingsTable,
    revision: u64,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings seeded from a configuration table, at revision 0.
    pub fn from_table(table: SettingsTable) -> Self {
        Self { table, revision: 0 }
    }

    pub fn get(&self, path: &str) -> Option<&ConfigValue> {
        let (section, key) = split_path(path).ok()?;
        self.table.get(section)?.get(key)
    }

    /// String value of a key; other value kinds are rendered as text.
    pub fn get_string(&self, path: &str) -> Option<String> {
        self.get(path).map(|v| match v {
            ConfigValue::String(s) => s.clone(),
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::Int(i) => i.to_string(),
            ConfigValue::Float(f) => f.to_string(),
        })
    }

    pub fn set(&mut self, path: &str, value: impl Into<ConfigValue>) -> Result<()> {
        let (section, key) = split_path(path)?;
        let value = value.into();
        self.revision += 1;

        if is_removal(&value) {
            if let Some(entries) = self.table.get_mut(section) {
                entries.remove(key);
                if entries.is_empty() {
                    self.table.remove(section);
                }
            }
        } else {
            self.table
                .entry(section.to_string())
                .or_default()
                .insert(key.to_string(), value);
        }
        Ok(())
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn table(&self) -> &SettingsTable {
        &self.table
    }
}

/// Thread-safe handle to one `Settings` instance.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings(Arc<RwLock<Settings>>);

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self(Arc::new(RwLock::new(settings)))
    }

    fn read(&self) -> RwLockReadGuard<'_, Settings> {
        self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Settings> {
        self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, path: &str) -> Option<ConfigValue> {
        self.read().get(path).cloned()
    }

    pub fn get_string(&self, path: &str) -> Option<String> {
        self.read().get_string(path)
    }

    pub fn set(&self, path: &str, value: impl Into<ConfigValue>) -> Result<()> {
        self.write().set(path, value)
    }

    pub fn revision(&self) -> u64 {
        self.read().revision()
    }

    /// Copy of the current settings.
    pub fn snapshot(&self) -> Settings {
        self.read().clone()
    }
}
