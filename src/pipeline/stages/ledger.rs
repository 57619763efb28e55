//! Reconstruction ledger for fan-in stages.
//!
//! Maps a container id to the master skeleton (once seen) and the fragments
//! collected so far, keyed by element id. Entries are created on first sight
//! of a container and removed exactly once: on completion or on expiry.

use crate::tree::{Element, JobTree};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Collected state for one container.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    master: Option<JobTree>,
    fragments: Vec<(String, Element)>,
    last_seen: Instant,
}

impl LedgerEntry {
    fn new(now: Instant) -> Self {
        Self {
            master: None,
            fragments: Vec::new(),
            last_seen: now,
        }
    }

    /// Store the master skeleton. Returns `false` if one was already held.
    pub fn set_master(&mut self, master: JobTree) -> bool {
        if self.master.is_some() {
            return false;
        }
        self.master = Some(master);
        true
    }

    pub fn master(&self) -> Option<&JobTree> {
        self.master.as_ref()
    }

    pub fn take_master(&mut self) -> Option<JobTree> {
        self.master.take()
    }

    /// Store a fragment. Returns `false` if the slot id was already filled.
    pub fn add_fragment(&mut self, id: impl Into<String>, element: Element) -> bool {
        let id = id.into();
        if self.has_fragment(&id) {
            return false;
        }
        self.fragments.push((id, element));
        true
    }

    pub fn has_fragment(&self, id: &str) -> bool {
        self.fragments.iter().any(|(k, _)| k == id)
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Fragments in arrival order.
    pub fn fragments(&self) -> impl Iterator<Item = (&str, &Element)> {
        self.fragments.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn take_fragments(&mut self) -> Vec<(String, Element)> {
        std::mem::take(&mut self.fragments)
    }
}

/// Container id -> entry, with an optional inactivity timeout.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: HashMap<String, LedgerEntry>,
    timeout: Option<Duration>,
}

impl Ledger {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            timeout,
        }
    }

    /// Entry for `container`, created if absent; marks it as active.
    pub fn touch(&mut self, container: &str, now: Instant) -> &mut LedgerEntry {
        let entry = self
            .entries
            .entry(container.to_string())
            .or_insert_with(|| LedgerEntry::new(now));
        entry.last_seen = now;
        entry
    }

    pub fn get(&self, container: &str) -> Option<&LedgerEntry> {
        self.entries.get(container)
    }

    pub fn remove(&mut self, container: &str) -> Option<LedgerEntry> {
        self.entries.remove(container)
    }

    pub fn contains(&self, container: &str) -> bool {
        self.entries.contains_key(container)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn containers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Remove and return every entry idle for longer than the timeout.
    pub fn expire(&mut self, now: Instant) -> Vec<(String, LedgerEntry)> {
        let Some(timeout) = self.timeout else {
            return Vec::new();
        };
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.last_seen) >= timeout)
            .map(|(k, _)| k.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|k| self.entries.remove_entry(&k))
            .collect()
    }
}
