//! The recycler: the only component that raises an item's level.
//!
//! Every worker hands its output to the middle queue tagged with its own
//! level. The recycler looks the tag up in the current `LevelTable` and
//! forwards the item to the inbox of the next registered level, or to the
//! terminal sink when no stage remains above it.
//!
//! The table is an immutable snapshot. `Pipeline::add_stage` builds a new
//! one and sends it over the control channel; the recycler swaps it in
//! before routing anything else, so an item emitted by a freshly registered
//! stage is never routed against a stale table.
//!
//! While no stage is registered the recycler also drains the entry queue
//! straight into the sink, so a stageless pipeline is a passthrough.

use crate::pipeline::envelope::Envelope;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::event::PipelineEvent;
use crate::pipeline::id::Level;
use crossbeam_channel::{never, select, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Snapshot of registered levels and their inboxes, ascending by level.
#[derive(Clone)]
pub(crate) struct LevelTable {
    routes: Vec<(Level, Sender<Envelope>)>,
    sink: Sender<Envelope>,
}

impl LevelTable {
    pub fn new(routes: Vec<(Level, Sender<Envelope>)>, sink: Sender<Envelope>) -> Self {
        let mut routes = routes;
        routes.sort_by_key(|(level, _)| *level);
        Self { routes, sink }
    }

    pub fn has_stages(&self) -> bool {
        !self.routes.is_empty()
    }

    pub fn levels(&self) -> impl Iterator<Item = Level> + '_ {
        self.routes.iter().map(|(level, _)| *level)
    }

    /// First registered level strictly above `current`, else the sink.
    pub fn next_level(&self, current: Level) -> Level {
        if current.is_sink() {
            return Level::SINK;
        }
        self.levels()
            .find(|level| *level > current)
            .unwrap_or(Level::SINK)
    }

    /// First registered level at or above `current`, else the sink.
    fn first_from(&self, current: Level) -> Level {
        self.levels()
            .find(|level| *level >= current)
            .unwrap_or(Level::SINK)
    }

    fn inbox(&self, level: Level) -> Option<&Sender<Envelope>> {
        if level.is_sink() {
            return Some(&self.sink);
        }
        self.routes
            .iter()
            .find(|(l, _)| *l == level)
            .map(|(_, tx)| tx)
    }
}

/// Channels the recycler thread reads from and reports to.
pub(crate) struct RecyclerLinks {
    pub control: Receiver<Arc<LevelTable>>,
    pub middle: Receiver<Envelope>,
    pub entry: Receiver<Envelope>,
    pub events: Sender<PipelineEvent>,
    pub running: Arc<AtomicBool>,
    pub poll_interval: Duration,
}

pub(crate) struct Recycler {
    table: Arc<LevelTable>,
    links: RecyclerLinks,
}

impl Recycler {
    pub fn new(table: Arc<LevelTable>, links: RecyclerLinks) -> Self {
        Self { table, links }
    }

    pub fn spawn(self) -> PipelineResult<JoinHandle<()>> {
        thread::Builder::new()
            .name("recycler".to_string())
            .spawn(move || self.run())
            .map_err(|source| PipelineError::Spawn {
                level: Level::SINK,
                source,
            })
    }

    fn run(mut self) {
        tracing::info!("Recycler started");
        let control = self.links.control.clone();
        let middle = self.links.middle.clone();
        let entry_queue = self.links.entry.clone();
        let running = self.links.running.clone();
        let poll_interval = self.links.poll_interval;
        let idle_entry = never();

        while running.load(Ordering::Acquire) {
            let entry = if self.table.has_stages() {
                &idle_entry
            } else {
                &entry_queue
            };

            select! {
                recv(control) -> msg => match msg {
                    Ok(table) => self.install(table),
                    Err(_) => break,
                },
                recv(middle) -> msg => match msg {
                    Ok(envelope) => {
                        self.refresh();
                        self.promote(envelope);
                    }
                    Err(_) => break,
                },
                recv(entry) -> msg => match msg {
                    Ok(envelope) => {
                        self.refresh();
                        self.admit(envelope);
                    }
                    Err(_) => break,
                },
                default(poll_interval) => {}
            }
        }
        tracing::info!("Recycler exited");
    }

    fn install(&mut self, table: Arc<LevelTable>) {
        tracing::debug!(
            "Recycler installed level table {:?}",
            table.levels().collect::<Vec<_>>()
        );
        self.table = table;
    }

    /// Apply any snapshots published since the last select.
    fn refresh(&mut self) {
        while let Ok(table) = self.links.control.try_recv() {
            self.install(table);
        }
    }

    /// Route a worker output to the next registered level.
    fn promote(&self, envelope: Envelope) {
        if envelope.is_wake() {
            return;
        }
        let next = self.table.next_level(envelope.level);
        self.deliver(next, envelope);
    }

    /// Route an entry item taken while no stage was registered.
    fn admit(&self, envelope: Envelope) {
        if envelope.is_wake() {
            return;
        }
        let first = self.table.first_from(envelope.level);
        self.deliver(first, envelope);
    }

    fn deliver(&self, level: Level, mut envelope: Envelope) {
        tracing::trace!("Recycler routing {} -> {}", envelope.level, level);
        envelope.level = level;
        let sent = match self.table.inbox(level) {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        };
        if !sent {
            tracing::warn!("Level {} is not accepting items, item lost", level);
            let _ = self
                .links
                .events
                .send(PipelineEvent::Undeliverable { level });
        }
    }
}
