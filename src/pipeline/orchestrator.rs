//! The pipeline orchestrator.
//!
//! Owns every queue, the worker threads and the registration order of
//! stages. Producers and consumers talk to it through [`PipelineHandle`],
//! which can be cloned onto other threads; registration and shutdown stay
//! on the owning [`Pipeline`].
//!
//! ```text
//! submit ──► [entry, bounded] ──► level 0 ──┐
//!                                           ▼
//!          ┌────────────── [middle] ◄── every worker
//!          ▼
//!      recycler ──► level 1 inbox ──► level 1 ──► [middle] ...
//!          └──────► sink inbox ──► sink ──► [output] ──► retrieve
//! ```

use crate::config::{PipelineConfig, Settings, SharedSettings};
use crate::config::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_SHUTDOWN_GRACE_MS};
use crate::pipeline::envelope::{Delivery, Envelope};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::event::PipelineEvent;
use crate::pipeline::id::Level;
use crate::pipeline::recycler::{LevelTable, Recycler, RecyclerLinks};
use crate::pipeline::stage::Stage;
use crate::pipeline::worker::{spawn_sink, StageWorker, WorkerLinks};
use crate::tree::JobTree;
use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A registered level and the sender feeding it.
struct Route {
    level: Level,
    name: String,
    inbox: Sender<Envelope>,
}

struct WorkerThread {
    level: Level,
    name: String,
    handle: JoinHandle<()>,
}

/// Producer/consumer side of a pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    entry: Sender<Envelope>,
    output: Receiver<Delivery>,
    events: Receiver<PipelineEvent>,
    closed: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl PipelineHandle {
    fn check_open(&self) -> PipelineResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(PipelineError::Closed)
        } else {
            Ok(())
        }
    }

    /// Enqueue a tree at level 0, blocking while the entry queue is full.
    pub fn submit(&self, tree: JobTree) -> PipelineResult<()> {
        let mut envelope = Envelope::submit(tree);
        loop {
            self.check_open()?;
            match self.entry.send_timeout(envelope, self.poll_interval) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => envelope = returned,
                Err(SendTimeoutError::Disconnected(_)) => return Err(PipelineError::Closed),
            }
        }
    }

    /// Enqueue without blocking.
    pub fn try_submit(&self, tree: JobTree) -> PipelineResult<()> {
        self.check_open()?;
        match self.entry.try_send(Envelope::submit(tree)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(PipelineError::Full),
            Err(TrySendError::Disconnected(_)) => Err(PipelineError::Closed),
        }
    }

    /// Next finished tree. `None` waits until one arrives or the pipeline closes.
    pub fn retrieve(&self, timeout: Option<Duration>) -> PipelineResult<JobTree> {
        self.retrieve_delivery(timeout).map(|delivery| delivery.tree)
    }

    /// Like [`retrieve`](Self::retrieve), keeping the level trail.
    pub fn retrieve_delivery(&self, timeout: Option<Duration>) -> PipelineResult<Delivery> {
        let deadline = timeout.map(|t| (t, Instant::now() + t));
        loop {
            self.check_open()?;
            let wait = match deadline {
                Some((_, at)) => at
                    .saturating_duration_since(Instant::now())
                    .min(self.poll_interval),
                None => self.poll_interval,
            };
            match self.output.recv_timeout(wait) {
                Ok(delivery) => return Ok(delivery),
                Err(RecvTimeoutError::Timeout) => {
                    if let Some((t, at)) = deadline {
                        if Instant::now() >= at {
                            return Err(PipelineError::Timeout(t));
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    // The sink only lets go of the output queue on shutdown.
                    self.check_open()?;
                    return Err(PipelineError::ChannelRecv);
                }
            }
        }
    }

    pub fn try_event(&self) -> Option<PipelineEvent> {
        self.events.try_recv().ok()
    }

    pub fn drain_events(&self) -> Vec<PipelineEvent> {
        self.events.try_iter().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A running multi-stage pipeline.
pub struct Pipeline {
    capacity: usize,
    poll_interval: Duration,
    shutdown_grace: Duration,
    running: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,

    entry_tx: Sender<Envelope>,
    entry_rx: Receiver<Envelope>,
    middle_tx: Sender<Envelope>,
    middle_rx: Receiver<Envelope>,
    sink_tx: Sender<Envelope>,
    output_rx: Receiver<Delivery>,
    events_tx: Sender<PipelineEvent>,
    control_tx: Sender<Arc<LevelTable>>,

    routes: Vec<Route>,
    workers: Vec<WorkerThread>,
    settings: SharedSettings,
    handle: PipelineHandle,
}

impl Pipeline {
    /// Pipeline with an entry queue of `capacity` and default timing.
    pub fn new(capacity: usize) -> PipelineResult<Self> {
        Self::with_timing(
            capacity,
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
        )
    }

    pub fn with_timing(
        capacity: usize,
        poll_interval: Duration,
        shutdown_grace: Duration,
    ) -> PipelineResult<Self> {
        Self::start(capacity, poll_interval, shutdown_grace, SharedSettings::default())
    }

    /// Build a pipeline and register every configured stage in order.
    pub fn from_config(config: &PipelineConfig) -> crate::Result<Self> {
        config.validate()?;
        let settings = SharedSettings::new(Settings::from_table(config.settings.clone()));
        let mut pipeline = Self::start(
            config.capacity,
            config.poll_interval(),
            config.shutdown_grace(),
            settings,
        )?;
        for spec in &config.stages {
            let stage = spec.kind.build(&spec.options, &pipeline.settings)?;
            pipeline.add_boxed_stage(stage)?;
        }
        tracing::info!("Pipeline built from config: {}", config);
        Ok(pipeline)
    }

    fn start(
        capacity: usize,
        poll_interval: Duration,
        shutdown_grace: Duration,
        settings: SharedSettings,
    ) -> PipelineResult<Self> {
        // A zero-capacity crossbeam channel is a rendezvous, not a queue.
        let capacity = capacity.max(1);
        let running = Arc::new(AtomicBool::new(true));
        let closed = Arc::new(AtomicBool::new(false));

        let (entry_tx, entry_rx) = bounded(capacity);
        let (middle_tx, middle_rx) = unbounded();
        let (sink_tx, sink_rx) = unbounded();
        let (output_tx, output_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();
        let (control_tx, control_rx) = unbounded();

        let mut workers = Vec::new();
        workers.push(WorkerThread {
            level: Level::SINK,
            name: "sink".to_string(),
            handle: spawn_sink(sink_rx, output_tx, running.clone(), poll_interval)?,
        });

        let table = Arc::new(LevelTable::new(Vec::new(), sink_tx.clone()));
        let recycler = Recycler::new(
            table,
            RecyclerLinks {
                control: control_rx,
                middle: middle_rx.clone(),
                entry: entry_rx.clone(),
                events: events_tx.clone(),
                running: running.clone(),
                poll_interval,
            },
        );
        workers.push(WorkerThread {
            level: Level::SINK,
            name: "recycler".to_string(),
            handle: recycler.spawn()?,
        });

        let handle = PipelineHandle {
            entry: entry_tx.clone(),
            output: output_rx.clone(),
            events: events_rx,
            closed: closed.clone(),
            poll_interval,
        };

        tracing::info!("Pipeline started with entry capacity {}", capacity);
        Ok(Self {
            capacity,
            poll_interval,
            shutdown_grace,
            running,
            closed,
            entry_tx,
            entry_rx,
            middle_tx,
            middle_rx,
            sink_tx,
            output_rx,
            events_tx,
            control_tx,
            routes: Vec::new(),
            workers,
            settings,
            handle,
        })
    }

    /// Register a stage at the next free level.
    pub fn add_stage<S: Stage + 'static>(&mut self, stage: S) -> PipelineResult<Level> {
        self.add_boxed_stage(Box::new(stage))
    }

    pub fn add_boxed_stage(&mut self, stage: Box<dyn Stage>) -> PipelineResult<Level> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PipelineError::Closed);
        }

        let level = Level(self.routes.len() as u32);
        let (inbox_tx, inbox_rx) = if level == Level::ENTRY {
            (self.entry_tx.clone(), self.entry_rx.clone())
        } else {
            unbounded()
        };

        let name = stage.name().to_string();
        let links = WorkerLinks {
            inbox: inbox_rx,
            middle: self.middle_tx.clone(),
            events: self.events_tx.clone(),
            running: self.running.clone(),
            poll_interval: self.poll_interval,
        };
        let handle = StageWorker::new(level, stage, links).spawn()?;

        self.workers.push(WorkerThread {
            level,
            name: name.clone(),
            handle,
        });
        self.routes.push(Route {
            level,
            name: name.clone(),
            inbox: inbox_tx,
        });
        self.publish()?;

        tracing::info!("Registered stage '{}' at level {}", name, level);
        Ok(level)
    }

    /// Hand the recycler a fresh snapshot of the registered levels.
    fn publish(&self) -> PipelineResult<()> {
        let routes = self
            .routes
            .iter()
            .map(|route| (route.level, route.inbox.clone()))
            .collect();
        let table = Arc::new(LevelTable::new(routes, self.sink_tx.clone()));
        self.control_tx
            .send(table)
            .map_err(|_| PipelineError::ChannelSend)
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Registered stages in processing order.
    pub fn stages(&self) -> impl Iterator<Item = (Level, &str)> {
        self.routes
            .iter()
            .map(|route| (route.level, route.name.as_str()))
    }

    pub fn submit(&self, tree: JobTree) -> PipelineResult<()> {
        self.handle.submit(tree)
    }

    pub fn retrieve(&self, timeout: Option<Duration>) -> PipelineResult<JobTree> {
        self.handle.retrieve(timeout)
    }

    /// Advisory: every queue was empty when looked at.
    ///
    /// An item being handled by a worker is in no queue, so `true` does not
    /// mean nothing is in flight.
    pub fn is_idle(&self) -> bool {
        self.entry_rx.is_empty()
            && self.middle_rx.is_empty()
            && self.sink_tx.is_empty()
            && self.output_rx.is_empty()
            && self.routes.iter().all(|route| route.inbox.is_empty())
    }

    /// Stop every worker and discard whatever is still queued.
    ///
    /// Workers that do not exit within the shutdown grace are detached.
    /// Calling `close` more than once is a no-op.
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Closing pipeline");
        self.running.store(false, Ordering::Release);

        let _ = self.middle_tx.send(Envelope::wake(Level::ENTRY));
        let _ = self.sink_tx.send(Envelope::wake(Level::SINK));
        for route in &self.routes {
            let _ = route.inbox.try_send(Envelope::wake(route.level));
        }

        let deadline = Instant::now() + self.shutdown_grace;
        let pause = (self.poll_interval / 10).max(Duration::from_millis(1));
        while Instant::now() < deadline && self.workers.iter().any(|w| !w.handle.is_finished()) {
            thread::sleep(pause);
        }

        for worker in self.workers.drain(..) {
            if worker.handle.is_finished() {
                if worker.handle.join().is_err() {
                    tracing::error!("Worker '{}' at level {} panicked", worker.name, worker.level);
                }
            } else {
                tracing::warn!(
                    "Worker '{}' at level {} still busy after {:?}, detaching",
                    worker.name,
                    worker.level,
                    self.shutdown_grace
                );
            }
        }

        let discarded = self.entry_rx.try_iter().count()
            + self.middle_rx.try_iter().filter(|e| !e.is_wake()).count()
            + self.output_rx.try_iter().count();
        if discarded > 0 {
            tracing::debug!("Discarded {} queued items on close", discarded);
        }
        self.routes.clear();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.close();
    }
}
