//! Worker threads: one per registered stage, plus the terminal sink.
//!
//! # Stage worker loop
//!
//! 1. Wait up to one poll interval for an envelope on the level inbox.
//! 2. Wake-ups are ignored; a timeout calls `Stage::on_idle`.
//! 3. Append the worker's level to the envelope trail.
//! 4. If the stage accepts the tree, run `handle` and send every emitted tree
//!    to the middle queue tagged with this level. Otherwise forward the
//!    original tree unchanged.
//! 5. Repeat until the shared running flag clears, then run `Stage::on_end`.
//!
//! A failed `handle` stops the worker; items queued for its level are never
//! processed.

use crate::pipeline::envelope::{Delivery, Envelope};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::event::PipelineEvent;
use crate::pipeline::id::Level;
use crate::pipeline::stage::{Stage, StageContext, StageOutput};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Channels and shared state a stage worker runs against.
pub(crate) struct WorkerLinks {
    pub inbox: Receiver<Envelope>,
    pub middle: Sender<Envelope>,
    pub events: Sender<PipelineEvent>,
    pub running: Arc<AtomicBool>,
    pub poll_interval: Duration,
}

/// A stage bound to a level, run on its own thread.
pub(crate) struct StageWorker {
    level: Level,
    stage: Box<dyn Stage>,
    links: WorkerLinks,
}

impl StageWorker {
    pub fn new(level: Level, stage: Box<dyn Stage>, links: WorkerLinks) -> Self {
        Self {
            level,
            stage,
            links,
        }
    }

    /// Spawn the worker on a thread named `{level}-{stage name}`.
    pub fn spawn(self) -> PipelineResult<JoinHandle<()>> {
        let level = self.level;
        thread::Builder::new()
            .name(format!("{}-{}", level, self.stage.name()))
            .spawn(move || self.run())
            .map_err(|source| PipelineError::Spawn { level, source })
    }

    fn run(mut self) {
        let name = self.stage.name().to_string();
        tracing::info!("Stage worker '{}' started at level {}", name, self.level);
        let _ = self.links.events.send(PipelineEvent::StageStarted {
            level: self.level,
            stage: name.clone(),
        });

        while self.links.running.load(Ordering::Acquire) {
            match self.links.inbox.recv_timeout(self.links.poll_interval) {
                Ok(envelope) => {
                    if !self.process(envelope) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    let mut ctx = StageContext::new(self.level);
                    self.stage.on_idle(&mut ctx);
                    self.dispatch(ctx.drain(), &[self.level]);
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.stage.on_end();
        tracing::info!("Stage worker '{}' at level {} exited", name, self.level);
    }

    /// Handle one envelope. Returns `false` when the worker must stop.
    fn process(&mut self, envelope: Envelope) -> bool {
        let Envelope {
            payload,
            mut trail,
            ..
        } = envelope;
        let Some(tree) = payload else {
            return true;
        };
        trail.push(self.level);

        if !self.stage.can_handle(&tree) {
            tracing::trace!(
                "Level {} ({}) declined {:?}",
                self.level,
                self.stage.name(),
                tree.id()
            );
            self.forward(Envelope {
                level: self.level,
                payload: Some(tree),
                trail,
            });
            return true;
        }

        let mut ctx = StageContext::new(self.level);
        let result = self.stage.handle(&mut ctx, tree);
        self.dispatch(ctx.drain(), &trail);

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    "Stage '{}' at level {} failed, worker stopping: {}",
                    self.stage.name(),
                    self.level,
                    e
                );
                let _ = self.links.events.send(PipelineEvent::StageFailed {
                    level: self.level,
                    stage: self.stage.name().to_string(),
                    message: e.to_string(),
                });
                false
            }
        }
    }

    fn dispatch(&self, outputs: Vec<StageOutput>, trail: &[Level]) {
        for output in outputs {
            match output {
                StageOutput::Emit(tree) => self.forward(Envelope {
                    level: self.level,
                    payload: Some(tree),
                    trail: trail.to_vec(),
                }),
                StageOutput::Pending { container } => {
                    tracing::debug!(
                        "Level {} ({}) holding {} pending reconstruction",
                        self.level,
                        self.stage.name(),
                        container
                    );
                    let _ = self.links.events.send(PipelineEvent::Pending {
                        level: self.level,
                        stage: self.stage.name().to_string(),
                        container,
                    });
                }
                StageOutput::Dropped(reason) => {
                    tracing::warn!(
                        "Level {} ({}) dropped an item: {}",
                        self.level,
                        self.stage.name(),
                        reason
                    );
                    let _ = self.links.events.send(PipelineEvent::Dropped {
                        level: self.level,
                        stage: self.stage.name().to_string(),
                        reason,
                    });
                }
            }
        }
    }

    fn forward(&self, envelope: Envelope) {
        if self.links.middle.send(envelope).is_err() {
            tracing::debug!("Middle queue closed, discarding output of level {}", self.level);
        }
    }
}

/// Spawn the terminal sink: moves finished trees to the output queue.
pub(crate) fn spawn_sink(
    inbox: Receiver<Envelope>,
    output: Sender<Delivery>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
) -> PipelineResult<JoinHandle<()>> {
    thread::Builder::new()
        .name("sink".to_string())
        .spawn(move || {
            tracing::info!("Terminal sink started");
            while running.load(Ordering::Acquire) {
                match inbox.recv_timeout(poll_interval) {
                    Ok(Envelope {
                        payload: Some(tree),
                        trail,
                        ..
                    }) => {
                        if output.send(Delivery { tree, trail }).is_err() {
                            break;
                        }
                    }
                    Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::info!("Terminal sink exited");
        })
        .map_err(|source| PipelineError::Spawn {
            level: Level::SINK,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::{StageError, StageResult};
    use crate::tree::JobTree;
    use crossbeam_channel::unbounded;

    struct Doubler;

    impl Stage for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }

        fn can_handle(&self, tree: &JobTree) -> bool {
            tree.id() != Some("skip")
        }

        fn handle(&mut self, ctx: &mut StageContext, tree: JobTree) -> StageResult {
            if tree.id() == Some("boom") {
                return Err(StageError::Failed("boom".into()));
            }
            ctx.emit(tree.clone());
            ctx.emit(tree);
            Ok(())
        }
    }

    fn worker(level: Level) -> (StageWorker, Receiver<Envelope>, Receiver<PipelineEvent>) {
        let (_inbox_tx, inbox_rx) = unbounded();
        let (middle_tx, middle_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();
        let links = WorkerLinks {
            inbox: inbox_rx,
            middle: middle_tx,
            events: events_tx,
            running: Arc::new(AtomicBool::new(true)),
            poll_interval: Duration::from_millis(5),
        };
        (StageWorker::new(level, Box::new(Doubler), links), middle_rx, events_rx)
    }

    fn tree_with_id(id: &str) -> JobTree {
        let mut tree = JobTree::new();
        tree.root_mut().set("id", id);
        tree
    }

    #[test]
    fn test_accepting_stage_emits_with_its_level() {
        let (mut w, middle, _) = worker(Level(1));
        assert!(w.process(Envelope {
            level: Level(1),
            payload: Some(tree_with_id("a")),
            trail: vec![Level(0)],
        }));
        let out: Vec<_> = middle.try_iter().collect();
        assert_eq!(out.len(), 2);
        for env in out {
            assert_eq!(env.level, Level(1));
            assert_eq!(env.trail, vec![Level(0), Level(1)]);
        }
    }

    #[test]
    fn test_declining_stage_forwards_original() {
        let (mut w, middle, _) = worker(Level(0));
        let tree = tree_with_id("skip");
        assert!(w.process(Envelope::submit(tree.clone())));
        let env = middle.try_recv().unwrap();
        assert_eq!(env.payload, Some(tree));
        assert_eq!(env.trail, vec![Level(0)]);
        assert!(middle.try_recv().is_err());
    }

    #[test]
    fn test_wake_up_is_ignored() {
        let (mut w, middle, _) = worker(Level(0));
        assert!(w.process(Envelope::wake(Level(0))));
        assert!(middle.try_recv().is_err());
    }

    #[test]
    fn test_failure_stops_worker_and_reports() {
        let (mut w, middle, events) = worker(Level(2));
        assert!(!w.process(Envelope {
            level: Level(2),
            payload: Some(tree_with_id("boom")),
            trail: vec![],
        }));
        assert!(middle.try_recv().is_err());
        match events.try_recv().unwrap() {
            PipelineEvent::StageFailed { level, stage, .. } => {
                assert_eq!(level, Level(2));
                assert_eq!(stage, "doubler");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
