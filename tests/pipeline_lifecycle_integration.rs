//! Integration tests for the pipeline lifecycle
//!
//! These tests validate routing and lifecycle behaviour end to end:
//! - Level ordering and decline pass-through
//! - Backpressure on the entry queue
//! - Shutdown and stage failure

mod common;

use common::builders::SourceBuilder;
use common::stages::{Decline, FailOn, Latch, Stamp};
use common::{assert_nothing_more, fast_pipeline, retrieve_n, sorted, test_timeout, wait_for_event};
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError};
use jobpipe::pipeline::Level;
use jobpipe::{JobTree, PipelineError, PipelineEvent};
use serial_test::serial;
use std::thread;
use std::time::Duration;

fn jobs(n: usize) -> Vec<JobTree> {
    (0..n)
        .map(|i| {
            SourceBuilder::new(&format!("S{i}"))
                .document(&format!("S{i}-D1"), 2)
                .build()
        })
        .collect()
}

#[test]
fn test_declined_tree_arrives_unchanged() {
    let mut pipeline = fast_pipeline(8);
    pipeline.add_stage(Decline).unwrap();
    pipeline.add_stage(Decline).unwrap();

    let tree = SourceBuilder::new("S1")
        .attr("custodian", "Smith & Sons")
        .document("D1", 3)
        .build();
    pipeline.submit(tree.clone()).unwrap();

    let delivered = pipeline.retrieve(Some(test_timeout())).unwrap();
    assert_eq!(delivered.to_xml().unwrap(), tree.to_xml().unwrap());
}

#[test]
fn test_trail_is_strictly_increasing() {
    let mut pipeline = fast_pipeline(8);
    pipeline.add_stage(Stamp("a")).unwrap();
    pipeline.add_stage(Decline).unwrap();
    pipeline.add_stage(Stamp("b")).unwrap();

    for tree in jobs(5) {
        pipeline.submit(tree).unwrap();
    }

    let handle = pipeline.handle();
    for _ in 0..5 {
        let delivery = handle.retrieve_delivery(Some(test_timeout())).unwrap();
        assert_eq!(delivery.trail, vec![Level(0), Level(1), Level(2)]);
        assert!(delivery.trail.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(delivery.tree.root().get("visited"), Some("a,b"));
    }
}

#[test]
fn test_declining_stage_does_not_change_output() {
    let run = |with_decline: bool| {
        let mut pipeline = fast_pipeline(8);
        pipeline.add_stage(Stamp("a")).unwrap();
        if with_decline {
            pipeline.add_stage(Decline).unwrap();
        }
        pipeline.add_stage(Stamp("b")).unwrap();
        for tree in jobs(6) {
            pipeline.submit(tree).unwrap();
        }
        sorted(retrieve_n(&pipeline.handle(), 6))
    };

    assert_eq!(run(false), run(true));
}

#[test]
#[serial]
fn test_full_entry_queue_blocks_submit() {
    let (release, latch) = unbounded();
    let mut pipeline = fast_pipeline(1);
    pipeline.add_stage(Latch(latch)).unwrap();
    let handle = pipeline.handle();

    let mut trees = jobs(3).into_iter();
    handle.submit(trees.next().unwrap()).unwrap(); // held by the latched worker
    handle.submit(trees.next().unwrap()).unwrap(); // fills the queue

    let (done_tx, done_rx) = bounded(1);
    let producer = {
        let handle = handle.clone();
        let tree = trees.next().unwrap();
        thread::spawn(move || {
            let result = handle.submit(tree);
            let _ = done_tx.send(());
            result
        })
    };

    assert_eq!(
        done_rx.recv_timeout(Duration::from_millis(150)),
        Err(RecvTimeoutError::Timeout),
        "submit returned while the entry queue was full"
    );

    release.send(()).unwrap();
    done_rx.recv_timeout(test_timeout()).unwrap();
    assert!(producer.join().unwrap().is_ok());

    release.send(()).unwrap();
    release.send(()).unwrap();
    assert_eq!(retrieve_n(&handle, 3).len(), 3);
}

#[test]
fn test_close_stops_submit_and_retrieve() {
    let mut pipeline = fast_pipeline(4);
    pipeline.add_stage(Stamp("a")).unwrap();
    let handle = pipeline.handle();

    pipeline.close();

    let tree = SourceBuilder::new("S1").document("D1", 1).build();
    assert!(matches!(handle.submit(tree), Err(PipelineError::Closed)));
    assert!(matches!(
        handle.retrieve(Some(Duration::from_millis(20))),
        Err(PipelineError::Closed)
    ));
}

#[test]
#[serial]
fn test_close_discards_items_in_flight() {
    let (release, latch) = unbounded();
    let mut pipeline = fast_pipeline(4);
    pipeline.add_stage(Latch(latch)).unwrap();
    let handle = pipeline.handle();

    for tree in jobs(2) {
        handle.submit(tree).unwrap();
    }
    thread::sleep(Duration::from_millis(50)); // first tree is now held in the stage

    pipeline.close();
    let _ = release.send(());
    let _ = release.send(());

    assert!(matches!(
        handle.retrieve(Some(Duration::from_millis(100))),
        Err(PipelineError::Closed)
    ));
    assert!(matches!(handle.retrieve(None), Err(PipelineError::Closed)));
}

#[test]
#[serial]
fn test_close_releases_blocked_producer() {
    let (_release, latch) = unbounded::<()>();
    let mut pipeline = fast_pipeline(1);
    pipeline.add_stage(Latch(latch)).unwrap();
    let handle = pipeline.handle();

    let mut trees = jobs(3).into_iter();
    handle.submit(trees.next().unwrap()).unwrap();
    handle.submit(trees.next().unwrap()).unwrap();

    let producer = {
        let handle = handle.clone();
        let tree = trees.next().unwrap();
        thread::spawn(move || handle.submit(tree))
    };
    thread::sleep(Duration::from_millis(50));

    pipeline.close();
    assert!(matches!(producer.join().unwrap(), Err(PipelineError::Closed)));
}

#[test]
fn test_retrieve_times_out_when_empty() {
    let pipeline = fast_pipeline(4);
    let started = std::time::Instant::now();
    let err = pipeline.retrieve(Some(Duration::from_millis(50))).unwrap_err();
    assert!(matches!(err, PipelineError::Timeout(d) if d == Duration::from_millis(50)));
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[test]
fn test_pipeline_is_idle_after_draining() {
    let mut pipeline = fast_pipeline(4);
    pipeline.add_stage(Stamp("a")).unwrap();
    for tree in jobs(3) {
        pipeline.submit(tree).unwrap();
    }
    retrieve_n(&pipeline.handle(), 3);
    assert!(pipeline.is_idle());
}

#[test]
#[serial]
fn test_failed_stage_wedges_its_level() {
    let mut pipeline = fast_pipeline(4);
    pipeline.add_stage(Stamp("a")).unwrap();
    pipeline.add_stage(FailOn("J-bad")).unwrap();
    let handle = pipeline.handle();

    pipeline
        .submit(SourceBuilder::new("bad").document("D1", 1).build())
        .unwrap();
    let failed = wait_for_event(&handle, |e| matches!(e, PipelineEvent::StageFailed { .. }));
    match failed {
        Some(PipelineEvent::StageFailed { level, stage, message }) => {
            assert_eq!(level, Level(1));
            assert_eq!(stage, "fail-on");
            assert!(message.contains("J-bad"));
        }
        other => panic!("expected StageFailed, got {:?}", other),
    }

    // Nothing reaches the sink past the dead level.
    pipeline
        .submit(SourceBuilder::new("good").document("D1", 1).build())
        .unwrap();
    assert_nothing_more(&handle);
    assert!(
        wait_for_event(&handle, |e| *e == PipelineEvent::Undeliverable { level: Level(1) })
            .is_some()
    );
}

#[test]
fn test_stage_started_events() {
    let mut pipeline = fast_pipeline(4);
    pipeline.add_stage(Stamp("first")).unwrap();
    let handle = pipeline.handle();

    let started = wait_for_event(&handle, |e| matches!(e, PipelineEvent::StageStarted { .. }));
    assert_eq!(
        started,
        Some(PipelineEvent::StageStarted {
            level: Level(0),
            stage: "first".to_string()
        })
    );
}
