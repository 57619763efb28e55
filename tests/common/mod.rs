//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod stages;

use jobpipe::{JobTree, Pipeline, PipelineError, PipelineHandle};
use std::time::Duration;

/// Generous upper bound for anything that is expected to arrive
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Polling budget for things that are expected never to arrive
pub fn starvation_budget() -> Duration {
    Duration::from_millis(300)
}

/// Pipeline with short poll and shutdown timings
pub fn fast_pipeline(capacity: usize) -> Pipeline {
    Pipeline::with_timing(capacity, Duration::from_millis(5), Duration::from_millis(200))
        .expect("pipeline starts")
}

/// Retrieve exactly `n` trees, panicking if any is late
pub fn retrieve_n(handle: &PipelineHandle, n: usize) -> Vec<JobTree> {
    (0..n)
        .map(|i| {
            handle
                .retrieve(Some(test_timeout()))
                .unwrap_or_else(|e| panic!("tree {} of {} not delivered: {}", i + 1, n, e))
        })
        .collect()
}

/// Assert nothing more arrives within the starvation budget
pub fn assert_nothing_more(handle: &PipelineHandle) {
    match handle.retrieve(Some(starvation_budget())) {
        Err(PipelineError::Timeout(_)) => {}
        Ok(tree) => panic!("unexpected delivery: {:?}", tree.source_id()),
        Err(e) => panic!("unexpected error: {}", e),
    }
}

/// Sort trees by source id, then document ids, for order-independent checks
pub fn sorted(mut trees: Vec<JobTree>) -> Vec<JobTree> {
    trees.sort_by_key(|t| {
        (
            t.source_id().map(str::to_string),
            t.documents()
                .filter_map(|d| d.id().map(str::to_string))
                .collect::<Vec<_>>(),
        )
    });
    trees
}

/// Poll the event channel until `pred` matches or the test timeout passes
pub fn wait_for_event(
    handle: &PipelineHandle,
    pred: impl Fn(&jobpipe::PipelineEvent) -> bool,
) -> Option<jobpipe::PipelineEvent> {
    let deadline = std::time::Instant::now() + test_timeout();
    while std::time::Instant::now() < deadline {
        while let Some(event) = handle.try_event() {
            if pred(&event) {
                return Some(event);
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    None
}
