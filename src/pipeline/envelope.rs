//! Queue envelopes and output deliveries.

use crate::pipeline::id::Level;
use crate::tree::JobTree;

/// A level-tagged item travelling between queues.
///
/// A `None` payload is a wake-up: it unblocks a waiting worker and is
/// otherwise ignored.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub level: Level,
    pub payload: Option<JobTree>,
    /// Levels of every stage the item (or the tree it was split from) passed.
    pub trail: Vec<Level>,
}

impl Envelope {
    /// A fresh submission at the entry level.
    pub fn submit(tree: JobTree) -> Self {
        Self {
            level: Level::ENTRY,
            payload: Some(tree),
            trail: Vec::new(),
        }
    }

    pub fn wake(level: Level) -> Self {
        Self {
            level,
            payload: None,
            trail: Vec::new(),
        }
    }

    #[inline]
    pub fn is_wake(&self) -> bool {
        self.payload.is_none()
    }
}

/// A finished tree as it leaves the output queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub tree: JobTree,
    pub trail: Vec<Level>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_envelope() {
        let env = Envelope::submit(JobTree::new());
        assert_eq!(env.level, Level::ENTRY);
        assert!(!env.is_wake());
        assert!(env.trail.is_empty());
    }

    #[test]
    fn test_wake_envelope() {
        let env = Envelope::wake(Level(3));
        assert!(env.is_wake());
        assert_eq!(env.level, Level(3));
    }
}
