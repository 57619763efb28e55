//! Level identifiers for the pipeline.
//!
//! A level names the stage an item is destined for next. Stages are given
//! consecutive levels starting at 0 in registration order; the terminal sink
//! sits at `Level::SINK`, above every stage.

use std::fmt;

/// Position of a stage in the registered processing order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Level(pub u32);

impl Level {
    /// Level every submission enters at.
    pub const ENTRY: Level = Level(0);

    /// Reserved level of the terminal sink.
    pub const SINK: Level = Level(u32::MAX);

    #[inline]
    pub fn is_sink(self) -> bool {
        self == Self::SINK
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::SINK {
            write!(f, "Level(SINK)")
        } else {
            write!(f, "Level({})", self.0)
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::SINK {
            write!(f, "sink")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
