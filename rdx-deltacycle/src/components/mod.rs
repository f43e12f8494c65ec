//! Building blocks that run on top of the scheduler: task bodies and drivers.

pub mod clock;
pub mod task;
