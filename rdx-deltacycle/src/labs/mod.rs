//! Ready-made models built on the scheduler.

pub mod flipflop;
