// src/engine/mod.rs

//! The scheduling engine and its progress hooks.

pub mod progress;
pub mod scheduler;

pub use progress::{ConsoleProgress, ProgressSink, SharedSink};
pub use scheduler::{Scheduler, SchedulerOptions};
