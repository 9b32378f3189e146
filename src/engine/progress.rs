// src/engine/progress.rs

//! Progress reporting hooks.
//!
//! The scheduler and the store push notifications through a [`ProgressSink`];
//! both methods default to no-ops so implementors opt into what they need.

use std::sync::{Arc, Mutex};

use crate::store::Task;

/// Observer for batch progress and per-task updates.
pub trait ProgressSink {
    /// Overall completion of the run, 0..=100.
    fn percentage(&mut self, _pct: u8) {}

    /// A row changed; `row` is its serialized form without the trailing
    /// newline.
    fn task_update(&mut self, _row: &str, _task: &Task) {}
}

/// Shared handle the store and scheduler both hold.
pub type SharedSink = Arc<Mutex<dyn ProgressSink + Send>>;

pub fn shared(sink: impl ProgressSink + Send + 'static) -> SharedSink {
    Arc::new(Mutex::new(sink))
}

/// Writes a carriage-return progress line to stderr, for interactive runs.
#[derive(Debug, Default)]
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn percentage(&mut self, pct: u8) {
        eprint!("\r{pct}%   ");
        if pct >= 100 {
            eprintln!();
        }
    }
}

/// One recorded notification, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Percentage(u8),
    TaskUpdate { row: String, rownum: usize },
}

/// Captures every notification; used by tests to assert ordering.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<ProgressEvent>,
}

impl ProgressSink for RecordingSink {
    fn percentage(&mut self, pct: u8) {
        self.events.push(ProgressEvent::Percentage(pct));
    }

    fn task_update(&mut self, row: &str, task: &Task) {
        self.events.push(ProgressEvent::TaskUpdate {
            row: row.to_string(),
            rownum: task.rownum,
        });
    }
}
