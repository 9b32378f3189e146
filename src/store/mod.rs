// src/store/mod.rs

//! Durable task storage: the file format, the task record, the lifecycle
//! enumeration and the store that ties them together.

pub mod format;
pub mod status;
pub mod store;
pub mod task;

pub use status::Status;
pub use store::TaskStore;
pub use task::{Task, TaskFunc};
