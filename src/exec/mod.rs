// src/exec/mod.rs

//! Process execution: identity checks, launching, child handles and
//! process-table probing.

pub mod handle;
pub mod ident;
pub mod launcher;
pub mod proc;

pub use handle::TaskHandle;
pub use launcher::ProcessLauncher;
pub use proc::{ProcessTable, SystemProcessTable};
