// src/exec/proc.rs

//! Process-table probing.
//!
//! The scheduler asks which of its tracked pids are still alive so it can
//! spot processes that exited behind its back. Tests inject fake tables.

use std::collections::HashSet;
use std::fs;

/// A view of which pids currently exist on the system.
pub trait ProcessTable {
    /// Pids of every live process visible to the runner.
    fn live_pids(&self) -> HashSet<u32>;
}

/// Reads the real process table from `/proc`.
#[derive(Debug, Default)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn live_pids(&self) -> HashSet<u32> {
        let mut pids = HashSet::new();
        let Ok(entries) = fs::read_dir("/proc") else {
            return pids;
        };
        for entry in entries.flatten() {
            if let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            {
                pids.insert(pid);
            }
        }
        pids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_pid_is_live() {
        let pids = SystemProcessTable.live_pids();
        assert!(pids.contains(&std::process::id()));
    }
}
