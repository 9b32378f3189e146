// src/exec/handle.rs

//! Child-process handles.
//!
//! A launched task is either a spawned command or a forked in-process
//! closure; [`TaskHandle`] gives the scheduler one reaping surface for both.
//! Exit codes are normalised so a signal death reports the negated signal
//! number.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;

use crate::errors::{QrunError, Result};

pub enum TaskHandle {
    Command(Child),
    Closure(ClosureChild),
}

impl TaskHandle {
    /// Poll for exit without blocking. `Ok(None)` means still running.
    pub fn try_wait(&mut self) -> Result<Option<i32>> {
        match self {
            TaskHandle::Command(child) => Ok(child.try_wait()?.map(exit_code)),
            TaskHandle::Closure(child) => child.try_wait(),
        }
    }

    /// Wait until the child exits and return its code. Cancel-safe, so
    /// handles can race each other in a select.
    pub async fn wait(&mut self) -> Result<i32> {
        match self {
            TaskHandle::Command(child) => Ok(exit_code(child.wait().await?)),
            TaskHandle::Closure(child) => child.wait().await,
        }
    }
}

/// `code()` for normal exits, negated signal number for signal deaths.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| -status.signal().unwrap_or(0))
}

/// A forked child running an in-process closure.
///
/// tokio has no handle type for a raw fork, so reaping polls `waitpid` with
/// `WNOHANG` between short sleeps. The code is cached after the first
/// successful reap; a second wait on the same pid would otherwise fail.
pub struct ClosureChild {
    pid: u32,
    rc: Option<i32>,
}

impl ClosureChild {
    pub fn new(pid: u32) -> ClosureChild {
        ClosureChild { pid, rc: None }
    }

    pub fn try_wait(&mut self) -> Result<Option<i32>> {
        if let Some(rc) = self.rc {
            return Ok(Some(rc));
        }
        let mut status: libc::c_int = 0;
        // SAFETY: status points at a valid c_int for waitpid to fill in.
        let reaped = unsafe { libc::waitpid(self.pid as libc::pid_t, &mut status, libc::WNOHANG) };
        if reaped == 0 {
            return Ok(None);
        }
        if reaped < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let rc = if libc::WIFEXITED(status) {
            libc::WEXITSTATUS(status)
        } else if libc::WIFSIGNALED(status) {
            -libc::WTERMSIG(status)
        } else {
            return Err(QrunError::Consistency(format!(
                "waitpid returned an unexpected status {status:#x} for pid {}",
                self.pid
            )));
        };
        self.rc = Some(rc);
        Ok(Some(rc))
    }

    pub async fn wait(&mut self) -> Result<i32> {
        loop {
            if let Some(rc) = self.try_wait()? {
                return Ok(rc);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
