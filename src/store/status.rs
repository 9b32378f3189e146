// src/store/status.rs

//! The task lifecycle enumeration.

use std::fmt;
use std::str::FromStr;

use crate::errors::QrunError;

/// Lifecycle state of a task row.
///
/// Statuses are case-insensitive on read and canonical-cased on write; a
/// blank status field means [`Status::Ignore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Skip over this row entirely.
    Ignore,
    /// Queued, not yet running.
    New,
    /// The runner recorded its intent to spawn but has not yet seen the pid.
    Launching,
    /// The process is running; the pid field is valid.
    Running,
    /// The process exited and was reaped; the rc field is valid.
    Finished,
    /// Input/output files and rc are being archived.
    Archiving,
    /// Input/output files are ready to be deleted.
    Delete,
    /// Row is ready to be removed (same effect as `Ignore`).
    Deleted,
    /// The row could not be understood.
    Invalid,
    /// The runner was unable to launch the task.
    Failed,
    /// The process exited while the runner was not watching.
    Died,
    /// The process survived SIGKILL; the pid field is still valid.
    Zombie,
    /// The runner hit an internal error; see the exception field.
    Exception,
    Killing,
    Killing9,
    Killed,
    /// SIGKILL'd; rc is forced to -9 and is not authoritative.
    Killed9,
    /// The runner stopped and the task kept running. Defensive branch only
    /// reachable through crash recovery; treated as fatal when observed.
    Lost,
}

impl Status {
    /// Canonical spelling used when writing rows. `Ignore` writes back as the
    /// empty string, matching the file format's "blank means ignore" rule.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ignore => "",
            Status::New => "NEW",
            Status::Launching => "LAUNCHING",
            Status::Running => "RUNNING",
            Status::Finished => "FINISHED",
            Status::Archiving => "ARCHIVING",
            Status::Delete => "DELETE",
            Status::Deleted => "DELETED",
            Status::Invalid => "INVALID",
            Status::Failed => "FAILED",
            Status::Died => "DIED",
            Status::Zombie => "ZOMBIE",
            Status::Exception => "EXCEPTION",
            Status::Killing => "KILLING",
            Status::Killing9 => "KILLING9",
            Status::Killed => "KILLED",
            Status::Killed9 => "KILLED9",
            Status::Lost => "LOST",
        }
    }

    /// Lenient parse used when loading rows from a file: blank is `Ignore`,
    /// anything unrecognised is `Invalid`.
    pub fn from_field(s: &str) -> Status {
        s.parse().unwrap_or(Status::Invalid)
    }

    /// True while the scheduler still has work to do for this task.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Status::New
                | Status::Launching
                | Status::Running
                | Status::Killing
                | Status::Killing9
        )
    }

    /// True once the task can never change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Finished
                | Status::Failed
                | Status::Died
                | Status::Killed
                | Status::Killed9
                | Status::Invalid
                | Status::Exception
                | Status::Deleted
        )
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Ignore
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = QrunError;

    /// Strict parse: unknown names are configuration errors. Used for status
    /// queries; file loading goes through the lenient [`Status::from_field`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "" | "IGNORE" => Ok(Status::Ignore),
            "NEW" => Ok(Status::New),
            "LAUNCHING" => Ok(Status::Launching),
            "RUNNING" => Ok(Status::Running),
            "FINISHED" => Ok(Status::Finished),
            "ARCHIVING" => Ok(Status::Archiving),
            "DELETE" => Ok(Status::Delete),
            "DELETED" => Ok(Status::Deleted),
            "INVALID" => Ok(Status::Invalid),
            "FAILED" => Ok(Status::Failed),
            "DIED" => Ok(Status::Died),
            "ZOMBIE" => Ok(Status::Zombie),
            "EXCEPTION" => Ok(Status::Exception),
            "KILLING" => Ok(Status::Killing),
            "KILLING9" => Ok(Status::Killing9),
            "KILLED" => Ok(Status::Killed),
            "KILLED9" => Ok(Status::Killed9),
            "LOST" => Ok(Status::Lost),
            other => Err(QrunError::Config(format!("status `{other}` not recognised"))),
        }
    }
}
