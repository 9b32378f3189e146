// src/store/task.rs

//! The task record and its named-field access surface.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::errors::{QrunError, Result};
use crate::store::status::Status;

/// Canonical header order for durable task files.
pub const FIELD_NAMES: [&str; 13] = [
    "comment",
    "status",
    "pid",
    "rc",
    "command",
    "group",
    "user",
    "host",
    "pwd",
    "inputfile",
    "outputfile",
    "errorfile",
    "exception",
];

/// Name of the derived identity column; never valid in a header or as an
/// assignable field.
pub const ROWNUM_FIELD: &str = "rownum";

/// Name of the in-process payload pseudo-field. It is accepted conceptually
/// by task creation but never as a text field.
pub const FUNCTION_FIELD: &str = "function";

/// In-process task payload. Runs in a forked child process; the return value
/// becomes the child's exit code (keep it in 0..=255).
pub type TaskFunc = Arc<dyn Fn() -> i32 + Send + Sync>;

/// One row of the task store.
///
/// `rownum` is the task's identity: its index among the data rows, assigned
/// at creation and managed exclusively by the store. Blank file fields are
/// `None`; exactly one of `command`/`func` must be set for the task to be
/// launchable.
#[derive(Clone, Default)]
pub struct Task {
    pub rownum: usize,
    pub comment: Option<String>,
    pub status: Status,
    pub pid: Option<u32>,
    pub rc: Option<i32>,
    pub command: Option<String>,
    pub func: Option<TaskFunc>,
    pub group: Option<i64>,
    pub user: Option<String>,
    pub host: Option<String>,
    pub pwd: Option<String>,
    pub inputfile: Option<String>,
    pub outputfile: Option<String>,
    pub errorfile: Option<String>,
    pub exception: Option<String>,
}

impl Task {
    /// Serialized value of a named field; blank for `None`.
    pub fn field(&self, name: &str) -> Result<String> {
        let value = match name {
            "comment" => self.comment.clone().unwrap_or_default(),
            "status" => self.status.as_str().to_string(),
            "pid" => self.pid.map(|p| p.to_string()).unwrap_or_default(),
            "rc" => self.rc.map(|rc| rc.to_string()).unwrap_or_default(),
            "command" => self.command.clone().unwrap_or_default(),
            "group" => self.group.map(|g| g.to_string()).unwrap_or_default(),
            "user" => self.user.clone().unwrap_or_default(),
            "host" => self.host.clone().unwrap_or_default(),
            "pwd" => self.pwd.clone().unwrap_or_default(),
            "inputfile" => self.inputfile.clone().unwrap_or_default(),
            "outputfile" => self.outputfile.clone().unwrap_or_default(),
            "errorfile" => self.errorfile.clone().unwrap_or_default(),
            "exception" => self.exception.clone().unwrap_or_default(),
            other => {
                return Err(QrunError::Config(format!("unknown field `{other}`")));
            }
        };
        Ok(value)
    }

    /// Assign a named field from its text representation. A blank value
    /// clears the field. Unknown names, the derived `rownum` column and the
    /// `function` pseudo-field are configuration errors.
    pub fn set_field(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "comment" => self.comment = non_blank(value),
            "status" => self.status = Status::from_field(value),
            "pid" => self.pid = parse_num(name, value)?,
            "rc" => self.rc = parse_num(name, value)?,
            "command" => self.command = non_blank(value),
            "group" => self.group = parse_num(name, value)?,
            "user" => self.user = non_blank(value),
            "host" => self.host = non_blank(value),
            "pwd" => self.pwd = non_blank(value),
            "inputfile" => self.inputfile = non_blank(value),
            "outputfile" => self.outputfile = non_blank(value),
            "errorfile" => self.errorfile = non_blank(value),
            "exception" => self.exception = non_blank(value),
            ROWNUM_FIELD => {
                return Err(QrunError::Config(
                    "`rownum` is derived from row order and cannot be assigned".into(),
                ));
            }
            FUNCTION_FIELD => {
                return Err(QrunError::Config(
                    "`function` is not a text field; use TaskStore::add_func_task".into(),
                ));
            }
            other => {
                return Err(QrunError::Config(format!("unknown field `{other}`")));
            }
        }
        Ok(())
    }

    /// Tasks without a positive group run at any time, unordered.
    pub fn is_unordered(&self) -> bool {
        self.group.is_none_or(|g| g < 1)
    }
}

fn non_blank(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_num<T: FromStr>(name: &str, value: &str) -> Result<Option<T>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<T>()
        .map(Some)
        .map_err(|_| QrunError::Config(format!("invalid {name} value `{value}`")))
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("rownum", &self.rownum)
            .field("comment", &self.comment)
            .field("status", &self.status)
            .field("pid", &self.pid)
            .field("rc", &self.rc)
            .field("command", &self.command)
            .field("func", &self.func.as_ref().map(|_| "<fn>"))
            .field("group", &self.group)
            .field("user", &self.user)
            .field("host", &self.host)
            .field("pwd", &self.pwd)
            .field("inputfile", &self.inputfile)
            .field("outputfile", &self.outputfile)
            .field("errorfile", &self.errorfile)
            .field("exception", &self.exception)
            .finish()
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        let func_eq = match (&self.func, &other.func) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        func_eq
            && self.rownum == other.rownum
            && self.comment == other.comment
            && self.status == other.status
            && self.pid == other.pid
            && self.rc == other.rc
            && self.command == other.command
            && self.group == other.group
            && self.user == other.user
            && self.host == other.host
            && self.pwd == other.pwd
            && self.inputfile == other.inputfile
            && self.outputfile == other.outputfile
            && self.errorfile == other.errorfile
            && self.exception == other.exception
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_field_round_trips_through_field() {
        let mut task = Task::default();
        task.set_field("comment", "build").unwrap();
        task.set_field("status", "NEW").unwrap();
        task.set_field("group", "-2").unwrap();
        task.set_field("pid", "4242").unwrap();

        assert_eq!(task.field("comment").unwrap(), "build");
        assert_eq!(task.field("status").unwrap(), "NEW");
        assert_eq!(task.field("group").unwrap(), "-2");
        assert_eq!(task.field("pid").unwrap(), "4242");
        assert_eq!(task.field("command").unwrap(), "");
    }

    #[test]
    fn blank_value_clears_a_field() {
        let mut task = Task::default();
        task.set_field("user", "alice").unwrap();
        task.set_field("user", "").unwrap();
        assert_eq!(task.user, None);
    }

    #[test]
    fn rownum_and_unknown_fields_are_rejected() {
        let mut task = Task::default();
        assert!(task.set_field("rownum", "3").is_err());
        assert!(task.set_field("priority", "9").is_err());
        assert!(task.field("priority").is_err());
    }

    #[test]
    fn non_numeric_pid_is_a_config_error() {
        let mut task = Task::default();
        assert!(task.set_field("pid", "abc").is_err());
    }

    #[test]
    fn group_classification() {
        let mut task = Task::default();
        assert!(task.is_unordered());
        task.group = Some(0);
        assert!(task.is_unordered());
        task.group = Some(-3);
        assert!(task.is_unordered());
        task.group = Some(2);
        assert!(!task.is_unordered());
    }
}
