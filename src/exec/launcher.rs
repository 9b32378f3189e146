// src/exec/launcher.rs

//! Turning a task row into a running child process.
//!
//! The launcher validates that a task is addressed to this user and host,
//! resolves its working directory and stdio files, and spawns either the
//! tokenized command or the in-process closure. It never touches task
//! status; the scheduler owns the state machine.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::anyhow;
use tokio::process::Command;
use tracing::debug;

use crate::errors::{QrunError, Result};
use crate::exec::handle::{ClosureChild, TaskHandle};
use crate::exec::ident;
use crate::store::Task;

/// Where one of the child's standard streams comes from or goes to.
enum Redirect {
    /// Share the runner's own stream (the `-` file name).
    Inherit,
    /// `/dev/null`; the default for input.
    Null,
    File(File),
}

impl Redirect {
    fn into_stdio(self) -> Stdio {
        match self {
            Redirect::Inherit => Stdio::inherit(),
            Redirect::Null => Stdio::null(),
            Redirect::File(f) => Stdio::from(f),
        }
    }
}

pub struct ProcessLauncher {
    user: String,
    host: String,
}

impl ProcessLauncher {
    pub fn new() -> Result<ProcessLauncher> {
        Ok(ProcessLauncher {
            user: ident::current_user(),
            host: ident::local_host()?,
        })
    }

    /// Check that the task is launchable here before any side effects.
    pub fn validate(&self, task: &Task) -> Result<()> {
        if task.command.is_some() && task.func.is_some() {
            return Err(QrunError::Config(
                "a task cannot have both a command and a function".into(),
            ));
        }
        if task.command.is_none() && task.func.is_none() {
            return Err(QrunError::Config(
                "a task must have either a command or a function".into(),
            ));
        }
        if let Some(host) = &task.host
            && host != &self.host
        {
            return Err(QrunError::Config(format!(
                "task {} is addressed to host `{host}`, but this is `{}`",
                task.rownum, self.host
            )));
        }
        if let Some(user) = &task.user
            && user != &self.user
        {
            return Err(QrunError::Config(format!(
                "task {} is addressed to user `{user}`, but the runner is `{}`",
                task.rownum, self.user
            )));
        }
        Ok(())
    }

    /// Launch the task's payload.
    ///
    /// Blank stdio file names are derived from group, rownum and comment and
    /// written back into `task` so they end up in the store. A missing input
    /// file reads as empty input rather than failing the launch.
    /// Returns the child pid and its reaping handle.
    pub fn spawn(&self, task: &mut Task) -> Result<(u32, TaskHandle)> {
        self.validate(task)?;
        let workdir = resolve_workdir(task.pwd.as_deref())?;

        if task.inputfile.is_none() {
            task.inputfile = Some(format!("{}.in.txt", derived_stem(task)));
        }
        if task.outputfile.is_none() {
            task.outputfile = Some(format!("{}.out.txt", derived_stem(task)));
        }
        if task.errorfile.is_none() {
            task.errorfile = Some(format!("{}.err.txt", derived_stem(task)));
        }

        let stdin = match task.inputfile.as_deref() {
            Some("-") => Redirect::Inherit,
            Some(name) => open_source(&workdir, name)?,
            None => Redirect::Null,
        };
        let stdout = open_sink(&workdir, task.outputfile.as_deref())?;
        let stderr = open_sink(&workdir, task.errorfile.as_deref())?;

        if let Some(command) = task.command.clone() {
            spawn_command(&command, &workdir, stdin, stdout, stderr)
        } else if let Some(func) = task.func.clone() {
            spawn_closure(func, &workdir, stdin, stdout, stderr)
        } else {
            unreachable!("validate checked the payload")
        }
    }
}

fn derived_stem(task: &Task) -> String {
    format!(
        "{}-{}-{}",
        task.group.unwrap_or(0),
        task.rownum,
        task.comment.as_deref().unwrap_or("task")
    )
}

fn open_source(workdir: &Path, name: &str) -> Result<Redirect> {
    match File::open(resolve_path(workdir, name)) {
        Ok(file) => Ok(Redirect::File(file)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Redirect::Null),
        Err(e) => Err(e.into()),
    }
}

fn open_sink(workdir: &Path, name: Option<&str>) -> Result<Redirect> {
    match name {
        Some("-") => Ok(Redirect::Inherit),
        None => Ok(Redirect::Null),
        Some(name) => {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(resolve_path(workdir, name))?;
            Ok(Redirect::File(file))
        }
    }
}

/// The task's working directory, with `~` expanded and the directory created
/// if it does not exist yet. Blank means the runner's own directory.
fn resolve_workdir(pwd: Option<&str>) -> Result<PathBuf> {
    let dir = match pwd {
        None => std::env::current_dir()?,
        Some(pwd) => {
            let expanded = if let Some(rest) = pwd.strip_prefix("~") {
                let home = std::env::var("HOME")
                    .map_err(|_| QrunError::Config("cannot expand `~`; HOME is not set".into()))?;
                PathBuf::from(format!("{home}{rest}"))
            } else {
                PathBuf::from(pwd)
            };
            fs::create_dir_all(&expanded)?;
            expanded
        }
    };
    Ok(dir)
}

/// Stdio names are resolved against the task's working directory, not the
/// runner's, so relative names land next to the work.
fn resolve_path(workdir: &Path, name: &str) -> PathBuf {
    let path = Path::new(name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workdir.join(path)
    }
}

fn spawn_command(
    command: &str,
    workdir: &Path,
    stdin: Redirect,
    stdout: Redirect,
    stderr: Redirect,
) -> Result<(u32, TaskHandle)> {
    let argv = shlex::split(command)
        .ok_or_else(|| QrunError::Config(format!("cannot tokenize command `{command}`")))?;
    let Some((program, args)) = argv.split_first() else {
        return Err(QrunError::Config("command is empty after tokenizing".into()));
    };

    let mut child = Command::new(program)
        .args(args)
        .current_dir(workdir)
        .stdin(stdin.into_stdio())
        .stdout(stdout.into_stdio())
        .stderr(stderr.into_stdio())
        .spawn()
        .map_err(|e| anyhow!("spawning `{command}`: {e}"))?;

    let pid = child
        .id()
        .ok_or_else(|| QrunError::Consistency("spawned child has no pid".into()))?;
    debug!(pid, command, "command spawned");
    Ok((pid, TaskHandle::Command(child)))
}

/// Fork a child that runs the closure and exits with its return value.
///
/// All files are opened before the fork; the child only calls async-signal
/// reasonable operations (dup2, chdir) before handing over to the closure.
fn spawn_closure(
    func: crate::store::TaskFunc,
    workdir: &Path,
    stdin: Redirect,
    stdout: Redirect,
    stderr: Redirect,
) -> Result<(u32, TaskHandle)> {
    // SAFETY: fork has no memory-safety preconditions here; the child
    // process only uses its own copies of these handles.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    if pid == 0 {
        // Child. Never returns; any setup failure exits with 126.
        if redirect_fd(&stdin, 0).is_err()
            || redirect_fd(&stdout, 1).is_err()
            || redirect_fd(&stderr, 2).is_err()
            || std::env::set_current_dir(workdir).is_err()
        {
            // SAFETY: _exit is always safe to call.
            unsafe { libc::_exit(126) };
        }
        let rc = func();
        // SAFETY: as above.
        unsafe { libc::_exit(rc) };
    }
    debug!(pid, "closure child forked");
    Ok((pid as u32, TaskHandle::Closure(ClosureChild::new(pid as u32))))
}

/// Point `target_fd` at the redirect source. Runs in the forked child.
fn redirect_fd(redirect: &Redirect, target_fd: i32) -> std::io::Result<()> {
    let src_fd = match redirect {
        Redirect::Inherit => return Ok(()),
        Redirect::Null => {
            let flags = if target_fd == 0 {
                libc::O_RDONLY
            } else {
                libc::O_WRONLY
            };
            // SAFETY: the path is a valid NUL-terminated string.
            let fd = unsafe { libc::open(c"/dev/null".as_ptr(), flags) };
            if fd < 0 {
                return Err(std::io::Error::last_os_error());
            }
            fd
        }
        Redirect::File(f) => f.as_raw_fd(),
    };
    // SAFETY: both descriptors are valid at this point.
    if unsafe { libc::dup2(src_fd, target_fd) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launcher() -> ProcessLauncher {
        ProcessLauncher {
            user: "me".into(),
            host: "here".into(),
        }
    }

    fn command_task(command: &str) -> Task {
        let mut task = Task::default();
        task.command = Some(command.to_string());
        task
    }

    #[test]
    fn validate_rejects_missing_payload() {
        let task = Task::default();
        let err = launcher().validate(&task).unwrap_err();
        assert!(matches!(err, QrunError::Config(_)), "{err}");
    }

    #[test]
    fn validate_rejects_both_payloads() {
        let mut task = command_task("true");
        task.func = Some(std::sync::Arc::new(|| 0));
        assert!(launcher().validate(&task).is_err());
    }

    #[test]
    fn validate_rejects_foreign_host_and_user() {
        let mut task = command_task("true");
        task.host = Some("elsewhere".into());
        assert!(launcher().validate(&task).is_err());

        let mut task = command_task("true");
        task.user = Some("somebody".into());
        assert!(launcher().validate(&task).is_err());

        let mut task = command_task("true");
        task.host = Some("here".into());
        task.user = Some("me".into());
        assert!(launcher().validate(&task).is_ok());
    }

    #[test]
    fn derived_stem_uses_group_rownum_comment() {
        let mut task = command_task("true");
        task.rownum = 4;
        task.group = Some(2);
        task.comment = Some("build".into());
        assert_eq!(derived_stem(&task), "2-4-build");
        task.group = None;
        task.comment = None;
        assert_eq!(derived_stem(&task), "0-4-task");
    }

    #[test]
    fn relative_stdio_names_resolve_against_the_workdir() {
        let workdir = Path::new("/work");
        assert_eq!(resolve_path(workdir, "out.txt"), PathBuf::from("/work/out.txt"));
        assert_eq!(resolve_path(workdir, "/abs/out.txt"), PathBuf::from("/abs/out.txt"));
    }
}
