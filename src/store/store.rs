// src/store/store.rs

//! The durable task store.
//!
//! Owns the rownum-ordered task rows, the pid index, the group set and the
//! verbatim-preserved freeform text. Every mutation goes through
//! [`TaskStore::set_task`], which enforces the pid invariant and notifies
//! the progress sink; persistence is an atomic temp-write-then-rename so a
//! reader never observes a partially written file.
//!
//! Scales fine up to a few hundred thousand rows; beyond that, reading and
//! writing the file gets slow.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::engine::progress::SharedSink;
use crate::errors::{QrunError, Result};
use crate::store::format;
use crate::store::status::Status;
use crate::store::task::{Task, TaskFunc};

pub struct TaskStore {
    path: Option<PathBuf>,
    tmp_path: Option<PathBuf>,
    preserved: Vec<String>,
    header: Vec<String>,
    rows: Vec<Task>,
    /// pid -> rownum, rebuilt from the visible subset by [`TaskStore::tasks`]
    /// and maintained incrementally by [`TaskStore::set_task`].
    pids: HashMap<u32, usize>,
    /// Distinct positive groups plus the implicit group 0, sorted ascending.
    groups: Vec<i64>,
    cur_group: i64,
    sink: Option<SharedSink>,
}

impl TaskStore {
    /// Open a durable store backed by `path`. A missing file yields a fresh
    /// store carrying the default documentation text; the first persist
    /// creates it.
    pub fn open(path: impl AsRef<Path>) -> Result<TaskStore> {
        let path = path.as_ref().to_path_buf();
        let text = match fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let mut store = Self::build(text.as_deref())?;
        let mut tmp = path.clone().into_os_string();
        tmp.push("~");
        store.tmp_path = Some(PathBuf::from(tmp));
        store.path = Some(path);
        Ok(store)
    }

    /// Build a memory-only store from supplied text; [`TaskStore::persist`]
    /// is a no-op for it.
    pub fn from_text(text: &str) -> Result<TaskStore> {
        Self::build(Some(text))
    }

    fn build(text: Option<&str>) -> Result<TaskStore> {
        let mut store = TaskStore {
            path: None,
            tmp_path: None,
            preserved: Vec::new(),
            header: format::default_header(),
            rows: Vec::new(),
            pids: HashMap::new(),
            groups: vec![0],
            cur_group: 0,
            sink: None,
        };
        match text {
            None => {
                store.preserved = format::DEFAULT_PRESERVED_TEXT
                    .lines()
                    .map(str::to_string)
                    .collect();
            }
            Some(text) => {
                let parsed = format::parse(text)?;
                store.preserved = parsed.preserved;
                store.header = parsed.header;
                for task in parsed.rows {
                    store.register_row(task);
                }
            }
        }
        Ok(store)
    }

    pub fn set_progress_sink(&mut self, sink: SharedSink) {
        self.sink = Some(sink);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn preserved_lines(&self) -> &[String] {
        &self.preserved
    }

    /// Groups in ascending execution order; always contains 0.
    pub fn groups(&self) -> &[i64] {
        &self.groups
    }

    pub fn current_group(&self) -> i64 {
        self.cur_group
    }

    pub fn get(&self, rownum: usize) -> Option<&Task> {
        self.rows.get(rownum)
    }

    /// Make `group` the active group and refresh the pid index for it.
    pub fn choose_group(&mut self, group: i64) {
        self.cur_group = group;
        self.tasks();
    }

    /// Tasks visible for the active group: unordered rows plus rows whose
    /// group equals it. Rebuilds the pid index from exactly this subset;
    /// callers must treat the index as authoritative only after calling
    /// this (or one of the helpers built on it).
    pub fn tasks(&mut self) -> Vec<Task> {
        self.pids.clear();
        let cur = self.cur_group;
        let mut visible = Vec::new();
        for (rownum, task) in self.rows.iter().enumerate() {
            let in_view = task.group.is_none_or(|g| g < 1 || g == cur);
            if in_view {
                if let Some(pid) = task.pid {
                    self.pids.insert(pid, rownum);
                }
                visible.push(task.clone());
            }
        }
        visible
    }

    /// Visible tasks currently in `status`.
    pub fn tasks_by_status(&mut self, status: Status) -> Vec<Task> {
        self.tasks()
            .into_iter()
            .filter(|t| t.status == status)
            .collect()
    }

    /// Stringly-typed variant for queries coming from the CLI; an unknown
    /// status name is a configuration error.
    pub fn tasks_by_status_str(&mut self, status: &str) -> Result<Vec<Task>> {
        let status: Status = status.parse()?;
        Ok(self.tasks_by_status(status))
    }

    /// Pids currently tracked in the index, ascending.
    pub fn list_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.pids.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// O(1) lookup through the pid index. The indexed row's own pid field
    /// must agree with the key; anything else means the store is corrupted.
    pub fn task_by_pid(&self, pid: u32) -> Result<Task> {
        let &rownum = self.pids.get(&pid).ok_or_else(|| {
            QrunError::Consistency(format!("no task is tracked for pid {pid}"))
        })?;
        let task = &self.rows[rownum];
        if task.pid != Some(pid) {
            return Err(QrunError::Consistency(format!(
                "pid index maps {pid} to row {rownum}, but that row's pid is {:?}",
                task.pid
            )));
        }
        Ok(task.clone())
    }

    /// Write `task` back to its row.
    ///
    /// Enforces the pid invariant: a non-null pid may not change to a
    /// different non-null pid without first passing through null. Updates
    /// the pid index incrementally, notifies the progress sink with the
    /// serialized row, and persists unless `defer_persist` is set.
    pub fn set_task(&mut self, task: Task, defer_persist: bool) -> Result<()> {
        let rownum = task.rownum;
        let old_pid = self
            .rows
            .get(rownum)
            .ok_or_else(|| QrunError::Consistency(format!("row {rownum} is out of range")))?
            .pid;
        if old_pid != task.pid {
            if let (Some(old), Some(new)) = (old_pid, task.pid) {
                return Err(QrunError::Consistency(format!(
                    "a task cannot change its pid; attempted {old} -> {new} for row {rownum}"
                )));
            }
            if let Some(old) = old_pid {
                self.pids.remove(&old);
            }
            if let Some(new) = task.pid {
                self.pids.insert(new, rownum);
            }
        }
        debug!(rownum, status = %task.status.as_str(), pid = ?task.pid, "row updated");
        self.rows[rownum] = task;
        self.notify_row(rownum)?;
        if !defer_persist {
            self.persist()?;
        }
        Ok(())
    }

    /// Update one named field of a row and persist.
    pub fn set_task_field(&mut self, rownum: usize, name: &str, value: &str) -> Result<()> {
        let mut task = self
            .rows
            .get(rownum)
            .cloned()
            .ok_or_else(|| QrunError::Consistency(format!("row {rownum} is out of range")))?;
        task.set_field(name, value)?;
        self.set_task(task, false)
    }

    fn notify_row(&self, rownum: usize) -> Result<()> {
        if let Some(sink) = &self.sink {
            let task = &self.rows[rownum];
            let row = format::serialize_row(task, &self.header)?;
            if let Ok(mut sink) = sink.lock() {
                sink.task_update(row.trim_end(), task);
            }
        }
        Ok(())
    }

    /// Serialize everything to a sibling temporary path, then atomically
    /// replace the durable path. No-op for memory-only stores. Failures are
    /// fatal and not retried; the durable file is never left half-written.
    pub fn persist(&self) -> Result<()> {
        let (Some(path), Some(tmp)) = (&self.path, &self.tmp_path) else {
            return Ok(());
        };
        let text = format::serialize_store(&self.preserved, &self.header, &self.rows)?;
        fs::write(tmp, text)?;
        fs::rename(tmp, path)?;
        debug!(path = %path.display(), rows = self.rows.len(), "store persisted");
        Ok(())
    }

    /// Serialized representation of a task in this store's header order.
    pub fn serialize_row(&self, task: &Task) -> Result<String> {
        format::serialize_row(task, &self.header)
    }

    /// Append a task built from `field=value` pairs. Field names are
    /// validated against the schema; group and pid are normalised to
    /// integer-or-null. Returns the new rownum.
    pub fn add_task(&mut self, fields: &[(&str, &str)]) -> Result<usize> {
        self.add_task_inner(fields, None)
    }

    /// Append a task whose payload is an in-process closure rather than an
    /// external command. Supplying a command as well is a configuration
    /// error.
    pub fn add_func_task(&mut self, fields: &[(&str, &str)], func: TaskFunc) -> Result<usize> {
        self.add_task_inner(fields, Some(func))
    }

    fn add_task_inner(&mut self, fields: &[(&str, &str)], func: Option<TaskFunc>) -> Result<usize> {
        let mut task = Task::default();
        for (name, value) in fields {
            task.set_field(name, value)?;
        }
        if func.is_some() && task.command.is_some() {
            return Err(QrunError::Config(
                "a task cannot have both a command and a function".into(),
            ));
        }
        task.func = func;
        let rownum = self.register_row(task);
        debug!(rownum, "task appended");
        Ok(rownum)
    }

    /// Register a task at the end of the row list, assigning the next
    /// rownum and updating the group set and pid index.
    fn register_row(&mut self, mut task: Task) -> usize {
        let rownum = self.rows.len();
        task.rownum = rownum;
        if let Some(group) = task.group
            && group > 0
            && !self.groups.contains(&group)
        {
            self.groups.push(group);
            self.groups.sort_unstable();
        }
        if let Some(pid) = task.pid
            && task.is_unordered()
        {
            self.pids.insert(pid, rownum);
        }
        self.rows.push(task);
        rownum
    }

    /// Delete a task; legal only for the most recently appended row. The
    /// group set shrinks when the row was the last member of its group, and
    /// the active group falls back to 0 when its group disappears.
    pub fn delete_task(&mut self, rownum: usize) -> Result<Task> {
        if self.rows.is_empty() || rownum != self.rows.len() - 1 {
            return Err(QrunError::Consistency(format!(
                "only the most recently added task may be deleted (attempted row {rownum} of {})",
                self.rows.len()
            )));
        }
        let task = match self.rows.pop() {
            Some(task) => task,
            None => {
                return Err(QrunError::Consistency(
                    "delete attempted on an empty store".into(),
                ));
            }
        };
        if let Some(pid) = task.pid {
            self.pids.remove(&pid);
        }
        if let Some(group) = task.group
            && group > 0
            && self.num_tasks_in_group(group) == 0
        {
            self.groups.retain(|&g| g != group);
            if self.cur_group == group {
                self.cur_group = 0;
            }
        }
        Ok(task)
    }

    pub fn num_tasks_in_group(&self, group: i64) -> usize {
        self.rows.iter().filter(|t| t.group == Some(group)).count()
    }

    /// Drop every row and reset the group set and pid index.
    pub fn delete_all_tasks(&mut self) {
        self.rows.clear();
        self.pids.clear();
        self.groups = vec![0];
        self.cur_group = 0;
    }

    /// True when no task in the store, regardless of group, is still in an
    /// active state.
    pub fn all_settled(&self) -> bool {
        !self.rows.iter().any(|t| t.status.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_store() -> TaskStore {
        TaskStore::from_text("").unwrap()
    }

    #[test]
    fn pid_index_disagreement_is_a_consistency_error() {
        let mut store = empty_store();
        store
            .add_task(&[("comment", "a"), ("status", "RUNNING"), ("pid", "41")])
            .unwrap();
        // Corrupt the index directly: map a pid to a row that disagrees.
        store.pids.insert(999, 0);
        let err = store.task_by_pid(999).unwrap_err();
        assert!(matches!(err, QrunError::Consistency(_)), "{err}");
        assert!(store.task_by_pid(41).is_ok());
    }

    #[test]
    fn set_task_keeps_the_pid_index_incremental() {
        let mut store = empty_store();
        store.add_task(&[("comment", "a"), ("status", "NEW")]).unwrap();
        let mut task = store.get(0).cloned().unwrap();
        task.pid = Some(77);
        store.set_task(task.clone(), true).unwrap();
        assert_eq!(store.list_pids(), vec![77]);

        task.pid = None;
        store.set_task(task.clone(), true).unwrap();
        assert!(store.list_pids().is_empty());
    }

    #[test]
    fn ordered_rows_join_the_pid_index_only_when_their_group_is_chosen() {
        let mut store = empty_store();
        store
            .add_task(&[("status", "RUNNING"), ("pid", "10")])
            .unwrap();
        store
            .add_task(&[("status", "RUNNING"), ("pid", "20"), ("group", "3")])
            .unwrap();
        // Appending registers only unordered pids.
        assert_eq!(store.list_pids(), vec![10]);
        store.choose_group(3);
        assert_eq!(store.list_pids(), vec![10, 20]);
        store.choose_group(0);
        assert_eq!(store.list_pids(), vec![10]);
    }
}
