// src/engine/scheduler.rs

//! The batch scheduler.
//!
//! Runs one group at a time in ascending group order: unordered tasks are
//! eligible in every group, ordered tasks only in their own. Within a group
//! at most `max_tasks` children are in flight; finishing one admits the
//! next. A run for a group is: reconcile the store against the live process
//! table, launch up to the cap, then reap and backfill until nothing
//! tracked remains.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures::future::select_all;
use tracing::{debug, info, warn};

use crate::engine::progress::SharedSink;
use crate::errors::{QrunError, Result};
use crate::exec::{ProcessLauncher, ProcessTable, SystemProcessTable, TaskHandle};
use crate::store::{Status, Task, TaskStore};

/// Tunables for a run.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Admission cap: at most this many children in flight at once.
    pub max_tasks: usize,
    /// Per-task wall-clock limit.
    ///
    /// TODO: enforce by escalating RUNNING -> KILLING -> KILLING9 when the
    /// limit passes; currently accepted but not acted on.
    pub timeout: Option<Duration>,
    /// Grace period between SIGTERM and SIGKILL once a kill starts.
    pub kill_timeout: Option<Duration>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        SchedulerOptions {
            max_tasks: 64,
            timeout: Some(Duration::from_secs(10)),
            kill_timeout: Some(Duration::from_secs(2)),
        }
    }
}

pub struct Scheduler {
    store: TaskStore,
    launcher: ProcessLauncher,
    /// Reaping handles for children this runner spawned, by pid.
    handles: HashMap<u32, TaskHandle>,
    proc_table: Box<dyn ProcessTable + Send>,
    options: SchedulerOptions,
    sink: Option<SharedSink>,
    num_groups: f64,
    done_groups: f64,
    num_tasks: f64,
    done_tasks: f64,
}

impl Scheduler {
    pub fn new(store: TaskStore, options: SchedulerOptions) -> Result<Scheduler> {
        Self::with_process_table(store, options, Box::new(SystemProcessTable))
    }

    /// Like [`Scheduler::new`] but with an injected process table.
    pub fn with_process_table(
        store: TaskStore,
        options: SchedulerOptions,
        proc_table: Box<dyn ProcessTable + Send>,
    ) -> Result<Scheduler> {
        Ok(Scheduler {
            store,
            launcher: ProcessLauncher::new()?,
            handles: HashMap::new(),
            proc_table,
            options,
            sink: None,
            num_groups: 0.0,
            done_groups: 0.0,
            num_tasks: 0.0,
            done_tasks: 0.0,
        })
    }

    /// Install a progress sink; the store shares it for row updates.
    pub fn set_progress_sink(&mut self, sink: SharedSink) {
        self.store.set_progress_sink(sink.clone());
        self.sink = Some(sink);
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut TaskStore {
        &mut self.store
    }

    /// True once no task anywhere in the store is still active.
    pub fn is_done(&self) -> bool {
        self.store.all_settled()
    }

    /// Run every group to completion, in ascending order.
    pub async fn run(&mut self) -> Result<()> {
        let groups = self.store.groups().to_vec();
        self.num_groups = groups.len() as f64;
        self.done_groups = 0.0;

        for group in groups {
            info!(group, "starting group");
            self.done_tasks = 0.0;
            self.store.choose_group(group);
            self.num_tasks = self.store.tasks_by_status(Status::New).len() as f64;
            self.check()?;
            self.launch()?;
            self.wait().await?;
            self.check()?;
            self.done_groups += 1.0;
        }

        self.num_tasks = 0.0;
        self.done_tasks = 0.0;
        self.report_percentage();
        self.store.persist()?;
        info!("run complete");
        Ok(())
    }

    /// Launch queued tasks for the active group up to the admission cap.
    ///
    /// Launch failures other than consistency errors are contained: the
    /// task is marked EXCEPTION with the error text and the batch goes on.
    /// Returns true when queued tasks remain beyond the cap.
    fn launch(&mut self) -> Result<bool> {
        self.check()?;
        let new_tasks = self.store.tasks_by_status(Status::New);
        if new_tasks.is_empty() {
            return Ok(false);
        }
        let in_flight = self.store.list_pids().len();

        let mut more = false;
        for (i, task) in new_tasks.into_iter().enumerate() {
            if in_flight + i >= self.options.max_tasks {
                more = true;
                break;
            }
            let rownum = task.rownum;
            if let Err(e) = self.launch_task(task) {
                if matches!(e, QrunError::Consistency(_)) {
                    return Err(e);
                }
                warn!(rownum, error = %e, "task failed to launch");
                let mut failed = self
                    .store
                    .get(rownum)
                    .cloned()
                    .ok_or_else(|| QrunError::Consistency(format!("row {rownum} vanished")))?;
                failed.status = Status::Exception;
                failed.exception = Some(e.to_string());
                self.store.set_task(failed, true)?;
            }
            self.report_percentage();
        }
        self.store.persist()?;
        Ok(more)
    }

    /// NEW -> LAUNCHING -> RUNNING for one task. The LAUNCHING write lands
    /// before the spawn so a crash in between is visible in the file.
    fn launch_task(&mut self, mut task: Task) -> Result<()> {
        task.status = Status::Launching;
        self.store.set_task(task.clone(), true)?;

        let (pid, handle) = self.launcher.spawn(&mut task)?;
        task.pid = Some(pid);
        task.status = Status::Running;
        self.store.set_task(task, true)?;
        self.handles.insert(pid, handle);
        self.done_tasks += 0.5;
        debug!(pid, "task launched");
        Ok(())
    }

    /// Reap children until the active group has nothing tracked, admitting
    /// queued tasks as capacity frees up.
    async fn wait(&mut self) -> Result<()> {
        loop {
            let pids: HashSet<u32> = self.store.list_pids().into_iter().collect();
            if pids.is_empty() {
                return Ok(());
            }

            match self.reap_next().await {
                Some((pid, result)) => {
                    let rc = result?;
                    if !pids.contains(&pid) {
                        return Err(QrunError::Consistency(format!(
                            "reaped pid {pid} which is not tracked by the store"
                        )));
                    }
                    self.finished(pid, rc)?;
                    self.report_percentage();
                    self.launch()?;
                }
                None => {
                    // Tracked pids but no handles: rows inherited from an
                    // earlier run. Reconcile; whatever survives that is a
                    // process this runner can never reap.
                    self.check()?;
                    if let Some(pid) = self.store.list_pids().first() {
                        return Err(QrunError::Consistency(format!(
                            "pid {pid} is tracked but was not spawned by this runner \
                             and can never be reaped"
                        )));
                    }
                }
            }
        }
    }

    /// Wait for whichever child exits first.
    async fn reap_next(&mut self) -> Option<(u32, Result<i32>)> {
        if self.handles.is_empty() {
            return None;
        }
        let waits: Vec<_> = self
            .handles
            .iter_mut()
            .map(|(&pid, handle)| Box::pin(async move { (pid, handle.wait().await) }))
            .collect();
        let ((pid, result), _, _) = select_all(waits).await;
        Some((pid, result))
    }

    /// Reconcile the visible tasks against the live process table.
    ///
    /// LAUNCHING rows are leftovers of a crash between intent and pid and
    /// become FAILED. RUNNING rows whose pid vanished are reaped if this
    /// runner holds their handle, otherwise marked DIED. KILLING9 rows
    /// resolve to KILLED9 or ZOMBIE. A LOST row is fatal.
    fn check(&mut self) -> Result<()> {
        let live = self.proc_table.live_pids();
        for task in self.store.tasks() {
            match task.status {
                Status::Launching => {
                    warn!(rownum = task.rownum, "stale LAUNCHING row, marking FAILED");
                    let mut failed = task;
                    failed.status = Status::Failed;
                    failed.pid = None;
                    failed.rc = None;
                    self.store.set_task(failed, true)?;
                }
                Status::Running => {
                    let pid = task.pid.ok_or_else(|| {
                        QrunError::Consistency(format!("RUNNING row {} has no pid", task.rownum))
                    })?;
                    if !live.contains(&pid) {
                        if self.handles.contains_key(&pid) {
                            let rc = match self.handles.get_mut(&pid) {
                                Some(handle) => handle.try_wait()?,
                                None => None,
                            };
                            if let Some(rc) = rc {
                                self.finished(pid, rc)?;
                            }
                        } else {
                            self.mark_died(&task)?;
                        }
                    }
                }
                Status::Killing9 => {
                    let pid = task.pid.ok_or_else(|| {
                        QrunError::Consistency(format!("KILLING9 row {} has no pid", task.rownum))
                    })?;
                    let mut resolved = task;
                    if live.contains(&pid) {
                        // Survived SIGKILL; keep the pid for inspection.
                        resolved.status = Status::Zombie;
                    } else {
                        resolved.status = Status::Killed9;
                        resolved.pid = None;
                        resolved.rc = Some(-9);
                    }
                    self.store.set_task(resolved, true)?;
                }
                Status::Lost => {
                    self.store.persist()?;
                    return Err(QrunError::Consistency(format!(
                        "task {} is LOST: its process outlived the runner that started it",
                        task.rownum
                    )));
                }
                _ => {}
            }
        }
        self.store.persist()?;
        Ok(())
    }

    /// A RUNNING pid disappeared from the process table and no handle is
    /// held for it. Re-probe before condemning: if the pid is back, the
    /// process kept running behind our back and the task is LOST.
    fn mark_died(&mut self, task: &Task) -> Result<()> {
        let pid = task.pid.ok_or_else(|| {
            QrunError::Consistency(format!("row {} has no pid to probe", task.rownum))
        })?;
        let mut updated = task.clone();
        if self.proc_table.live_pids().contains(&pid) {
            warn!(rownum = task.rownum, pid, "pid reappeared, marking LOST");
            updated.status = Status::Lost;
        } else {
            info!(rownum = task.rownum, pid, "process died unobserved");
            updated.status = Status::Died;
            updated.pid = None;
        }
        self.store.set_task(updated, true)
    }

    /// RUNNING -> FINISHED once a child is reaped.
    fn finished(&mut self, pid: u32, rc: i32) -> Result<()> {
        let mut task = self.store.task_by_pid(pid)?;
        debug!(rownum = task.rownum, pid, rc, "task finished");
        task.status = Status::Finished;
        task.pid = None;
        task.rc = Some(rc);
        self.store.set_task(task, true)?;
        self.handles.remove(&pid);
        self.done_tasks += 0.5;
        Ok(())
    }

    fn report_percentage(&mut self) {
        let pct = self.percentage();
        if let Some(sink) = &self.sink
            && let Ok(mut sink) = sink.lock()
        {
            sink.percentage(pct);
        }
    }

    /// Overall completion. Each group contributes an equal share; within the
    /// active group each task counts half at launch and half at finish.
    fn percentage(&self) -> u8 {
        if self.num_groups == 0.0 {
            return 100;
        }
        let mut frac = self.done_groups / self.num_groups;
        if self.num_tasks > 0.0 {
            frac += (self.done_tasks / self.num_tasks) / self.num_groups;
        }
        (frac * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct FakePids(HashSet<u32>);

    impl ProcessTable for FakePids {
        fn live_pids(&self) -> HashSet<u32> {
            self.0.clone()
        }
    }

    /// Returns a different pid set on each probe; the last set repeats.
    struct SequencedPids(RefCell<VecDeque<HashSet<u32>>>);

    impl ProcessTable for SequencedPids {
        fn live_pids(&self) -> HashSet<u32> {
            let mut seq = self.0.borrow_mut();
            if seq.len() > 1 {
                seq.pop_front().unwrap_or_default()
            } else {
                seq.front().cloned().unwrap_or_default()
            }
        }
    }

    fn pids(list: &[u32]) -> HashSet<u32> {
        list.iter().copied().collect()
    }

    fn scheduler_with(text: &str, table: Box<dyn ProcessTable + Send>) -> Scheduler {
        let store = TaskStore::from_text(text).unwrap();
        Scheduler::with_process_table(store, SchedulerOptions::default(), table).unwrap()
    }

    #[test]
    fn vanished_running_task_is_marked_died() {
        let mut sched = scheduler_with(
            "\"a\",\"RUNNING\",\"4242\",\"\",\"true\"\n",
            Box::new(FakePids(HashSet::new())),
        );
        sched.check().unwrap();
        let task = sched.store().get(0).unwrap();
        assert_eq!(task.status, Status::Died);
        assert_eq!(task.pid, None);
    }

    #[test]
    fn running_task_with_live_pid_is_left_alone() {
        let mut sched = scheduler_with(
            "\"a\",\"RUNNING\",\"4242\",\"\",\"true\"\n",
            Box::new(FakePids(pids(&[4242]))),
        );
        sched.check().unwrap();
        let task = sched.store().get(0).unwrap();
        assert_eq!(task.status, Status::Running);
        assert_eq!(task.pid, Some(4242));
    }

    #[test]
    fn stale_launching_rows_are_swept_to_failed() {
        let mut sched = scheduler_with(
            "\"a\",\"LAUNCHING\",\"\",\"\",\"true\"\n",
            Box::new(FakePids(HashSet::new())),
        );
        sched.check().unwrap();
        assert_eq!(sched.store().get(0).unwrap().status, Status::Failed);
    }

    #[test]
    fn killing9_resolves_to_zombie_or_killed9() {
        let mut sched = scheduler_with(
            "\"alive\",\"KILLING9\",\"10\",\"\",\"true\"\n\
             \"gone\",\"KILLING9\",\"20\",\"\",\"true\"\n",
            Box::new(FakePids(pids(&[10]))),
        );
        sched.check().unwrap();

        let zombie = sched.store().get(0).unwrap();
        assert_eq!(zombie.status, Status::Zombie);
        assert_eq!(zombie.pid, Some(10), "a zombie keeps its pid");

        let killed = sched.store().get(1).unwrap();
        assert_eq!(killed.status, Status::Killed9);
        assert_eq!(killed.pid, None);
        assert_eq!(killed.rc, Some(-9));
    }

    #[test]
    fn reappearing_pid_becomes_lost_and_lost_is_fatal() {
        // First probe misses the pid, the re-probe finds it again.
        let seq = VecDeque::from([HashSet::new(), pids(&[4242])]);
        let mut sched = scheduler_with(
            "\"a\",\"RUNNING\",\"4242\",\"\",\"true\"\n",
            Box::new(SequencedPids(RefCell::new(seq))),
        );
        sched.check().unwrap();
        assert_eq!(sched.store().get(0).unwrap().status, Status::Lost);

        let err = sched.check().unwrap_err();
        assert!(matches!(err, QrunError::Consistency(_)), "{err}");
    }

    #[tokio::test]
    async fn held_handle_is_reaped_when_the_pid_vanishes() {
        let mut sched = scheduler_with("", Box::new(FakePids(HashSet::new())));
        let mut child = tokio::process::Command::new("true").spawn().unwrap();
        let pid = child.id().unwrap();

        // Let the child exit before handing its handle to the scheduler.
        child.wait().await.unwrap();
        sched.handles.insert(pid, TaskHandle::Command(child));
        sched
            .store_mut()
            .add_task(&[("status", "RUNNING"), ("pid", &pid.to_string()), ("command", "true")])
            .unwrap();
        sched.store_mut().choose_group(0);

        sched.check().unwrap();
        let task = sched.store().get(0).unwrap();
        assert_eq!(task.status, Status::Finished);
        assert_eq!(task.rc, Some(0));
        assert!(sched.handles.is_empty());
    }

    #[test]
    fn percentage_weights_groups_equally() {
        let mut sched = scheduler_with("", Box::new(FakePids(HashSet::new())));
        sched.num_groups = 2.0;
        sched.done_groups = 1.0;
        sched.num_tasks = 4.0;
        sched.done_tasks = 2.0;
        assert_eq!(sched.percentage(), 75);

        sched.num_tasks = 0.0;
        assert_eq!(sched.percentage(), 50);

        sched.num_groups = 0.0;
        assert_eq!(sched.percentage(), 100);
    }
}
