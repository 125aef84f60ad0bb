//! # Queue Manager
//!
//! The ready, pending, inactive and per-reason blocked lists, and the list
//! transitions the rest of the kernel is built from.
//!
//! Lists hold [`Pid`]s, not TCBs. Ordered lists are sorted by non-increasing
//! effective priority with FIFO order among equals. The head of the ready
//! list is the task that should be running.
//!
//! Every operation here runs with interrupts disabled: the scheduler is only
//! reachable through the kernel's critical section.

use heapless::Vec;

use crate::arch::ContextSwitch;
use crate::config::MAX_TASKS;
use crate::error::{fatal, FatalError};
use crate::scheduler::Scheduler;
use crate::task::{BlockReason, Pid, TaskControlBlock, TaskState};

// ---------------------------------------------------------------------------
// TaskList
// ---------------------------------------------------------------------------

/// A bounded sequence of pids. Capacity equals the task table, so a live
/// task always fits.
pub struct TaskList {
    pids: Vec<Pid, MAX_TASKS>,
}

impl TaskList {
    pub const fn new() -> Self {
        Self { pids: Vec::new() }
    }

    #[inline]
    pub fn head(&self) -> Option<Pid> {
        self.pids.first().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    #[inline]
    pub fn contains(&self, pid: Pid) -> bool {
        self.pids.contains(&pid)
    }

    #[inline]
    pub fn as_slice(&self) -> &[Pid] {
        &self.pids
    }

    pub fn iter(&self) -> impl Iterator<Item = Pid> + '_ {
        self.pids.iter().copied()
    }

    /// Remove `pid`; returns whether it was present.
    pub fn remove(&mut self, pid: Pid) -> bool {
        match self.pids.iter().position(|&p| p == pid) {
            Some(index) => {
                self.pids.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn push_back(&mut self, pid: Pid) {
        if self.pids.push(pid).is_err() {
            fatal(FatalError::ListOverflow);
        }
    }

    pub fn pop_front(&mut self) -> Option<Pid> {
        if self.pids.is_empty() {
            None
        } else {
            Some(self.pids.remove(0))
        }
    }

    /// Insert `pid` at its priority position. With `ahead_of_equals` it goes
    /// in front of tasks of the same priority, otherwise behind them.
    /// Returns the insertion index.
    pub fn insert_by_priority<F>(
        &mut self,
        pid: Pid,
        priority: u8,
        ahead_of_equals: bool,
        priority_of: F,
    ) -> usize
    where
        F: Fn(Pid) -> u8,
    {
        debug_assert!(!self.contains(pid));
        let index = self
            .pids
            .iter()
            .position(|&p| {
                let other = priority_of(p);
                if ahead_of_equals {
                    other <= priority
                } else {
                    other < priority
                }
            })
            .unwrap_or(self.pids.len());
        if self.pids.insert(index, pid).is_err() {
            fatal(FatalError::ListOverflow);
        }
        index
    }
}

impl Default for TaskList {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// TaskQueues
// ---------------------------------------------------------------------------

/// All scheduler lists.
pub struct TaskQueues {
    pub(crate) ready: TaskList,
    pub(crate) pending: TaskList,
    pub(crate) inactive: TaskList,
    blocked: [TaskList; BlockReason::COUNT],
}

impl TaskQueues {
    pub const fn new() -> Self {
        Self {
            ready: TaskList::new(),
            pending: TaskList::new(),
            inactive: TaskList::new(),
            blocked: [const { TaskList::new() }; BlockReason::COUNT],
        }
    }

    #[inline]
    pub fn ready(&self) -> &TaskList {
        &self.ready
    }

    #[inline]
    pub fn pending(&self) -> &TaskList {
        &self.pending
    }

    #[inline]
    pub fn inactive(&self) -> &TaskList {
        &self.inactive
    }

    #[inline]
    pub fn blocked(&self, reason: BlockReason) -> &TaskList {
        &self.blocked[reason.index()]
    }

    #[inline]
    pub(crate) fn blocked_mut(&mut self, reason: BlockReason) -> &mut TaskList {
        &mut self.blocked[reason.index()]
    }

    /// The list a task in `state` belongs to.
    pub fn list_for(&self, state: TaskState) -> Option<&TaskList> {
        match state {
            TaskState::Invalid => None,
            TaskState::Inactive => Some(&self.inactive),
            TaskState::Pending => Some(&self.pending),
            TaskState::Ready | TaskState::Running => Some(&self.ready),
            TaskState::Blocked(reason) => Some(self.blocked(reason)),
        }
    }
}

impl Default for TaskQueues {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// List transitions
// ---------------------------------------------------------------------------

impl<A: ContextSwitch> Scheduler<A> {
    pub(crate) fn tcb(&self, pid: Pid) -> &TaskControlBlock<A::Context> {
        self.tasks
            .get(pid)
            .unwrap_or_else(|| fatal(FatalError::DanglingPid(pid)))
    }

    pub(crate) fn tcb_mut(&mut self, pid: Pid) -> &mut TaskControlBlock<A::Context> {
        self.tasks
            .get_mut(pid)
            .unwrap_or_else(|| fatal(FatalError::DanglingPid(pid)))
    }

    /// Remove `pid` from the ready list. Returns true iff it was the head,
    /// i.e. a different task must now be resumed.
    pub(crate) fn remove_from_ready(&mut self, pid: Pid) -> bool {
        let was_head = self.queues.ready.head() == Some(pid);
        self.queues.ready.remove(pid);
        was_head
    }

    /// Insert `pid` into the blocked list for `reason` and mark it blocked.
    ///
    /// The task must still be in the ready-to-run range; anything else means
    /// the lists are already inconsistent and is fatal.
    pub(crate) fn add_to_blocked(&mut self, pid: Pid, reason: BlockReason) {
        let tcb = self.tcb_mut(pid);
        if tcb.is_idle() {
            fatal(FatalError::IdleTaskStopped);
        }
        if !tcb.state.is_ready_to_run() {
            fatal(FatalError::BlockFromState(pid, tcb.state));
        }
        tcb.state = TaskState::Blocked(reason);
        let priority = tcb.sched_priority;

        let tasks = &self.tasks;
        self.queues
            .blocked_mut(reason)
            .insert_by_priority(pid, priority, false, |p| tasks.priority_of(p));
    }

    /// Make `pid` runnable. From interrupt context, or while the scheduler is
    /// locked and the task would preempt the head, it goes to the pending
    /// list instead. Returns true iff the ready-list head changed.
    pub(crate) fn add_to_ready(&mut self, pid: Pid) -> bool {
        let priority = self.tasks.priority_of(pid);
        let preempts = self
            .queues
            .ready
            .head()
            .map_or(true, |head| priority > self.tasks.priority_of(head));

        let in_interrupt = self.arch.in_interrupt();
        if in_interrupt || (preempts && self.is_locked()) {
            self.tcb_mut(pid).state = TaskState::Pending;
            self.queues.pending.push_back(pid);
            if in_interrupt {
                self.arch.request_reschedule();
            }
            log::trace!("task {} pending", pid);
            return false;
        }
        self.insert_ready(pid)
    }

    /// Priority-insert into the ready list, FIFO among equals.
    pub(crate) fn insert_ready(&mut self, pid: Pid) -> bool {
        let old_head = self.queues.ready.head();
        let tcb = self.tcb_mut(pid);
        tcb.state = TaskState::Ready;
        let priority = tcb.sched_priority;

        let tasks = &self.tasks;
        self.queues
            .ready
            .insert_by_priority(pid, priority, false, |p| tasks.priority_of(p));
        self.queues.ready.head() != old_head
    }

    /// Drain the pending list into the ready list. Returns true if any merged
    /// task now heads the ready list.
    pub(crate) fn merge_pending(&mut self) -> bool {
        let mut head_changed = false;
        while let Some(pid) = self.queues.pending.pop_front() {
            head_changed |= self.insert_ready(pid);
            self.stats.pending_merged += 1;
        }
        head_changed
    }

    /// Move a ready-to-run task into the blocked list for `reason`.
    pub(crate) fn block_task(&mut self, pid: Pid, reason: BlockReason) -> bool {
        let state = self.tcb(pid).state;
        if !state.is_ready_to_run() {
            fatal(FatalError::BlockFromState(pid, state));
        }
        let head_changed = self.remove_from_ready(pid);
        self.add_to_blocked(pid, reason);
        head_changed
    }

    /// Move a blocked task back to ready (or pending). No-op for a task
    /// that isn't blocked.
    pub(crate) fn unblock_task(&mut self, pid: Pid) -> bool {
        let TaskState::Blocked(reason) = self.tcb(pid).state else {
            return false;
        };
        self.queues.blocked_mut(reason).remove(pid);
        self.add_to_ready(pid)
    }

    /// Take `pid` out of whichever list holds it. Returns true iff it was
    /// the ready-list head.
    pub(crate) fn detach(&mut self, pid: Pid) -> bool {
        match self.tcb(pid).state {
            TaskState::Ready | TaskState::Running => self.remove_from_ready(pid),
            TaskState::Pending => {
                self.queues.pending.remove(pid);
                false
            }
            TaskState::Inactive => {
                self.queues.inactive.remove(pid);
                false
            }
            TaskState::Blocked(reason) => {
                self.queues.blocked_mut(reason).remove(pid);
                false
            }
            TaskState::Invalid => false,
        }
    }

    /// Change the effective priority of `pid` and move it to its new place
    /// in the list it occupies.
    ///
    /// A running task that is raised stays ahead of its new equals; one that
    /// is lowered goes behind them.
    pub(crate) fn requeue(&mut self, pid: Pid, priority: u8) {
        let tcb = self.tcb_mut(pid);
        let old = tcb.sched_priority;
        let state = tcb.state;
        tcb.sched_priority = priority;
        if old == priority {
            return;
        }

        let tasks = &self.tasks;
        match state {
            TaskState::Ready | TaskState::Running => {
                let ahead = state == TaskState::Running && priority > old;
                self.queues.ready.remove(pid);
                self.queues
                    .ready
                    .insert_by_priority(pid, priority, ahead, |p| tasks.priority_of(p));
            }
            TaskState::Blocked(reason) => {
                let list = self.queues.blocked_mut(reason);
                list.remove(pid);
                list.insert_by_priority(pid, priority, false, |p| tasks.priority_of(p));
            }
            TaskState::Invalid | TaskState::Inactive | TaskState::Pending => {}
        }
    }

    /// Move `pid` behind the ready tasks of its own priority.
    pub(crate) fn rotate(&mut self, pid: Pid) {
        let priority = self.tasks.priority_of(pid);
        let tasks = &self.tasks;
        if self.queues.ready.remove(pid) {
            self.queues
                .ready
                .insert_by_priority(pid, priority, false, |p| tasks.priority_of(p));
        }
    }

    /// Panic if any list invariant is broken.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for tcb in self.tasks.iter() {
            let mut homes = 0;
            homes += self.queues.ready.contains(tcb.pid) as usize;
            homes += self.queues.pending.contains(tcb.pid) as usize;
            homes += self.queues.inactive.contains(tcb.pid) as usize;
            for reason in BlockReason::ALL {
                homes += self.queues.blocked(reason).contains(tcb.pid) as usize;
            }
            assert_eq!(homes, 1, "task {} is in {} lists", tcb.pid, homes);
            let home = self.queues.list_for(tcb.state).expect("listed task has a list state");
            assert!(home.contains(tcb.pid), "task {} not in list for {:?}", tcb.pid, tcb.state);
        }

        let sorted = |list: &TaskList| {
            list.as_slice()
                .windows(2)
                .all(|w| self.tasks.priority_of(w[0]) >= self.tasks.priority_of(w[1]))
        };
        assert!(sorted(&self.queues.ready), "ready list out of order");
        for reason in BlockReason::ALL {
            assert!(sorted(self.queues.blocked(reason)), "{:?} list out of order", reason);
        }

        if self.started && !self.is_locked() {
            assert_eq!(self.running, self.queues.ready.head(), "head is not running");
            let running = self.queues.ready.iter().filter(|&p| self.tcb(p).state == TaskState::Running);
            assert_eq!(running.count(), 1, "exactly one running task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prio(pid: Pid) -> u8 {
        // Pids 1..=3 at 10, 4..=6 at 20, rest at 5.
        match pid.as_u16() {
            1..=3 => 10,
            4..=6 => 20,
            _ => 5,
        }
    }

    #[test]
    fn test_priority_insert_fifo_among_equals() {
        let mut list = TaskList::new();
        for raw in [1, 4, 7, 2, 5, 3] {
            let pid = Pid::new(raw);
            list.insert_by_priority(pid, prio(pid), false, prio);
        }
        let order: heapless::Vec<u16, 8> = list.iter().map(Pid::as_u16).collect();
        assert_eq!(order.as_slice(), &[4, 5, 1, 2, 3, 7]);
    }

    #[test]
    fn test_ahead_of_equals() {
        let mut list = TaskList::new();
        list.insert_by_priority(Pid::new(1), 10, false, prio);
        list.insert_by_priority(Pid::new(2), 10, false, prio);
        let index = list.insert_by_priority(Pid::new(3), 10, true, prio);
        assert_eq!(index, 0);
        assert_eq!(list.head(), Some(Pid::new(3)));
    }

    #[test]
    fn test_remove_and_pop() {
        let mut list = TaskList::new();
        list.push_back(Pid::new(1));
        list.push_back(Pid::new(2));
        assert!(list.remove(Pid::new(1)));
        assert!(!list.remove(Pid::new(1)));
        assert_eq!(list.pop_front(), Some(Pid::new(2)));
        assert_eq!(list.pop_front(), None);
        assert!(list.is_empty());
    }

    #[test]
    fn test_list_for_state() {
        let queues = TaskQueues::new();
        assert!(queues.list_for(TaskState::Invalid).is_none());
        assert!(core::ptr::eq(
            queues.list_for(TaskState::Running).unwrap(),
            queues.ready()
        ));
        assert!(core::ptr::eq(
            queues.list_for(TaskState::Blocked(BlockReason::MqNotFull)).unwrap(),
            queues.blocked(BlockReason::MqNotFull)
        ));
    }
}
