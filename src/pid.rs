//! # PID Registry
//!
//! Fixed-capacity hash table mapping process id → TCB. It doubles as the
//! task arena: the TCB lives in the slot its pid hashes to, so a lookup is a
//! single probe.
//!
//! Pids are issued from a counter that only moves forward and wraps from
//! `MAX_PID` back to `FIRST_USER_PID`. A new pid is found by stepping the
//! counter at most `MAX_TASKS` times until it lands on a free slot. A freed
//! pid is therefore never handed out again until the counter has gone all the
//! way around.

use crate::config::{FIRST_USER_PID, MAX_PID, MAX_TASKS};
use crate::error::Errno;
use crate::task::{Pid, TaskControlBlock};

pub struct PidRegistry<C> {
    slots: [Option<TaskControlBlock<C>>; MAX_TASKS],
    last_pid: u16,
    live: usize,
}

impl<C> PidRegistry<C> {
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_TASKS],
            last_pid: FIRST_USER_PID - 1,
            live: 0,
        }
    }

    /// Issue the next free pid and store the TCB built for it.
    ///
    /// Returns `EAGAIN` if every probed slot is taken.
    pub fn assign<F>(&mut self, build: F) -> Result<Pid, Errno>
    where
        F: FnOnce(Pid) -> TaskControlBlock<C>,
    {
        let mut next = self.last_pid;
        for _ in 0..MAX_TASKS {
            next = if next >= MAX_PID { FIRST_USER_PID } else { next + 1 };
            let pid = Pid::new(next);
            if self.slots[pid.slot()].is_none() {
                self.slots[pid.slot()] = Some(build(pid));
                self.last_pid = next;
                self.live += 1;
                return Ok(pid);
            }
        }
        Err(Errno::EAGAIN)
    }

    /// Store a TCB under a pid chosen by the caller (the idle task).
    pub fn insert_reserved(&mut self, tcb: TaskControlBlock<C>) -> Result<(), Errno> {
        let slot = &mut self.slots[tcb.pid.slot()];
        if slot.is_some() {
            return Err(Errno::EAGAIN);
        }
        *slot = Some(tcb);
        self.live += 1;
        Ok(())
    }

    #[inline]
    pub fn get(&self, pid: Pid) -> Option<&TaskControlBlock<C>> {
        self.slots[pid.slot()].as_ref().filter(|tcb| tcb.pid == pid)
    }

    #[inline]
    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut TaskControlBlock<C>> {
        self.slots[pid.slot()].as_mut().filter(|tcb| tcb.pid == pid)
    }

    /// Remove the TCB registered under `pid`, freeing its slot.
    pub fn remove(&mut self, pid: Pid) -> Option<TaskControlBlock<C>> {
        let slot = &mut self.slots[pid.slot()];
        match slot {
            Some(tcb) if tcb.pid == pid => {
                self.live -= 1;
                slot.take()
            }
            _ => None,
        }
    }

    #[inline]
    pub fn contains(&self, pid: Pid) -> bool {
        self.get(pid).is_some()
    }

    /// Effective priority of `pid`, or 0 if it is not registered.
    #[inline]
    pub fn priority_of(&self, pid: Pid) -> u8 {
        self.get(pid).map_or(0, |tcb| tcb.sched_priority)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.live == MAX_TASKS
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskControlBlock<C>> {
        self.slots.iter().filter_map(Option::as_ref)
    }
}

impl<C> Default for PidRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
