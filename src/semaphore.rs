//! # Counting Semaphores
//!
//! Semaphores live in a fixed pool inside the scheduler and are addressed by
//! a [`SemId`] carrying a generation, so a handle to a destroyed semaphore
//! fails with `EINVAL` instead of reaching whichever semaphore reused the
//! slot.
//!
//! ## Count
//!
//! A positive count is the number of free units. A wait on an empty
//! semaphore still decrements, so a negative count is minus the number of
//! waiters. Waiters sit in the `Blocked(Semaphore)` list with `wait_sem`
//! naming the semaphore; a post grants the highest-priority one, FIFO among
//! equals.
//!
//! ## Priority inheritance
//!
//! With [`SemProtocol::Inherit`] the last task to take the semaphore is
//! recorded as its holder (by pid). A waiter of higher priority raises the
//! holder's effective priority to its own. The boost is single level: a
//! boosted holder that is itself waiting does not pass it on.
//!
//! A holder's effective priority is always recomputed as the maximum of its
//! base priority and the priorities of tasks waiting on any semaphore it
//! still holds. Releasing one semaphore therefore drops only the boost that
//! semaphore's waiters lent.

use crate::arch::ContextSwitch;
use crate::config::{MAX_SEMAPHORES, PRIORITY_INHERITANCE, SEM_VALUE_MAX};
use crate::error::{fatal, Errno, FatalError};
use crate::scheduler::{Scheduler, WaitStatus};
use crate::task::{BlockReason, Pid};

/// Handle to a semaphore in the kernel pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemId {
    index: u8,
    generation: u8,
}

impl SemId {
    /// Pack into a word, e.g. to pass as a task argument.
    #[inline]
    pub const fn into_raw(self) -> usize {
        ((self.generation as usize) << 8) | self.index as usize
    }

    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Self {
            index: raw as u8,
            generation: (raw >> 8) as u8,
        }
    }
}

/// Priority protocol of a semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemProtocol {
    /// No holder tracking. Used for event and counting semaphores.
    None,
    /// Holder is boosted to the priority of its highest waiter.
    Inherit,
}

impl Default for SemProtocol {
    fn default() -> Self {
        if PRIORITY_INHERITANCE {
            SemProtocol::Inherit
        } else {
            SemProtocol::None
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Semaphore {
    pub(crate) count: i16,
    pub(crate) protocol: SemProtocol,
    pub(crate) holder: Option<Pid>,
}

impl Semaphore {
    const fn new(count: i16, protocol: SemProtocol) -> Self {
        Self {
            count,
            protocol,
            holder: None,
        }
    }

    #[inline]
    fn inherits(&self) -> bool {
        self.protocol == SemProtocol::Inherit
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

pub struct SemaphorePool {
    slots: [Option<Semaphore>; MAX_SEMAPHORES],
    generations: [u8; MAX_SEMAPHORES],
}

impl SemaphorePool {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_SEMAPHORES],
            generations: [0; MAX_SEMAPHORES],
        }
    }

    fn alloc(&mut self, sem: Semaphore) -> Result<SemId, Errno> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Errno::EAGAIN)?;
        self.slots[index] = Some(sem);
        Ok(SemId {
            index: index as u8,
            generation: self.generations[index],
        })
    }

    fn free(&mut self, id: SemId) -> Result<Semaphore, Errno> {
        self.get(id)?;
        let index = id.index as usize;
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.slots[index].take().ok_or(Errno::EINVAL)
    }

    pub fn get(&self, id: SemId) -> Result<&Semaphore, Errno> {
        let index = id.index as usize;
        if index >= MAX_SEMAPHORES || self.generations[index] != id.generation {
            return Err(Errno::EINVAL);
        }
        self.slots[index].as_ref().ok_or(Errno::EINVAL)
    }

    pub fn get_mut(&mut self, id: SemId) -> Result<&mut Semaphore, Errno> {
        let index = id.index as usize;
        if index >= MAX_SEMAPHORES || self.generations[index] != id.generation {
            return Err(Errno::EINVAL);
        }
        self.slots[index].as_mut().ok_or(Errno::EINVAL)
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut Semaphore> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for SemaphorePool {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Semaphore operations
// ---------------------------------------------------------------------------

impl<A: ContextSwitch> Scheduler<A> {
    pub fn sem_init(&mut self, count: i16, protocol: SemProtocol) -> Result<SemId, Errno> {
        if count < 0 {
            return Err(Errno::EINVAL);
        }
        let id = self.sems.alloc(Semaphore::new(count, protocol))?;
        log::debug!("sem {:?} init count {} {:?}", id, count, protocol);
        Ok(id)
    }

    /// Free a semaphore. Fails with `EBUSY` while tasks wait on it.
    pub fn sem_destroy(&mut self, id: SemId) -> Result<(), Errno> {
        self.sems.get(id)?;
        if self.first_waiter(id).is_some() {
            return Err(Errno::EBUSY);
        }
        self.sems.free(id)?;
        Ok(())
    }

    pub fn sem_set_protocol(&mut self, id: SemId, protocol: SemProtocol) -> Result<(), Errno> {
        self.sems.get(id)?;
        if self.first_waiter(id).is_some() {
            return Err(Errno::EBUSY);
        }
        let sem = self.sems.get_mut(id)?;
        sem.protocol = protocol;
        if protocol == SemProtocol::None {
            sem.holder = None;
        }
        Ok(())
    }

    /// Current count; a negative value is minus the number of waiters.
    pub fn sem_getvalue(&self, id: SemId) -> Result<i16, Errno> {
        self.sems.get(id).map(|s| s.count)
    }

    pub fn sem_holder(&self, id: SemId) -> Result<Option<Pid>, Errno> {
        self.sems.get(id).map(|s| s.holder)
    }

    /// Take a unit if one is free, otherwise `EAGAIN`. Never blocks, so it
    /// may be called from interrupt context (no holder is recorded there).
    pub fn sem_trywait(&mut self, id: SemId) -> Result<(), Errno> {
        let holder = if self.arch.in_interrupt() { None } else { self.running };
        let sem = self.sems.get_mut(id)?;
        if sem.count <= 0 {
            return Err(Errno::EAGAIN);
        }
        sem.count -= 1;
        if sem.inherits() {
            sem.holder = holder;
        }
        Ok(())
    }

    /// First phase of a wait by the running task.
    ///
    /// With a free unit the caller takes it and keeps running. Otherwise the
    /// holder is boosted, the caller is blocked and the next task is
    /// dispatched, all before returning, so no task of intermediate priority
    /// can run between the block and the boost.
    pub fn sem_wait(&mut self, id: SemId) -> Result<WaitStatus, Errno> {
        self.sems.get(id)?;
        if self.arch.in_interrupt() {
            fatal(FatalError::WaitInInterrupt);
        }
        let pid = self.current_or_fatal();

        let sem = self.sems.get_mut(id)?;
        if sem.count > 0 {
            sem.count -= 1;
            if sem.inherits() {
                sem.holder = Some(pid);
            }
            return Ok(WaitStatus::Acquired);
        }
        sem.count -= 1;
        let holder = if sem.inherits() { sem.holder } else { None };

        let tcb = self.tcb_mut(pid);
        tcb.wait_sem = Some(id);
        tcb.wake_error = None;
        let priority = tcb.sched_priority;
        if let Some(holder) = holder {
            self.boost(holder, priority);
        }
        self.block_task(pid, BlockReason::Semaphore);
        log::trace!("task {} waits on {:?}", pid, id);
        // A lock held by the caller stays in its TCB and does not stop this switch.
        self.dispatch();
        Ok(WaitStatus::Blocked)
    }

    /// Release one unit. Drops the boost the previous holder received
    /// through this semaphore, then hands the unit to the highest-priority
    /// waiter, which becomes the new holder.
    pub fn sem_post(&mut self, id: SemId) -> Result<(), Errno> {
        self.release_unit(id)?;
        self.dispatch();
        Ok(())
    }

    /// The bookkeeping half of a post. Returns the waiter granted the unit.
    fn release_unit(&mut self, id: SemId) -> Result<Option<Pid>, Errno> {
        let sem = self.sems.get_mut(id)?;
        if sem.count >= SEM_VALUE_MAX {
            return Err(Errno::EOVERFLOW);
        }
        let previous = sem.holder.take();
        sem.count += 1;
        let granted = sem.count <= 0;
        let inherits = sem.inherits();

        if let Some(previous) = previous {
            if self.tasks.contains(previous) {
                self.refresh_priority(previous);
            }
        }

        let mut grantee = None;
        if granted {
            if let Some(waiter) = self.first_waiter(id) {
                let tcb = self.tcb_mut(waiter);
                tcb.wait_sem = None;
                tcb.wake_error = None;
                if inherits {
                    self.sems.get_mut(id)?.holder = Some(waiter);
                }
                self.unblock_task(waiter);
                if inherits {
                    // Remaining waiters lend their priority to the new holder.
                    self.refresh_priority(waiter);
                }
                log::trace!("{:?} granted to task {}", id, waiter);
                grantee = Some(waiter);
            }
        }
        Ok(grantee)
    }

    /// Reinitialize the count. Waiters are released as by successive posts
    /// while units remain; the rest of `count` becomes the new value.
    pub fn sem_reset(&mut self, id: SemId, count: i16) -> Result<(), Errno> {
        if count < 0 {
            return Err(Errno::EINVAL);
        }
        self.sems.get(id)?;

        let mut remaining = count;
        let mut granted = false;
        while remaining > 0 && self.sems.get(id)?.count < 0 {
            granted |= self.release_unit(id)?.is_some();
            remaining -= 1;
        }
        let sem = self.sems.get_mut(id)?;
        if sem.count >= 0 {
            sem.count = remaining;
            // The last waiter granted above holds a unit.
            if !granted {
                sem.holder = None;
            }
        }
        self.dispatch();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Priority inheritance
    // -----------------------------------------------------------------------

    /// Highest waiter on `id`, if any.
    fn first_waiter(&self, id: SemId) -> Option<Pid> {
        self.queues
            .blocked(BlockReason::Semaphore)
            .iter()
            .find(|&p| self.tasks.get(p).is_some_and(|t| t.wait_sem == Some(id)))
    }

    /// Highest priority among tasks waiting on semaphores `pid` holds, or 0.
    pub(crate) fn inherited_priority(&self, pid: Pid) -> u8 {
        self.queues
            .blocked(BlockReason::Semaphore)
            .iter()
            .filter_map(|waiter| self.tasks.get(waiter))
            .filter(|tcb| {
                tcb.wait_sem
                    .and_then(|id| self.sems.get(id).ok())
                    .is_some_and(|sem| sem.inherits() && sem.holder == Some(pid))
            })
            .map(|tcb| tcb.sched_priority)
            .max()
            .unwrap_or(0)
    }

    /// Set the effective priority of `pid` to its base priority or what its
    /// waiters lend it, whichever is higher.
    pub(crate) fn refresh_priority(&mut self, pid: Pid) {
        let base = self.tcb(pid).base_priority;
        let effective = base.max(self.inherited_priority(pid));
        self.requeue(pid, effective);
    }

    fn boost(&mut self, holder: Pid, priority: u8) {
        let Some(tcb) = self.tasks.get(holder) else {
            return;
        };
        if tcb.sched_priority < priority {
            log::debug!("task {} inherits priority {}", holder, priority);
            self.requeue(holder, priority);
            self.stats.priority_boosts += 1;
        }
    }

    /// After a waiter's priority changed, recompute its holder's.
    pub(crate) fn propagate_to_holder(&mut self, waiter: Pid) {
        let Some(id) = self.tcb(waiter).wait_sem else {
            return;
        };
        let holder = match self.sems.get(id) {
            Ok(sem) if sem.inherits() => sem.holder,
            _ => None,
        };
        if let Some(holder) = holder.filter(|&h| self.tasks.contains(h)) {
            self.refresh_priority(holder);
        }
    }

    /// Withdraw `pid` from its semaphore wait, giving the unit back and
    /// dropping the boost it lent. The task stays in whatever list it is in.
    pub(crate) fn cancel_sem_wait(&mut self, pid: Pid) {
        let Some(id) = self.tcb_mut(pid).wait_sem.take() else {
            return;
        };
        let holder = match self.sems.get_mut(id) {
            Ok(sem) => {
                sem.count += 1;
                sem.holder
            }
            Err(_) => None,
        };
        if let Some(holder) = holder.filter(|&h| self.tasks.contains(h)) {
            self.refresh_priority(holder);
        }
    }

    /// Clear every holder record naming `pid`.
    pub(crate) fn forget_holder(&mut self, pid: Pid) {
        for sem in self.sems.iter_mut() {
            if sem.holder == Some(pid) {
                sem.holder = None;
            }
        }
    }
}
