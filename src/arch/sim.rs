//! # Host Simulation Port
//!
//! Stands in for real hardware on the host. Switching a context only updates
//! counters and appends a [`SwitchEvent`] to a bounded log, which lets tests
//! observe exactly which task the scheduler suspended and resumed, and when a
//! signal delivery ran. Interrupt context is simulated with
//! [`SimPort::enter_interrupt`] / [`SimPort::leave_interrupt`].
//!
//! By default a delivery runs inside `resume`. With
//! [`SimPort::defer_deliveries`] it waits for [`SimPort::complete_switch`]
//! instead, the way a port that finishes switches in a later exception does.

use heapless::Vec;

use super::ContextSwitch;
use crate::error::{fatal, FatalError};
use crate::signal::SigDeliver;
use crate::task::{Pid, TaskEntry};

const CONTEXT_MAGIC: u32 = 0x4b53_4358;

/// Number of events kept; older events are dropped first.
pub const EVENT_LOG_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchEvent {
    Suspend(Pid),
    Resume(Pid),
    Deliver(Pid),
    Release(Pid),
}

/// Saved context of a simulated task.
#[derive(Debug)]
pub struct SimContext {
    magic: u32,
    pid: Pid,
    entry: TaskEntry,
    arg: usize,
    saves: u32,
    resumes: u32,
}

impl SimContext {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn entry(&self) -> TaskEntry {
        self.entry
    }

    pub fn arg(&self) -> usize {
        self.arg
    }

    /// Times this context was saved.
    pub fn saves(&self) -> u32 {
        self.saves
    }

    /// Times this context was resumed.
    pub fn resumes(&self) -> u32 {
        self.resumes
    }

    #[cfg(test)]
    pub(crate) fn corrupt(&mut self) {
        self.magic = !CONTEXT_MAGIC;
    }

    fn validate(&self) {
        if self.magic != CONTEXT_MAGIC {
            fatal(FatalError::CorruptContext(self.pid));
        }
    }
}

pub struct SimPort {
    events: Vec<SwitchEvent, EVENT_LOG_LEN>,
    interrupt_depth: u32,
    defer: bool,
    deferred: Option<(SigDeliver, Pid)>,
}

impl SimPort {
    pub const fn new() -> Self {
        Self {
            events: Vec::new(),
            interrupt_depth: 0,
            defer: false,
            deferred: None,
        }
    }

    pub fn events(&self) -> &[SwitchEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// The task most recently handed the CPU.
    pub fn last_resumed(&self) -> Option<Pid> {
        self.events.iter().rev().find_map(|ev| match ev {
            SwitchEvent::Resume(pid) => Some(*pid),
            _ => None,
        })
    }

    pub fn enter_interrupt(&mut self) {
        self.interrupt_depth += 1;
    }

    pub fn leave_interrupt(&mut self) {
        self.interrupt_depth = self.interrupt_depth.saturating_sub(1);
    }

    pub fn defer_deliveries(&mut self, on: bool) {
        self.defer = on;
    }

    /// Run the delivery of the last resumed task, if it is still waiting.
    pub fn complete_switch(&mut self) {
        if let Some((deliver, pid)) = self.deferred.take() {
            self.record(SwitchEvent::Deliver(pid));
            deliver(pid);
        }
    }

    fn record(&mut self, event: SwitchEvent) {
        if self.events.is_full() {
            self.events.remove(0);
        }
        let _ = self.events.push(event);
    }
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextSwitch for SimPort {
    type Context = SimContext;

    fn initial_state(&mut self, pid: Pid, entry: TaskEntry, arg: usize) -> SimContext {
        SimContext {
            magic: CONTEXT_MAGIC,
            pid,
            entry,
            arg,
            saves: 0,
            resumes: 0,
        }
    }

    fn save_and_suspend(&mut self, ctx: &mut SimContext) {
        ctx.validate();
        ctx.saves += 1;
        self.record(SwitchEvent::Suspend(ctx.pid));
    }

    fn resume(&mut self, ctx: &mut SimContext, deliver: Option<SigDeliver>) {
        ctx.validate();
        ctx.resumes += 1;
        self.record(SwitchEvent::Resume(ctx.pid));
        if self.defer {
            self.deferred = deliver.map(|d| (d, ctx.pid));
        } else if let Some(deliver) = deliver {
            self.record(SwitchEvent::Deliver(ctx.pid));
            deliver(ctx.pid);
        }
    }

    fn release(&mut self, ctx: SimContext) {
        self.record(SwitchEvent::Release(ctx.pid));
    }

    fn in_interrupt(&self) -> bool {
        self.interrupt_depth > 0
    }

    fn take_pending_delivery(&mut self) -> Option<(SigDeliver, Pid)> {
        self.deferred.take()
    }
}
