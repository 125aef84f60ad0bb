//! # Kestrel
//!
//! The scheduling and synchronization core of a small RTOS kernel for ARM
//! Cortex-M4 microcontrollers.
//!
//! ## Overview
//!
//! Kestrel allocates a single CPU by strict priority preemption, with
//! round-robin rotation among tasks of equal priority. It carries every task
//! through its block/resume lifecycle and implements counting semaphores
//! with priority inheritance, so a low-priority task holding a semaphore
//! cannot be starved by medium-priority work while a high-priority task
//! waits for it.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │   create_task · sem_wait · sem_post · signal · exit     │
//! ├──────────────┬──────────────────┬─────────────────────┤
//! │  Scheduler   │   Semaphores     │  Signals / Exit     │
//! │  scheduler.rs│   semaphore.rs   │  signal.rs exit.rs  │
//! │  ─ dispatch()│   ─ sem_wait()   │  ─ interrupt_wait() │
//! │  ─ tick()    │   ─ sem_post()   │  ─ delete_task()    │
//! ├──────────────┴──────────────────┴─────────────────────┤
//! │      Queue Manager (queue.rs) · PID Registry (pid.rs)   │
//! │   ready · pending · inactive · blocked[reason] · TCBs   │
//! ├────────────────────────────────────────────────────────┤
//! │        ContextSwitch trait (arch/mod.rs)                │
//! │   cortex_m4: PendSV · SysTick    sim: host test port    │
//! ├────────────────────────────────────────────────────────┤
//! │         ARM Cortex-M4 Hardware (Thumb-2)                │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling Model
//!
//! - The head of the ready list is always the running task.
//! - Tasks readied from interrupt handlers, or while the scheduler lock is
//!   held, wait on the pending list until the next scheduling point.
//! - A waiter of higher priority lends its priority to the semaphore's
//!   holder. The loan is returned when the holder posts.
//!
//! ## Memory Model
//!
//! - **No heap**: all state is statically allocated
//! - **Arena of TCBs** keyed by pid; lists hold pids, not pointers
//! - **Per-task stack**: `[u8; STACK_SIZE]` owned by the Cortex-M4 port
//! - **Critical sections**: `critical-section` mutex around the scheduler

#![no_std]

pub mod config;
pub mod error;
pub mod sync;
pub mod task;
pub mod pid;
pub mod queue;
pub mod arch;
pub mod scheduler;
pub mod semaphore;
pub mod signal;
pub mod exit;
pub mod kernel;
