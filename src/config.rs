//! # Kestrel Configuration
//!
//! Compile-time constants governing the scheduler and system behavior.
//! All limits are fixed at compile time; there is no dynamic allocation.

/// Maximum number of tasks the system can manage simultaneously, idle task
/// included. This is also the capacity of the PID hash table, so it must be
/// a power of two.
pub const MAX_TASKS: usize = 8;

/// Largest process id handed out before the counter wraps back to
/// [`FIRST_USER_PID`].
pub const MAX_PID: u16 = 0x7fff;

/// First pid issued to a user task. Pid 0 belongs to the idle task.
pub const FIRST_USER_PID: u16 = 1;

/// Number of semaphores in the kernel pool.
pub const MAX_SEMAPHORES: usize = 16;

/// Largest value a semaphore count may reach through posting.
pub const SEM_VALUE_MAX: i16 = i16::MAX;

/// Priority of the idle task. Reserved: user tasks may not use it.
pub const IDLE_PRIORITY: u8 = 0;

/// Lowest priority a user task may run at.
pub const MIN_TASK_PRIORITY: u8 = 1;

/// Highest priority (higher number = more important).
pub const MAX_TASK_PRIORITY: u8 = u8::MAX;

/// Whether newly initialized semaphores use priority inheritance.
pub const PRIORITY_INHERITANCE: bool = true;

/// SysTick frequency in Hz. Determines scheduler tick granularity.
pub const TICK_HZ: u32 = 1000;

/// Round-robin quantum in ticks for tasks that don't set their own.
pub const DEFAULT_TIME_SLICE: u32 = 10;

/// Per-task stack size in bytes. Must be large enough for the
/// deepest call chain plus the hardware exception frame (32 bytes)
/// and the software-saved context (32 bytes for R4–R11).
pub const STACK_SIZE: usize = 1024;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

const _: () = assert!(MAX_TASKS.is_power_of_two());
const _: () = assert!(MAX_TASKS <= MAX_PID as usize);
const _: () = assert!(MAX_SEMAPHORES <= u8::MAX as usize);
const _: () = assert!(STACK_SIZE % 8 == 0);
