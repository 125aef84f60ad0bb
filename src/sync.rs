//! # Synchronization Primitives
//!
//! Interrupt-safe critical section abstractions. All shared scheduler state
//! must be accessed within a critical section to prevent data races between
//! task code and interrupt handlers.
//!
//! On the Cortex-M4 the `critical-section` implementation comes from
//! `cortex-m` (PRIMASK save/disable/restore, single core). Host tests use the
//! `std` implementation of the same crate.

use core::cell::RefCell;

pub use critical_section::CriticalSection;

/// Shared kernel state: a `RefCell` reachable only inside a critical section.
pub type KernelCell<T> = critical_section::Mutex<RefCell<T>>;

/// Execute a closure within a critical section (interrupts disabled).
///
/// Interrupts are disabled on entry and restored to their prior state on
/// exit, so nesting is safe.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|cs| {
///     // Access shared state safely
/// });
/// ```
///
/// Keep critical sections as short as possible to minimize interrupt latency.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

/// Borrow the value in a [`KernelCell`] mutably for the duration of `f`.
///
/// A nested borrow of the same cell is a re-entrancy bug and panics.
#[inline]
pub fn with_cell<T, F, R>(cell: &KernelCell<T>, f: F) -> R
where
    F: FnOnce(&mut T) -> R,
{
    critical_section(|cs| f(&mut cell.borrow_ref_mut(cs)))
}
