//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements context switching via PendSV, SysTick timer configuration,
//! and interrupt-context detection.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): Used by tasks in Thread mode
//!
//! On exception entry, the hardware automatically stacks R0–R3, R12, LR, PC,
//! and xPSR onto the process stack. The PendSV handler saves and restores
//! R4–R11, which completes the full context save/restore.
//!
//! The scheduler only *requests* a switch: `save_and_suspend` remembers where
//! the outgoing PSP must be stored and `resume` remembers where the incoming
//! PSP comes from, then PendSV is pended. PendSV fires as soon as the
//! requesting critical section ends (or on return from the last nested
//! interrupt), so no other task code can run in between.
//!
//! Tasks must not use the FPU: exception frames are assumed to be the basic
//! 8-word frame (build for `thumbv7em-none-eabi`).
//!
//! ## Interrupt Priorities
//!
//! - SysTick: Priority 0xFF (lowest), can be preempted
//! - PendSV: Priority 0xFF (lowest), runs only when no other ISR is active

use core::ptr;

use cortex_m::peripheral::scb::VectActive;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SCB;

use super::ContextSwitch;
use crate::config::{MAX_TASKS, STACK_SIZE, SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::error::{fatal, FatalError};
use crate::signal::SigDeliver;
use crate::task::{Pid, TaskEntry};

/// Words in a saved context: R4–R11 plus the hardware frame.
const SAVED_FRAME_WORDS: usize = 16;

/// Thumb state bit in xPSR.
const XPSR_THUMB: u32 = 0x0100_0000;

// ---------------------------------------------------------------------------
// Task stacks and saved context
// ---------------------------------------------------------------------------

/// Per-task stack memory. Aligned to 8 bytes as required by ARM AAPCS.
#[repr(C, align(8))]
struct TaskStack([u8; STACK_SIZE]);

impl TaskStack {
    const fn new() -> Self {
        TaskStack([0; STACK_SIZE])
    }

    fn bounds(&self) -> (usize, usize) {
        let base = self.0.as_ptr() as usize;
        (base, base + STACK_SIZE)
    }
}

/// Saved stack pointer (PSP) of one task. Points into the task's stack slot.
pub struct CortexContext {
    pid: Pid,
    sp: *mut u32,
}

// Safety: `sp` always points into the owning task's stack slot, and contexts
// are only touched inside critical sections.
unsafe impl Send for CortexContext {}

/// The Cortex-M4 port. Owns one stack per PID-registry slot.
pub struct CortexM4 {
    stacks: [TaskStack; MAX_TASKS],
    /// Where PendSV stores the outgoing PSP. Null when nothing is saved
    /// (first launch, or the outgoing task was torn down).
    save_to: *mut *mut u32,
    save_pid: Pid,
    /// Where PendSV loads the incoming PSP from.
    restore_from: *const *mut u32,
    restore_pid: Pid,
    delivery: Option<(SigDeliver, Pid)>,
}

// Safety: the raw pointers reference TCB slots of the static scheduler and
// are only dereferenced inside critical sections.
unsafe impl Send for CortexM4 {}

impl CortexM4 {
    pub const fn new() -> Self {
        Self {
            stacks: [const { TaskStack::new() }; MAX_TASKS],
            save_to: ptr::null_mut(),
            save_pid: Pid::IDLE,
            restore_from: ptr::null(),
            restore_pid: Pid::IDLE,
            delivery: None,
        }
    }

    /// Finish a requested switch. Called from PendSV with the outgoing PSP
    /// (R4–R11 already pushed); returns the PSP to restore.
    pub fn complete_switch(&mut self, psp: *mut u32) -> *mut u32 {
        if !self.save_to.is_null() {
            // Safety: `save_to` points at a live TCB's context (cleared on release).
            unsafe { *self.save_to = psp };
        }
        self.save_to = ptr::null_mut();

        if self.restore_from.is_null() {
            return psp;
        }
        // Safety: `restore_from` points at a live TCB's context (cleared on release).
        let sp = unsafe { *self.restore_from };
        self.restore_from = ptr::null();

        let (base, top) = self.stacks[self.restore_pid.slot()].bounds();
        let addr = sp as usize;
        if addr < base || addr + SAVED_FRAME_WORDS * 4 > top || addr % 4 != 0 {
            fatal(FatalError::CorruptContext(self.restore_pid));
        }
        sp
    }
}

impl ContextSwitch for CortexM4 {
    type Context = CortexContext;

    fn initial_state(&mut self, pid: Pid, entry: TaskEntry, arg: usize) -> CortexContext {
        let sp = init_task_stack(&mut self.stacks[pid.slot()], entry, arg);
        CortexContext { pid, sp }
    }

    fn save_and_suspend(&mut self, ctx: &mut CortexContext) {
        // If a switch is already pending, the task on the CPU is still the
        // one recorded first; later requests only move the restore target.
        if self.save_to.is_null() {
            self.save_to = &mut ctx.sp;
            self.save_pid = ctx.pid;
        }
    }

    fn resume(&mut self, ctx: &mut CortexContext, deliver: Option<SigDeliver>) {
        self.restore_from = &ctx.sp;
        self.restore_pid = ctx.pid;
        self.delivery = deliver.map(|d| (d, ctx.pid));
        trigger_pendsv();
    }

    fn release(&mut self, ctx: CortexContext) {
        if !self.save_to.is_null() && self.save_pid == ctx.pid {
            self.save_to = ptr::null_mut();
        }
        if !self.restore_from.is_null() && self.restore_pid == ctx.pid {
            self.restore_from = ptr::null();
            self.delivery = None;
        }
    }

    fn in_interrupt(&self) -> bool {
        SCB::vect_active() != VectActive::ThreadMode
    }

    fn request_reschedule(&mut self) {
        trigger_pendsv();
    }

    /// Until PendSV runs, the delivery slot still belongs to whichever task
    /// was last passed to `resume`.
    fn take_pending_delivery(&mut self) -> Option<(SigDeliver, Pid)> {
        self.delivery.take()
    }
}

// ---------------------------------------------------------------------------
// Stack initialization
// ---------------------------------------------------------------------------

/// Initialize a task's stack frame for first-time context switch.
///
/// The first PendSV "return" into the task pops this frame and starts
/// executing `entry(arg)`.
///
/// ```text
/// [Hardware stacked frame]
///   xPSR  (Thumb bit set)
///   PC    (task entry point)
///   LR    (task_return)
///   R12   (0)
///   R3    (0)
///   R2    (0)
///   R1    (0)
///   R0    (arg)
/// [Software saved context]
///   R11 … R4 (0)             <- returned stack pointer
/// ```
fn init_task_stack(stack: &mut TaskStack, entry: TaskEntry, arg: usize) -> *mut u32 {
    let stack_top = stack.0.as_mut_ptr() as usize + STACK_SIZE;
    let aligned_top = stack_top & !0x07;
    let frame_ptr = (aligned_top - SAVED_FRAME_WORDS * 4) as *mut u32;

    unsafe {
        for i in 0..8 {
            *frame_ptr.add(i) = 0; // R4–R11
        }
        *frame_ptr.add(8) = arg as u32; // R0
        *frame_ptr.add(9) = 0; // R1
        *frame_ptr.add(10) = 0; // R2
        *frame_ptr.add(11) = 0; // R3
        *frame_ptr.add(12) = 0; // R12
        *frame_ptr.add(13) = task_return as usize as u32; // LR
        *frame_ptr.add(14) = entry as usize as u32 & !1; // PC
        *frame_ptr.add(15) = XPSR_THUMB;
    }

    frame_ptr
}

/// Return address of every task entry: a task that returns exits.
extern "C" fn task_return() -> ! {
    crate::kernel::exit()
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer for the scheduler tick.
///
/// Sets up SysTick to fire at `TICK_HZ` frequency using the processor
/// clock. Each tick drives round-robin rotation in `Scheduler::tick()`.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Trigger a PendSV exception to perform a context switch.
///
/// Sets the PENDSVSET bit in the Interrupt Control and State Register (ICSR).
#[inline]
pub fn trigger_pendsv() {
    // ICSR address: 0xE000_ED04, PENDSVSET = bit 28
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Set PendSV and SysTick to the lowest interrupt priority.
///
/// Context switches (PendSV) then never preempt application-level ISRs.
pub fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
        // Bits [23:16] = PendSV priority
        // Bits [31:24] = SysTick priority
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        let val = val | (0xFF << 16) | (0xFF << 24);
        core::ptr::write_volatile(shpr3, val);
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Scratch process stack for the very first PendSV, which pushes R4–R11 of
/// the boot context before loading the first task.
static mut LAUNCH_SCRATCH: [u32; 16] = [0; 16];

/// Hand the CPU to the first task. The scheduler must already have
/// requested the switch (`Scheduler::start`). PSP is set up before
/// interrupts are unmasked, so the pending PendSV finds a valid frame.
/// Never returns: the boot context on MSP is abandoned.
///
/// # Safety
/// Must only be called once, from Thread mode, with PendSV and SysTick
/// priorities configured and interrupts still masked since before the
/// first dispatch.
pub unsafe fn launch() -> ! {
    let scratch = core::ptr::addr_of_mut!(LAUNCH_SCRATCH) as *mut u32;
    cortex_m::register::psp::write(scratch.add(16) as u32);
    trigger_pendsv();
    cortex_m::interrupt::enable();
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

// PendSV exception handler. Performs the actual context switch.
//
// 1. Push R4–R11 onto the current task's stack (PSP)
// 2. Let the kernel store that PSP, pick the next task, and return its PSP
// 3. Pop R4–R11 from the new task's stack and set PSP
// 4. Return to Thread mode on PSP (EXC_RETURN = 0xFFFFFFFD)
core::arch::global_asm!(
    ".section .text.PendSV, \"ax\", %progbits",
    ".global PendSV",
    ".type PendSV, %function",
    ".thumb_func",
    "PendSV:",
    "    mrs r0, psp",
    "    stmdb r0!, {{r4-r11}}",
    "    bl kestrel_pendsv_switch",
    "    ldmia r0!, {{r4-r11}}",
    "    msr psp, r0",
    "    ldr r0, =0xFFFFFFFD",
    "    bx r0",
    "    .ltorg",
    ".size PendSV, . - PendSV",
);

/// Rust half of PendSV.
///
/// # Safety
/// Called only from the PendSV assembly above.
#[no_mangle]
unsafe extern "C" fn kestrel_pendsv_switch(psp: *mut u32) -> *mut u32 {
    crate::kernel::service_context_switch(psp)
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler: scheduler tick entry point.
#[no_mangle]
pub extern "C" fn SysTick() {
    crate::kernel::tick();
}
