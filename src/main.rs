//! # Kestrel Example Firmware
//!
//! Demonstrates priority inheritance with the classic three-task inversion
//! setup around one shared semaphore:
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | `low_task` | 2 | Holds the semaphore, wakes the other two while holding it |
//! | `medium_task` | 5 | CPU-bound burst that never touches the semaphore |
//! | `high_task` | 8 | Needs the semaphore for a short critical section |
//!
//! ## Expected Sequence
//!
//! 1. `high_task` and `medium_task` start and park in `sig_wait`.
//! 2. `low_task` takes the semaphore and signals `high_task`.
//! 3. `high_task` preempts, blocks on the semaphore, and `low_task` inherits
//!    priority 8.
//! 4. `low_task` signals `medium_task`. Without inheritance the medium burst
//!    would run now and delay `high_task` indefinitely; with it, `low_task`
//!    keeps the CPU.
//! 5. `low_task` posts, drops back to priority 2, and `high_task` runs,
//!    followed by `medium_task`.

#![cfg_attr(target_arch = "arm", no_std)]
#![cfg_attr(target_arch = "arm", no_main)]

#[cfg(target_arch = "arm")]
mod firmware {
    use core::sync::atomic::{AtomicU16, Ordering};

    use cortex_m_rt::entry;
    use panic_halt as _;

    use kestrel::kernel;
    use kestrel::semaphore::SemId;
    use kestrel::task::Pid;

    static HIGH_PID: AtomicU16 = AtomicU16::new(0);
    static MEDIUM_PID: AtomicU16 = AtomicU16::new(0);

    fn burn(iterations: u32) {
        let mut acc: u32 = 0;
        for i in 0..iterations {
            acc = acc.wrapping_add(i);
        }
        core::hint::black_box(acc);
    }

    /// **Low-priority holder** (priority 2)
    ///
    /// Takes the semaphore, then wakes the high and medium tasks while still
    /// holding it. Loops forever.
    extern "C" fn low_task(arg: usize) {
        let sem = SemId::from_raw(arg);
        loop {
            if kernel::sem_wait(sem).is_err() {
                continue;
            }
            let _ = kernel::signal(Pid::new(HIGH_PID.load(Ordering::Relaxed)), None);
            // Boosted to the high task's priority from here until the post.
            let _ = kernel::signal(Pid::new(MEDIUM_PID.load(Ordering::Relaxed)), None);
            burn(10_000);
            let _ = kernel::sem_post(sem);
            kernel::yield_task();
        }
    }

    /// **Medium-priority hog** (priority 5)
    ///
    /// A CPU-bound burst each time it is signalled.
    extern "C" fn medium_task(_: usize) {
        loop {
            let _ = kernel::sig_wait();
            burn(100_000);
        }
    }

    /// **High-priority client** (priority 8)
    ///
    /// Needs the semaphore briefly each time it is signalled.
    extern "C" fn high_task(arg: usize) {
        let sem = SemId::from_raw(arg);
        loop {
            let _ = kernel::sig_wait();
            if kernel::sem_wait(sem).is_ok() {
                burn(1_000);
                let _ = kernel::sem_post(sem);
            }
        }
    }

    /// Firmware entry point. Initializes the kernel, creates tasks, and
    /// starts the scheduler. Does not return.
    #[entry]
    fn main() -> ! {
        let cp = cortex_m::Peripherals::take().expect("core peripherals already taken");

        kernel::init();

        let sem = kernel::sem_init(1).expect("semaphore pool exhausted");

        let high = kernel::create_task(8, high_task, sem.into_raw())
            .expect("Failed to create high_task");
        HIGH_PID.store(high.as_u16(), Ordering::Relaxed);

        let medium = kernel::create_task(5, medium_task, 0).expect("Failed to create medium_task");
        MEDIUM_PID.store(medium.as_u16(), Ordering::Relaxed);

        kernel::create_task(2, low_task, sem.into_raw()).expect("Failed to create low_task");

        // Start the scheduler; does not return
        kernel::start(cp)
    }
}

#[cfg(not(target_arch = "arm"))]
fn main() {
    println!("kestrel: firmware image targets thumbv7em-none-eabi; the host build only runs the unit tests");
}
