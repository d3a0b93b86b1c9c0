#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![forbid(unreachable_pub)]

//! Preemptive thread scheduling for a small single-CPU kernel.
//!
//! One [`Sched`] value owns every piece of global scheduling state. Two
//! disciplines are available, chosen at boot and fixed for the kernel's
//! lifetime:
//!
//! - **Round-robin**: a single priority-searched ready list, 16-tick
//!   priority aging for waiting threads, and priority donation through the
//!   external lock layer.
//! - **MLFQ**: 64 FIFO priority bands recomputed every fourth tick from
//!   `nice`, `recent_cpu` and the system load average.
//!
//! The hardware seams — register save/restore, interrupt masking, the idle
//! halt — are supplied by the embedding kernel through [`Platform`]. The
//! timer device drives preemption by calling [`Sched::tick`] on every tick
//! and yielding from its epilogue when asked to.
//!
//! # Quick start
//!
//! ```ignore
//! use feedback_sched::{IntrGuard, Policy, Sched};
//! use spin::Lazy;
//!
//! static SCHED: Lazy<Sched<BoardPlatform>> =
//!     Lazy::new(|| Sched::new(Policy::RoundRobin));
//!
//! fn kernel_main() -> ! {
//!     let boot = IntrGuard::<BoardPlatform>::new();
//!     SCHED.init(boot.token());
//!     unsafe { SCHED.register_global() };
//!     drop(boot);
//!
//!     SCHED.spawn("logger", 40, || loop { /* drain the log ring */ })
//!         .expect("logger thread");
//!     SCHED.start();
//!
//!     loop {
//!         BoardPlatform::halt_until_interrupt();
//!     }
//! }
//! ```

pub mod errors;
pub mod fixed;
pub mod mem;
pub mod platform;
pub mod sched;
pub mod thread;

#[cfg(test)]
extern crate std;

extern crate alloc;

#[cfg(test)]
mod tests;

// Panic handler for bare-metal builds; hosted builds get one from std.
#[cfg(all(not(test), not(feature = "std-shim")))]
use core::panic::PanicInfo;

#[cfg(all(not(test), not(feature = "std-shim")))]
#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

// ============================================================================
// Public API
// ============================================================================

pub use errors::{SchedResult, SpawnError};
pub use fixed::Fixed;
pub use mem::{PagePool, PGSIZE};
pub use platform::{HostPlatform, IntrGuard, IntrOff, Platform};
pub use sched::{Policy, Sched, Stats, TIMER_FREQ, TIME_SLICE};
pub use thread::{
    LockId, Name, ThreadFunc, ThreadId, ThreadRef, ThreadState, NAME_MAX, NICE_MAX, NICE_MIN,
    PRI_DEFAULT, PRI_MAX, PRI_MIN,
};
