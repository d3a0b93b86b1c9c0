//! Hardware seam: context switching, interrupt masking and the idle halt.
//!
//! The scheduler never touches registers or an interrupt controller itself.
//! The embedding kernel supplies those operations through [`Platform`];
//! [`HostPlatform`] is a no-op implementation that lets the scheduler run
//! as a deterministic simulation on a hosted target.

use crate::thread::{ThreadId, ThreadRef};
use core::marker::PhantomData;

/// Architecture operations the scheduler depends on.
///
/// # Safety
///
/// `switch_threads` is the only suspension point in the whole scheduler;
/// implementations spill callee-saved registers and the stack pointer
/// through [`ThreadRef::stack_slot`] of `from` and reload them from `to`.
pub trait Platform {
    /// Switch execution from `from` to `to`. Returns the thread that was
    /// running just before the CPU resumed executing the caller, which is
    /// generally not `to`.
    ///
    /// # Safety
    ///
    /// Interrupts must be disabled. Both records must be live, and `to`
    /// must hold a valid saved context: either one spilled by a previous
    /// switch or the frames carved at creation.
    unsafe fn switch_threads(from: ThreadRef, to: ThreadRef) -> ThreadRef;

    /// Address the first switch into a fresh thread "returns" through.
    /// Written into the bottom frame of every new stack.
    fn switch_entry_addr() -> usize;

    /// Mask interrupts; returns whether they were enabled before.
    fn disable_interrupts() -> bool;

    /// Restore a level previously returned by [`Self::disable_interrupts`].
    fn restore_interrupts(enabled: bool);

    /// Whether interrupts are currently deliverable.
    fn interrupts_enabled() -> bool;

    /// Enable interrupts and wait for the next one, atomically with respect
    /// to delivery (`sti; hlt` on x86). The idle thread spends its life
    /// here.
    fn halt_until_interrupt();

    /// Install `next`'s address space after a switch. Kernels without user
    /// processes keep the default no-op.
    fn activate_address_space(_next: ThreadId) {}
}

#[cfg(not(any(test, feature = "std-shim")))]
mod host_state {
    use portable_atomic::{AtomicBool, Ordering};

    static ENABLED: AtomicBool = AtomicBool::new(true);

    pub(super) fn swap(value: bool) -> bool {
        ENABLED.swap(value, Ordering::AcqRel)
    }

    pub(super) fn set(value: bool) {
        ENABLED.store(value, Ordering::Release);
    }

    pub(super) fn get() -> bool {
        ENABLED.load(Ordering::Acquire)
    }
}

#[cfg(any(test, feature = "std-shim"))]
mod host_state {
    extern crate std;

    use core::cell::Cell;

    // One emulated CPU per host thread, so concurrent test threads cannot
    // see each other's interrupt level.
    std::thread_local! {
        static ENABLED: Cell<bool> = const { Cell::new(true) };
    }

    pub(super) fn swap(value: bool) -> bool {
        ENABLED.with(|e| {
            let old = e.get();
            e.set(value);
            old
        })
    }

    pub(super) fn set(value: bool) {
        ENABLED.with(|e| e.set(value));
    }

    pub(super) fn get() -> bool {
        ENABLED.with(|e| e.get())
    }
}

/// No-op platform for hosted simulation and unit tests.
///
/// The context switch does nothing, so control flow never leaves the
/// caller's stack: the scheduler's bookkeeping (current thread, queues,
/// statistics) moves exactly as it would on hardware and can be driven
/// deterministically from ordinary code. The interrupt level is an
/// emulated flag.
pub struct HostPlatform;

impl Platform for HostPlatform {
    unsafe fn switch_threads(from: ThreadRef, _to: ThreadRef) -> ThreadRef {
        from
    }

    fn switch_entry_addr() -> usize {
        0
    }

    fn disable_interrupts() -> bool {
        host_state::swap(false)
    }

    fn restore_interrupts(enabled: bool) {
        host_state::set(enabled);
    }

    fn interrupts_enabled() -> bool {
        host_state::get()
    }

    fn halt_until_interrupt() {
        host_state::set(true);
        core::hint::spin_loop();
    }
}

/// An interrupt-disabled critical section.
///
/// Masks interrupts on construction and restores the previous level on
/// drop, nesting like the classic `old_level = disable(); ...;
/// restore(old_level)` idiom. Lends [`IntrOff`] proof tokens to entry
/// points that require the caller to already be inside a critical section.
pub struct IntrGuard<P: Platform> {
    was_enabled: bool,
    // CPU-local by nature: neither Send nor Sync.
    _platform: PhantomData<*mut P>,
}

impl<P: Platform> IntrGuard<P> {
    pub fn new() -> IntrGuard<P> {
        IntrGuard {
            was_enabled: P::disable_interrupts(),
            _platform: PhantomData,
        }
    }

    /// A proof token tied to this guard's lifetime.
    pub fn token(&self) -> IntrOff<'_> {
        IntrOff(PhantomData)
    }
}

impl<P: Platform> Default for IntrGuard<P> {
    fn default() -> IntrGuard<P> {
        IntrGuard::new()
    }
}

impl<P: Platform> Drop for IntrGuard<P> {
    fn drop(&mut self) {
        P::restore_interrupts(self.was_enabled);
    }
}

/// Zero-sized proof that interrupts are disabled, borrowed from an
/// [`IntrGuard`]. Passing one by value is how mutating entry points demand
/// a critical section without trusting the caller's word.
#[derive(Clone, Copy)]
pub struct IntrOff<'a>(PhantomData<&'a ()>);

impl IntrOff<'static> {
    /// Claim an interrupt-off context that exists outside any guard, such
    /// as an interrupt handler's entry path.
    ///
    /// # Safety
    ///
    /// Interrupts must genuinely be disabled for as long as the token is
    /// alive.
    pub unsafe fn assert() -> IntrOff<'static> {
        IntrOff(PhantomData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_nest_and_restore() {
        HostPlatform::restore_interrupts(true);
        assert!(HostPlatform::interrupts_enabled());

        let outer = IntrGuard::<HostPlatform>::new();
        assert!(!HostPlatform::interrupts_enabled());
        {
            let _inner = IntrGuard::<HostPlatform>::new();
            assert!(!HostPlatform::interrupts_enabled());
        }
        // Inner guard restores the (already disabled) outer level.
        assert!(!HostPlatform::interrupts_enabled());
        drop(outer);
        assert!(HostPlatform::interrupts_enabled());
    }

    #[test]
    fn token_borrows_from_guard() {
        let guard = IntrGuard::<HostPlatform>::new();
        let token = guard.token();
        let _copy = token;
        drop(guard);
        assert!(HostPlatform::interrupts_enabled());
    }
}
