//! Test harness shared by the unit tests and the end-to-end scenarios.
//!
//! On [`HostPlatform`] the context switch is a no-op, so control never
//! leaves the test thread: the scheduler's bookkeeping (current thread,
//! queues, priorities, statistics) moves exactly as it would on hardware,
//! and the test body speaks for whichever thread is current. The timer
//! device is played by [`deliver_tick`], which honors the handler's
//! yield-on-return request the way a real interrupt epilogue must.


use crate::platform::{HostPlatform, IntrGuard};
use crate::sched::{Policy, Sched};

pub(crate) type TestSched = Sched<HostPlatform>;

/// Entry stub for threads that only exist as bookkeeping.
pub(crate) fn noop_entry() {}

/// A fully booted scheduler: initial thread promoted, idle thread parked,
/// interrupts (emulated) enabled.
pub(crate) fn boot(policy: Policy) -> TestSched {
    let sched = Sched::new(policy);
    {
        let guard = IntrGuard::<HostPlatform>::new();
        sched.init(guard.token());
    }
    sched.start();
    sched
}

/// One timer interrupt, without the epilogue. Returns the handler's
/// yield request.
pub(crate) fn raw_tick(sched: &TestSched, now: i64) -> bool {
    let _guard = IntrGuard::<HostPlatform>::new();
    sched.tick(now)
}

/// One timer interrupt, epilogue included: if the handler asks for a
/// yield, the interrupted thread yields once interrupts are back on.
pub(crate) fn deliver_tick(sched: &TestSched, now: i64) {
    if raw_tick(sched, now) {
        sched.yield_now();
    }
}
