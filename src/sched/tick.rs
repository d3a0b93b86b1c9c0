//! Per-tick bookkeeping, run in interrupt context by the timer device.

use super::{recalculate_priority, Core, Policy, Sched, TIMER_FREQ, TIME_SLICE};
use crate::fixed::Fixed;
use crate::platform::Platform;
use crate::thread::ThreadState;
use portable_atomic::Ordering;

impl<P: Platform + 'static> Sched<P> {
    /// Timer-interrupt entry point. `now` is the device's monotonic tick
    /// count; interrupts are off for the duration by the timer contract.
    /// Returns whether the interrupt epilogue must yield on behalf of the
    /// running thread.
    pub fn tick(&self, now: i64) -> bool {
        assert!(!P::interrupts_enabled(), "tick() with interrupts enabled");
        self.in_interrupt.store(true, Ordering::Release);

        let preempt = self.tick_body(now);
        let slice_used = self.thread_ticks.fetch_add(1, Ordering::AcqRel) + 1;

        self.in_interrupt.store(false, Ordering::Release);
        slice_used >= TIME_SLICE || preempt
    }

    fn tick_body(&self, now: i64) -> bool {
        let cur = self.running();
        let cur_is_idle = self.is_idle(cur);

        // Exactly one statistics bucket per tick.
        if cur_is_idle {
            self.idle_ticks.fetch_add(1, Ordering::Relaxed);
        } else if cur.record().user_space {
            self.user_ticks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.kernel_ticks.fetch_add(1, Ordering::Relaxed);
        }

        let mut preempt = false;
        let mut core = self.core.lock();

        match self.policy {
            Policy::Mlfq => {
                if !cur_is_idle {
                    let record = cur.record_mut();
                    record.recent_cpu = record.recent_cpu + 1;
                }

                if now % 4 == 0 {
                    let second_boundary = now % TIMER_FREQ == 0;
                    if second_boundary {
                        // Refresh load_avg first so the decay below uses
                        // the new value.
                        let ready_threads = core
                            .all
                            .iter()
                            .filter(|t| {
                                matches!(t.status(), ThreadState::Ready | ThreadState::Running)
                            })
                            .count() as i32;
                        core.load_avg = Fixed::from_int(59) / Fixed::from_int(60) * core.load_avg
                            + Fixed::from_int(1) / Fixed::from_int(60)
                                * Fixed::from_int(ready_threads);
                    }
                    let load_avg = core.load_avg;

                    let Core { ready, all, .. } = &mut *core;
                    for &t in all.iter() {
                        if t.status() == ThreadState::Nascent {
                            continue;
                        }
                        if second_boundary {
                            let record = t.record_mut();
                            let twice_load = load_avg * 2;
                            record.recent_cpu =
                                twice_load / (twice_load + 1) * record.recent_cpu + record.nice;
                        }

                        let old = t.priority();
                        let new = recalculate_priority(t.record());
                        t.record_mut().priority = new;

                        if t.status() == ThreadState::Ready {
                            if old != new {
                                assert!(
                                    ready.remove(t, old),
                                    "ready thread missing from its priority band"
                                );
                                ready.push(t);
                            }
                            if new > cur.priority() {
                                preempt = true;
                            }
                        }
                    }
                }
            }
            Policy::RoundRobin => {
                let total = self.total_ticks.fetch_add(1, Ordering::Relaxed) + 1;
                if total % (TIME_SLICE as u64 * 4) == 0 {
                    core.ready.age();
                }
            }
        }

        // Sleepers count down; everyone due wakes on this tick.
        let Core { ready, sleepers, .. } = &mut *core;
        sleepers.advance(|t| {
            t.record_mut().status = ThreadState::Ready;
            ready.push(t);
            if t.priority() > cur.priority() {
                preempt = true;
            }
        });

        preempt
    }
}
