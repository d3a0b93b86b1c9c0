//! Tick-countdown sleep queue.

use crate::thread::ThreadRef;

extern crate alloc;
use alloc::vec::Vec;

/// Unordered list of Blocked threads counting down to a wakeup.
///
/// Entries always carry a positive countdown; the per-tick scan touches
/// every sleeper, so the cost of a tick grows with the number of sleepers.
pub(crate) struct SleepQueue(Vec<ThreadRef>);

impl SleepQueue {
    pub(crate) const fn new() -> SleepQueue {
        SleepQueue(Vec::new())
    }

    pub(crate) fn push(&mut self, t: ThreadRef) {
        debug_assert!(t.record().ticks_wait > 0);
        self.0.push(t);
    }

    /// One timer tick: decrement every countdown and hand each expired
    /// sleeper to `wake`. All sleepers due on the same tick wake on that
    /// tick.
    pub(crate) fn advance(&mut self, mut wake: impl FnMut(ThreadRef)) {
        let mut i = 0;
        while i < self.0.len() {
            let t = self.0[i];
            let record = t.record_mut();
            record.ticks_wait -= 1;
            if record.ticks_wait == 0 {
                self.0.swap_remove(i);
                wake(t);
            } else {
                i += 1;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{test_record, ThreadState, PRI_DEFAULT};
    use alloc::vec::Vec;

    fn sleeper(name: &str, ticks: i64) -> ThreadRef {
        let t = test_record(name, PRI_DEFAULT);
        let record = t.record_mut();
        record.status = ThreadState::Blocked;
        record.ticks_wait = ticks;
        t
    }

    #[test]
    fn countdowns_expire_on_schedule() {
        let mut queue = SleepQueue::new();
        queue.push(sleeper("two", 2));

        let mut woken = Vec::new();
        queue.advance(|t| woken.push(t));
        assert!(woken.is_empty());
        assert_eq!(queue.len(), 1);

        queue.advance(|t| woken.push(t));
        assert_eq!(woken.len(), 1);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn simultaneous_expiries_all_wake_in_one_tick() {
        let mut queue = SleepQueue::new();
        queue.push(sleeper("a", 1));
        queue.push(sleeper("b", 3));
        queue.push(sleeper("c", 1));
        queue.push(sleeper("d", 1));

        let mut woken = Vec::new();
        queue.advance(|t| woken.push(t));
        assert_eq!(woken.len(), 3);
        assert_eq!(queue.len(), 1);
        assert!(woken.iter().all(|t| t.record().ticks_wait == 0));
    }
}
