//! The two ready-structure representations.

use super::Policy;
use crate::thread::{ThreadRef, PRI_MAX, PRI_MIN};

extern crate alloc;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// One FIFO band per priority level under MLFQ.
const BANDS: usize = (PRI_MAX + 1) as usize;

/// Threads waiting for the CPU.
///
/// Round-robin keeps a single unordered list and scans for the maximum on
/// selection, which tolerates in-place priority changes (aging, donation)
/// without relocating entries. MLFQ keeps 64 FIFO bands indexed by
/// priority: selection is a walk from the top band, but recomputation must
/// relocate any thread whose band changed.
pub(crate) enum ReadyQueue {
    List(Vec<ThreadRef>),
    Bands([VecDeque<ThreadRef>; BANDS]),
}

impl ReadyQueue {
    pub(crate) fn new(policy: Policy) -> ReadyQueue {
        match policy {
            Policy::RoundRobin => ReadyQueue::List(Vec::new()),
            Policy::Mlfq => ReadyQueue::Bands(core::array::from_fn(|_| VecDeque::new())),
        }
    }

    fn band_of(priority: i32) -> usize {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "priority {} out of range",
            priority
        );
        priority as usize
    }

    /// Append `t`, filed under its current priority in band form.
    pub(crate) fn push(&mut self, t: ThreadRef) {
        match self {
            ReadyQueue::List(list) => list.push(t),
            ReadyQueue::Bands(bands) => bands[Self::band_of(t.priority())].push_back(t),
        }
    }

    /// Remove and return the best thread: highest priority, earliest entry
    /// on a tie.
    pub(crate) fn pop_highest(&mut self) -> Option<ThreadRef> {
        match self {
            ReadyQueue::List(list) => {
                if list.is_empty() {
                    return None;
                }
                let mut best = 0;
                for (i, t) in list.iter().enumerate() {
                    if t.priority() > list[best].priority() {
                        best = i;
                    }
                }
                Some(list.remove(best))
            }
            ReadyQueue::Bands(bands) => {
                for band in bands.iter_mut().rev() {
                    if let Some(t) = band.pop_front() {
                        return Some(t);
                    }
                }
                None
            }
        }
    }

    /// Unhook `t`; `filed_priority` names the band it was filed under.
    /// Returns whether it was present.
    pub(crate) fn remove(&mut self, t: ThreadRef, filed_priority: i32) -> bool {
        match self {
            ReadyQueue::List(list) => match list.iter().position(|&x| x == t) {
                Some(i) => {
                    list.remove(i);
                    true
                }
                None => false,
            },
            ReadyQueue::Bands(bands) => {
                let band = &mut bands[Self::band_of(filed_priority)];
                match band.iter().position(|&x| x == t) {
                    Some(i) => {
                        band.remove(i);
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Whether some waiting thread's priority strictly exceeds `priority`.
    pub(crate) fn has_higher_than(&self, priority: i32) -> bool {
        match self {
            ReadyQueue::List(list) => list.iter().any(|t| t.priority() > priority),
            ReadyQueue::Bands(bands) => bands[(priority as usize + 1).min(BANDS)..]
                .iter()
                .any(|band| !band.is_empty()),
        }
    }

    /// Round-robin aging: every waiting thread moves one step toward
    /// PRI_MAX. Bands never age.
    pub(crate) fn age(&mut self) {
        if let ReadyQueue::List(list) = self {
            for t in list.iter() {
                let record = t.record_mut();
                if record.priority < PRI_MAX {
                    record.priority += 1;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        match self {
            ReadyQueue::List(list) => list.len(),
            ReadyQueue::Bands(bands) => bands.iter().map(VecDeque::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::test_record;

    #[test]
    fn list_selects_the_maximum() {
        let mut queue = ReadyQueue::new(Policy::RoundRobin);
        let low = test_record("low", 10);
        let high = test_record("high", 50);
        let mid = test_record("mid", 30);
        queue.push(low);
        queue.push(high);
        queue.push(mid);

        assert_eq!(queue.pop_highest(), Some(high));
        assert_eq!(queue.pop_highest(), Some(mid));
        assert_eq!(queue.pop_highest(), Some(low));
        assert_eq!(queue.pop_highest(), None);
    }

    #[test]
    fn list_breaks_ties_by_insertion_order() {
        let mut queue = ReadyQueue::new(Policy::RoundRobin);
        let first = test_record("first", 31);
        let second = test_record("second", 31);
        queue.push(first);
        queue.push(second);
        assert_eq!(queue.pop_highest(), Some(first));
        assert_eq!(queue.pop_highest(), Some(second));
    }

    #[test]
    fn bands_are_fifo_and_top_down() {
        let mut queue = ReadyQueue::new(Policy::Mlfq);
        let a = test_record("a", 40);
        let b = test_record("b", 40);
        let top = test_record("top", 63);
        queue.push(a);
        queue.push(b);
        queue.push(top);

        assert_eq!(queue.pop_highest(), Some(top));
        assert_eq!(queue.pop_highest(), Some(a));
        assert_eq!(queue.pop_highest(), Some(b));
    }

    #[test]
    fn relocation_moves_a_thread_between_bands() {
        let mut queue = ReadyQueue::new(Policy::Mlfq);
        let t = test_record("mover", 20);
        queue.push(t);

        t.record_mut().priority = 45;
        assert!(queue.remove(t, 20));
        queue.push(t);

        assert!(queue.has_higher_than(44));
        assert_eq!(queue.pop_highest(), Some(t));
    }

    #[test]
    fn remove_reports_absence() {
        let mut queue = ReadyQueue::new(Policy::RoundRobin);
        let t = test_record("ghost", 31);
        assert!(!queue.remove(t, 31));
    }

    #[test]
    fn higher_than_probe() {
        let mut rr = ReadyQueue::new(Policy::RoundRobin);
        rr.push(test_record("x", 31));
        assert!(rr.has_higher_than(30));
        assert!(!rr.has_higher_than(31));

        let mut mlfq = ReadyQueue::new(Policy::Mlfq);
        mlfq.push(test_record("y", 63));
        assert!(mlfq.has_higher_than(62));
        assert!(!mlfq.has_higher_than(63));
    }

    #[test]
    fn aging_caps_at_the_maximum() {
        let mut queue = ReadyQueue::new(Policy::RoundRobin);
        let near_top = test_record("near", PRI_MAX - 1);
        let capped = test_record("cap", PRI_MAX);
        queue.push(near_top);
        queue.push(capped);

        queue.age();
        queue.age();
        assert_eq!(near_top.priority(), PRI_MAX);
        assert_eq!(capped.priority(), PRI_MAX);
    }
}
