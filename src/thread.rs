//! Thread records and handles.
//!
//! A thread's record lives at the base of its stack page; the kernel stack
//! grows down from the top of the same page toward it. The record's final
//! field is a magic canary, so the first thing a runaway stack destroys is
//! the value the scheduler checks on every current-thread lookup.

use crate::fixed::Fixed;
use crate::mem::PGSIZE;
use core::fmt;
use core::mem::size_of;
use core::ptr::NonNull;

/// Lowest priority.
pub const PRI_MIN: i32 = 0;
/// Highest priority.
pub const PRI_MAX: i32 = 63;
/// Priority of the initial thread and a sensible default for new ones.
pub const PRI_DEFAULT: i32 = 31;

/// Friendliest nice value (scheduled most aggressively).
pub const NICE_MIN: i32 = -20;
/// Meanest nice value.
pub const NICE_MAX: i32 = 20;

/// Longest thread name, in bytes.
pub const NAME_MAX: usize = 16;

/// Bounded thread name; longer names are silently truncated.
pub type Name = heapless::String<NAME_MAX>;

/// Most locks that can donate priority to one thread at a time.
pub(crate) const MAX_DONORS: usize = 16;

pub(crate) const THREAD_MAGIC: u32 = 0x1d97_c25f;

/// Thread identifier. Positive; unique until the counter wraps past
/// `i32::MAX`, after which allocation restarts at 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(i32);

impl ThreadId {
    pub(crate) const fn new(raw: i32) -> ThreadId {
        ThreadId(raw)
    }

    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle of a lock owned by the external synchronization layer.
/// The scheduler stores these for donation bookkeeping but never looks
/// inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockId(pub usize);

/// Scheduling state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Initialized but never yet made ready.
    Nascent,
    /// In the ready structure, waiting for the CPU.
    Ready,
    /// Owning the CPU. Exactly one thread at a time.
    Running,
    /// Off the run queues: sleeping out a countdown or waiting on a lock.
    Blocked,
    /// Exited; the page is reclaimed by the successor.
    Dying,
}

/// Per-thread bookkeeping, written at the base of the thread's stack page.
///
/// Some fields matter to only one discipline: `nice` and `recent_cpu`
/// drive MLFQ recomputation and are dead weight under round-robin, while
/// `priority_orig` and the donation fields only change under round-robin.
#[repr(C)]
pub(crate) struct ThreadRecord {
    pub(crate) tid: ThreadId,
    pub(crate) status: ThreadState,
    pub(crate) name: Name,
    /// Saved top of stack. The switch primitive spills registers through
    /// this slot; frame carving at creation pushes it downward.
    pub(crate) stack: *mut u8,
    /// Effective priority, possibly donated.
    pub(crate) priority: i32,
    /// The priority this thread would hold absent donation.
    pub(crate) priority_orig: i32,
    pub(crate) nice: i32,
    pub(crate) recent_cpu: Fixed,
    /// Remaining countdown while on the sleep queue.
    pub(crate) ticks_wait: i64,
    pub(crate) donor_locks: heapless::Vec<LockId, MAX_DONORS>,
    pub(crate) waiting_on: Option<LockId>,
    pub(crate) parent: Option<ThreadId>,
    pub(crate) user_space: bool,
    /// Stack-overflow canary; must stay the record's last field.
    pub(crate) magic: u32,
}

/// Non-owning handle to a thread record.
///
/// Handles are freely copied into the scheduler's lists. Validity rests on
/// the single-CPU, interrupts-off discipline: a record is only retired
/// from `schedule_tail`, after every list has dropped its handles, so a
/// handle reachable from scheduler state always points at a live record.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ThreadRef(NonNull<ThreadRecord>);

unsafe impl Send for ThreadRef {}
unsafe impl Sync for ThreadRef {}

impl ThreadRef {
    /// Wrap the record at the base of `page`.
    pub(crate) fn from_page(page: NonNull<u8>) -> ThreadRef {
        ThreadRef(page.cast())
    }

    /// Rewrap a raw record pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null and point at a live record.
    pub(crate) unsafe fn from_raw(ptr: *mut ThreadRecord) -> ThreadRef {
        ThreadRef(unsafe { NonNull::new_unchecked(ptr) })
    }

    pub(crate) fn as_ptr(self) -> *mut ThreadRecord {
        self.0.as_ptr()
    }

    /// The page this record sits at the base of.
    pub(crate) fn page(self) -> NonNull<u8> {
        self.0.cast()
    }

    pub(crate) fn record(&self) -> &ThreadRecord {
        unsafe { self.0.as_ref() }
    }

    /// Mutable access to the record. Sound under the scheduler's critical
    /// section discipline: one CPU, interrupts off, and no reference held
    /// across a context switch.
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn record_mut(&self) -> &mut ThreadRecord {
        unsafe { &mut *self.0.as_ptr() }
    }

    /// Address of the saved-stack-pointer slot, for the switch primitive's
    /// register spill and reload.
    pub fn stack_slot(&self) -> *mut *mut u8 {
        unsafe { core::ptr::addr_of_mut!((*self.0.as_ptr()).stack) }
    }

    /// Whether the record still carries its canary.
    pub fn is_valid(&self) -> bool {
        self.record().magic == THREAD_MAGIC
    }

    pub fn id(&self) -> ThreadId {
        self.record().tid
    }

    pub fn name(&self) -> Name {
        self.record().name.clone()
    }

    pub fn status(&self) -> ThreadState {
        self.record().status
    }

    /// Effective priority (donations included).
    pub fn priority(&self) -> i32 {
        self.record().priority
    }

    /// Priority absent any donation.
    pub fn base_priority(&self) -> i32 {
        self.record().priority_orig
    }

    pub fn nice(&self) -> i32 {
        self.record().nice
    }

    pub fn recent_cpu(&self) -> Fixed {
        self.record().recent_cpu
    }

    pub fn parent(&self) -> Option<ThreadId> {
        self.record().parent
    }

    /// The lock this thread is blocked acquiring, if any.
    pub fn waiting_on(&self) -> Option<LockId> {
        self.record().waiting_on
    }

    /// Locks currently donating priority to this thread.
    pub fn donor_count(&self) -> usize {
        self.record().donor_locks.len()
    }
}

/// Write a fresh Nascent record onto `page`. `inherit` carries the
/// creator's `nice` and `recent_cpu`; the initial thread passes `None` and
/// starts from zero.
pub(crate) fn init_record(
    page: NonNull<u8>,
    name: &str,
    priority: i32,
    parent: Option<ThreadId>,
    inherit: Option<(i32, Fixed)>,
) -> ThreadRef {
    assert!(
        (PRI_MIN..=PRI_MAX).contains(&priority),
        "priority {} out of range",
        priority
    );

    let (nice, recent_cpu) = inherit.unwrap_or((0, Fixed::ZERO));

    let mut bounded = Name::new();
    for c in name.chars() {
        if bounded.push(c).is_err() {
            break;
        }
    }

    let record = ThreadRecord {
        tid: ThreadId(0),
        status: ThreadState::Nascent,
        name: bounded,
        stack: unsafe { page.as_ptr().add(PGSIZE) },
        priority,
        priority_orig: priority,
        nice,
        recent_cpu,
        ticks_wait: 0,
        donor_locks: heapless::Vec::new(),
        waiting_on: None,
        parent,
        user_space: false,
        magic: THREAD_MAGIC,
    };
    unsafe { core::ptr::write(page.cast::<ThreadRecord>().as_ptr(), record) };
    ThreadRef::from_page(page)
}

/// Signature of a kernel thread's entry function.
pub type ThreadFunc = fn(*mut u8);

/// Frame consumed by the `kernel_thread` trampoline: a fake return address
/// followed by the entry function and its argument, which is what the
/// switch entry thunk leaves on the stack.
#[repr(C)]
pub(crate) struct KernelThreadFrame {
    pub(crate) ret: usize,
    pub(crate) function: ThreadFunc,
    pub(crate) aux: *mut u8,
}

/// Frame the first switch returns through on its way into the trampoline.
#[repr(C)]
pub(crate) struct EntryFrame {
    pub(crate) ret: usize,
}

/// Callee-saved register image the switch primitive pops for a thread that
/// has never run.
#[repr(C)]
pub(crate) struct SwitchFrame {
    pub(crate) regs: [usize; 4],
    pub(crate) ret: usize,
}

/// Carve a `size`-byte frame below `t`'s current stack top and return its
/// base.
pub(crate) fn alloc_frame(t: ThreadRef, size: usize) -> *mut u8 {
    assert!(t.is_valid(), "frame carving on a corrupt record");
    assert!(size % size_of::<usize>() == 0);
    let record = t.record_mut();
    record.stack = unsafe { record.stack.sub(size) };
    record.stack
}

/// A standalone Ready record for queue tests; leaks its page.
#[cfg(test)]
pub(crate) fn test_record(name: &str, priority: i32) -> ThreadRef {
    use crate::mem::PagePool;

    let pool = PagePool::new();
    let page = pool.alloc_zeroed().expect("test page");
    core::mem::forget(pool);
    let t = init_record(page, name, priority, None, None);
    t.record_mut().status = ThreadState::Ready;
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::PagePool;

    #[test]
    fn fresh_records_start_nascent() {
        let t = test_record("worker", PRI_DEFAULT);
        // test_record flips to Ready; undo to inspect the raw init state.
        t.record_mut().status = ThreadState::Nascent;

        assert!(t.is_valid());
        assert_eq!(t.status(), ThreadState::Nascent);
        assert_eq!(t.priority(), PRI_DEFAULT);
        assert_eq!(t.base_priority(), PRI_DEFAULT);
        assert_eq!(t.nice(), 0);
        assert_eq!(t.recent_cpu(), Fixed::ZERO);
        assert_eq!(t.donor_count(), 0);
        assert_eq!(t.waiting_on(), None);
        assert_eq!(t.name().as_str(), "worker");
    }

    #[test]
    fn names_are_truncated_to_the_bound() {
        let t = test_record("a-name-well-beyond-sixteen-bytes", PRI_DEFAULT);
        assert_eq!(t.name().as_str(), "a-name-well-beyo");
        assert_eq!(t.name().len(), NAME_MAX);
    }

    #[test]
    fn stack_starts_one_page_above_the_record() {
        let pool = PagePool::new();
        let page = pool.alloc_zeroed().unwrap();
        let t = init_record(page, "s", PRI_DEFAULT, None, None);
        assert_eq!(t.record().stack as usize, page.as_ptr() as usize + PGSIZE);
        core::mem::forget(pool);
    }

    #[test]
    fn frames_descend_from_the_stack_top() {
        let t = test_record("frames", PRI_DEFAULT);
        let top = t.record().stack;
        let kf = alloc_frame(t, size_of::<KernelThreadFrame>());
        let ef = alloc_frame(t, size_of::<EntryFrame>());
        let sf = alloc_frame(t, size_of::<SwitchFrame>());
        assert_eq!(kf as usize, top as usize - size_of::<KernelThreadFrame>());
        assert!(ef < kf);
        assert!(sf < ef);
        assert_eq!(t.record().stack, sf);
    }

    #[test]
    fn inheritance_copies_the_creator_mlfq_state() {
        let pool = PagePool::new();
        let page = pool.alloc_zeroed().unwrap();
        let t = init_record(
            page,
            "child",
            PRI_DEFAULT,
            Some(ThreadId::new(7)),
            Some((5, Fixed::from_int(12))),
        );
        assert_eq!(t.nice(), 5);
        assert_eq!(t.recent_cpu(), Fixed::from_int(12));
        assert_eq!(t.parent(), Some(ThreadId::new(7)));
        core::mem::forget(pool);
    }

    #[test]
    fn canary_detects_corruption() {
        let t = test_record("canary", PRI_DEFAULT);
        assert!(t.is_valid());
        t.record_mut().magic = 0;
        assert!(!t.is_valid());
    }
}
