//! Scheduler core: thread lifecycle, run queues and the public API.
//!
//! All global scheduling state lives in one [`Sched`] value. Mutations run
//! inside interrupt-disabled critical sections — either one the operation
//! opens itself or one the caller proves with an [`IntrOff`] token — so the
//! inner spin lock is uncontended by construction and exists to keep the
//! container honest. The lock is never held across a context switch.

pub(crate) mod ready;
pub(crate) mod sleep;
mod tick;

use crate::errors::SpawnError;
use crate::fixed::Fixed;
use crate::mem::PagePool;
use crate::platform::{IntrGuard, IntrOff, Platform};
use crate::thread::{
    alloc_frame, init_record, EntryFrame, KernelThreadFrame, LockId, Name, SwitchFrame,
    ThreadFunc, ThreadId, ThreadRecord, ThreadRef, ThreadState, NICE_MAX, NICE_MIN, PRI_DEFAULT,
    PRI_MAX, PRI_MIN,
};

extern crate alloc;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::null_mut;
use portable_atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, Ordering};
use ready::ReadyQueue;
use sleep::SleepQueue;
use spin::{Mutex, MutexGuard};

/// Timer ticks per second.
pub const TIMER_FREQ: i64 = 100;
/// Consecutive ticks a thread may run before preemption is requested.
pub const TIME_SLICE: u32 = 4;

/// Scheduling discipline, fixed at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// One priority-searched ready list with periodic aging and priority
    /// donation through the lock layer.
    RoundRobin,
    /// 64 FIFO priority bands, recomputed from `nice`, `recent_cpu` and
    /// the load average.
    Mlfq,
}

/// Cumulative tick accounting, split by what the CPU was doing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub idle_ticks: u64,
    pub kernel_ticks: u64,
    pub user_ticks: u64,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Thread: {} idle ticks, {} kernel ticks, {} user ticks",
            self.idle_ticks, self.kernel_ticks, self.user_ticks
        )
    }
}

/// Queue and list state, guarded by the core lock.
struct Core {
    ready: ReadyQueue,
    sleepers: SleepQueue,
    /// Every live thread except the idle thread.
    all: Vec<ThreadRef>,
    load_avg: Fixed,
}

/// The scheduler.
pub struct Sched<P: Platform> {
    policy: Policy,
    core: Mutex<Core>,
    current: AtomicPtr<ThreadRecord>,
    idle: AtomicPtr<ThreadRecord>,
    initial: AtomicPtr<ThreadRecord>,
    /// Ticks since the running thread last entered `schedule_tail`.
    thread_ticks: AtomicU32,
    idle_ticks: AtomicU64,
    kernel_ticks: AtomicU64,
    user_ticks: AtomicU64,
    /// Aging clock for the round-robin discipline.
    total_ticks: AtomicU64,
    switches: AtomicU64,
    in_interrupt: AtomicBool,
    /// Fine-grained id lock, the only lock besides the core mutex.
    next_tid: Mutex<i32>,
    pool: PagePool,
    _platform: PhantomData<P>,
}

unsafe impl<P: Platform> Send for Sched<P> {}
unsafe impl<P: Platform> Sync for Sched<P> {}

static GLOBAL_SCHED: AtomicPtr<()> = AtomicPtr::new(null_mut());

/// The MLFQ priority formula: `PRI_MAX - recent_cpu/4 - 2*nice`, rounded
/// to nearest and clamped into the priority range.
pub(crate) fn recalculate_priority(record: &ThreadRecord) -> i32 {
    let p = (Fixed::from_int(PRI_MAX) - record.recent_cpu / 4 - Fixed::from_int(record.nice) * 2)
        .round();
    p.clamp(PRI_MIN, PRI_MAX)
}

impl<P: Platform + 'static> Sched<P> {
    pub fn new(policy: Policy) -> Sched<P> {
        Sched {
            policy,
            core: Mutex::new(Core {
                ready: ReadyQueue::new(policy),
                sleepers: SleepQueue::new(),
                all: Vec::new(),
                load_avg: Fixed::ZERO,
            }),
            current: AtomicPtr::new(null_mut()),
            idle: AtomicPtr::new(null_mut()),
            initial: AtomicPtr::new(null_mut()),
            thread_ticks: AtomicU32::new(0),
            idle_ticks: AtomicU64::new(0),
            kernel_ticks: AtomicU64::new(0),
            user_ticks: AtomicU64::new(0),
            total_ticks: AtomicU64::new(0),
            switches: AtomicU64::new(0),
            in_interrupt: AtomicBool::new(false),
            next_tid: Mutex::new(1),
            pool: PagePool::new(),
            _platform: PhantomData,
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Publish this scheduler for the thread trampoline and interrupt
    /// glue.
    ///
    /// # Safety
    ///
    /// At most one scheduler may ever be registered, and [`Self::global`]
    /// must be instantiated with the same platform type.
    pub unsafe fn register_global(&'static self) {
        GLOBAL_SCHED.store(self as *const Sched<P> as *mut (), Ordering::Release);
    }

    /// The registered scheduler, if any.
    pub fn global() -> Option<&'static Sched<P>> {
        let ptr = GLOBAL_SCHED.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*(ptr as *const Sched<P>) })
        }
    }

    // ------------------------------------------------------------------
    // Current-thread lookup
    // ------------------------------------------------------------------

    /// The running thread's handle, canary checked.
    fn running(&self) -> ThreadRef {
        let ptr = self.current.load(Ordering::Acquire);
        assert!(!ptr.is_null(), "scheduler used before init");
        let t = unsafe { ThreadRef::from_raw(ptr) };
        assert!(t.is_valid(), "running thread's record clobbered");
        t
    }

    /// Like [`Self::running`], plus the status sanity check every public
    /// current-thread accessor performs.
    fn current_checked(&self) -> ThreadRef {
        let t = self.running();
        assert!(
            t.status() == ThreadState::Running,
            "current thread is not running"
        );
        t
    }

    /// Id of the running thread.
    pub fn current_id(&self) -> ThreadId {
        self.current_checked().id()
    }

    /// Name of the running thread.
    pub fn current_name(&self) -> Name {
        self.current_checked().name()
    }

    fn is_idle(&self, t: ThreadRef) -> bool {
        self.idle.load(Ordering::Acquire) == t.as_ptr()
    }

    /// Whether the CPU is inside the timer tick handler.
    pub fn in_interrupt(&self) -> bool {
        self.in_interrupt.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Boot
    // ------------------------------------------------------------------

    /// One-time promotion of the boot context into the initial thread,
    /// named "main". Interrupts stay off until [`Self::start`].
    pub fn init(&self, _proof: IntrOff<'_>) {
        assert!(!P::interrupts_enabled(), "init() with interrupts enabled");
        assert!(
            self.current.load(Ordering::Acquire).is_null(),
            "scheduler initialized twice"
        );

        let page = self
            .pool
            .alloc_zeroed()
            .expect("out of pages for the initial thread");
        let main = init_record(page, "main", PRI_DEFAULT, None, None);
        if self.policy == Policy::Mlfq {
            let record = main.record_mut();
            record.priority = recalculate_priority(record);
            record.priority_orig = record.priority;
        }
        main.record_mut().status = ThreadState::Running;
        main.record_mut().tid = self.allocate_tid();

        self.core.lock().all.push(main);
        self.initial.store(main.as_ptr(), Ordering::Release);
        self.current.store(main.as_ptr(), Ordering::Release);
        log::info!("scheduler initialized ({:?})", self.policy);
    }

    /// Create the idle thread and enable interrupts, completing boot. The
    /// idle thread lives outside the ready structure and the all-threads
    /// list; it is handed the CPU only when nothing else is runnable.
    pub fn start(&self) {
        let idle = self
            .spawn_inner("idle", PRI_MIN, true, idle_main::<P>, null_mut())
            .expect("out of pages for the idle thread");
        {
            let _guard = IntrGuard::<P>::new();
            let mut core = self.core.lock();
            assert!(
                core.ready.remove(idle, idle.priority()),
                "idle thread missing from the ready structure"
            );
            core.all.retain(|&t| t != idle);
        }
        self.idle.store(idle.as_ptr(), Ordering::Release);
        log::info!("idle thread {} parked; enabling preemption", idle.id());

        // Boot runs with interrupts masked; preemptive scheduling begins
        // here.
        P::restore_interrupts(true);
    }

    fn allocate_tid(&self) -> ThreadId {
        let mut next = self.next_tid.lock();
        let tid = *next;
        if *next == i32::MAX {
            *next = 2;
        } else {
            *next += 1;
        }
        ThreadId::new(tid)
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a thread running `f`. Returns its id; the new thread may run
    /// (and even exit) before this returns, and a higher-priority child
    /// preempts the creator immediately.
    pub fn spawn<F>(&self, name: &str, priority: i32, f: F) -> Result<ThreadId, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        let closure = Box::into_raw(Box::new(f));
        match self.spawn_inner(name, priority, false, closure_shim::<F>, closure as *mut u8) {
            Ok(t) => Ok(t.id()),
            Err(e) => {
                // No partial state on failure.
                drop(unsafe { Box::from_raw(closure) });
                Err(e)
            }
        }
    }

    /// Like [`Self::spawn`] for a plain function with no captured state.
    pub fn spawn_fn(&self, name: &str, priority: i32, entry: fn()) -> Result<ThreadId, SpawnError> {
        self.spawn_inner(name, priority, false, fn_shim, entry as *mut u8)
            .map(|t| t.id())
    }

    fn spawn_inner(
        &self,
        name: &str,
        priority: i32,
        is_idle: bool,
        function: ThreadFunc,
        aux: *mut u8,
    ) -> Result<ThreadRef, SpawnError> {
        if self.current.load(Ordering::Acquire).is_null() {
            return Err(SpawnError::NotInitialized);
        }
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "priority {} out of range",
            priority
        );

        let page = self.pool.alloc_zeroed().ok_or(SpawnError::OutOfMemory)?;

        let creator = self.running();
        let t = init_record(
            page,
            name,
            priority,
            Some(creator.id()),
            Some((creator.nice(), creator.recent_cpu())),
        );

        // The priority engine owns effective priorities under MLFQ; only
        // the idle thread keeps its literal argument.
        if self.policy == Policy::Mlfq && !is_idle {
            let record = t.record_mut();
            record.priority = recalculate_priority(record);
            record.priority_orig = record.priority;
        }

        t.record_mut().tid = self.allocate_tid();

        // Three descending frames: the register image popped by the first
        // switch, the entry thunk's return into the trampoline, and the
        // trampoline's arguments.
        unsafe {
            let kf = alloc_frame(t, size_of::<KernelThreadFrame>()) as *mut KernelThreadFrame;
            kf.write(KernelThreadFrame {
                ret: 0,
                function,
                aux,
            });
            let ef = alloc_frame(t, size_of::<EntryFrame>()) as *mut EntryFrame;
            ef.write(EntryFrame {
                ret: kernel_thread::<P> as usize,
            });
            let sf = alloc_frame(t, size_of::<SwitchFrame>()) as *mut SwitchFrame;
            sf.write(SwitchFrame {
                regs: [0; 4],
                ret: P::switch_entry_addr(),
            });
        }

        {
            let _guard = IntrGuard::<P>::new();
            self.core.lock().all.push(t);
        }

        log::debug!("spawned {} \"{}\" at priority {}", t.id(), name, t.priority());
        self.unblock_ref(t);
        Ok(t)
    }

    // ------------------------------------------------------------------
    // Blocking and waking
    // ------------------------------------------------------------------

    /// Put the running thread to sleep until somebody unblocks it. The
    /// caller must already hold a critical section so it can park itself
    /// and publish the wakeup condition atomically.
    pub fn block(&self, _proof: IntrOff<'_>) {
        debug_assert!(!self.in_interrupt(), "block() in interrupt context");
        assert!(!P::interrupts_enabled(), "block() with interrupts enabled");

        self.running().record_mut().status = ThreadState::Blocked;
        let core = self.core.lock();
        self.schedule(core);
    }

    /// Make a Blocked (or Nascent) thread runnable. Safe from any context;
    /// from thread context a wakeup that outranks the running thread
    /// yields before returning. Returns whether `tid` was found.
    pub fn unblock(&self, tid: ThreadId) -> bool {
        let found = {
            let _guard = IntrGuard::<P>::new();
            let core = self.core.lock();
            Self::find(&core, tid)
        };
        match found {
            Some(t) => {
                self.unblock_ref(t);
                true
            }
            None => false,
        }
    }

    fn unblock_ref(&self, t: ThreadRef) {
        let _guard = IntrGuard::<P>::new();
        let mut core = self.core.lock();

        assert!(t.is_valid(), "unblock of a corrupt record");
        assert!(
            matches!(t.status(), ThreadState::Blocked | ThreadState::Nascent),
            "unblock of a thread that is not blocked"
        );

        core.ready.push(t);
        t.record_mut().status = ThreadState::Ready;

        let cur = self.running();
        if t.priority() > cur.priority() && !self.in_interrupt() {
            // The wakeup outranks us: rejoin the ready structure and let
            // the scheduler sort it out before returning to the caller.
            cur.record_mut().status = ThreadState::Ready;
            if !self.is_idle(cur) {
                core.ready.push(cur);
            }
            self.schedule(core);
        }
    }

    /// Give up the CPU; the thread stays runnable and may be picked again
    /// immediately.
    pub fn yield_now(&self) {
        debug_assert!(!self.in_interrupt(), "yield_now() in interrupt context");
        if self.current.load(Ordering::Acquire).is_null() {
            return;
        }

        let _guard = IntrGuard::<P>::new();
        let cur = self.running();
        let mut core = self.core.lock();
        if !self.is_idle(cur) {
            core.ready.push(cur);
        }
        cur.record_mut().status = ThreadState::Ready;
        self.schedule(core);
    }

    /// Sleep for at least `ticks` timer ticks. `sleep(0)` returns
    /// immediately.
    pub fn sleep(&self, ticks: i64) {
        debug_assert!(!self.in_interrupt(), "sleep() in interrupt context");
        if ticks <= 0 {
            return;
        }

        let _guard = IntrGuard::<P>::new();
        let cur = self.running();
        {
            let record = cur.record_mut();
            record.status = ThreadState::Blocked;
            record.ticks_wait = ticks;
        }
        let mut core = self.core.lock();
        core.sleepers.push(cur);
        self.schedule(core);
    }

    /// Tear the running thread down and schedule its successor, which
    /// reclaims the page. Never returns.
    pub fn exit(&self) -> ! {
        debug_assert!(!self.in_interrupt(), "exit() in interrupt context");
        self.exit_inner();
        // The switch above never comes back; being rescheduled as a Dying
        // thread means the queues are corrupt.
        panic!("exited thread was rescheduled");
    }

    pub(crate) fn exit_inner(&self) {
        let _guard = IntrGuard::<P>::new();
        let cur = self.running();
        log::debug!("thread {} exiting", cur.id());

        let mut core = self.core.lock();
        core.all.retain(|&t| t != cur);
        cur.record_mut().status = ThreadState::Dying;
        self.schedule(core);
    }

    // ------------------------------------------------------------------
    // Priorities
    // ------------------------------------------------------------------

    /// Set the running thread's priority. Round-robin only; the MLFQ
    /// engine owns its priorities and ignores this. While donated
    /// priority is in force, a non-raising change only updates the value
    /// to restore once the donations drain.
    pub fn set_priority(&self, new_priority: i32) {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&new_priority),
            "priority {} out of range",
            new_priority
        );
        if self.policy == Policy::Mlfq {
            log::trace!("set_priority ignored under MLFQ");
            return;
        }

        let cur = self.current_checked();
        let donated = {
            let record = cur.record_mut();
            if !record.donor_locks.is_empty() && new_priority <= record.priority {
                record.priority_orig = new_priority;
                true
            } else {
                false
            }
        };
        if !donated {
            self.assign_priority(cur, new_priority);
        }
    }

    /// Effective priority of the running thread.
    pub fn priority(&self) -> i32 {
        self.current_checked().priority()
    }

    /// Apply `new_priority` to the running thread and yield when somebody
    /// waiting now outranks it.
    fn assign_priority(&self, cur: ThreadRef, new_priority: i32) {
        let old = cur.priority();
        cur.record_mut().priority = new_priority;

        match self.policy {
            Policy::Mlfq => {
                if new_priority < old {
                    let outranked = {
                        let _guard = IntrGuard::<P>::new();
                        self.core.lock().ready.has_higher_than(new_priority)
                    };
                    if outranked {
                        self.yield_now();
                    }
                }
            }
            Policy::RoundRobin => {
                cur.record_mut().priority_orig = new_priority;
                let outranked = {
                    let _guard = IntrGuard::<P>::new();
                    self.core.lock().ready.has_higher_than(new_priority)
                };
                if outranked {
                    self.yield_now();
                }
            }
        }
    }

    /// Set the running thread's nice value and fold it into the MLFQ
    /// priority at once. Meaningless (and ignored) under round-robin.
    pub fn set_nice(&self, nice: i32) {
        assert!(
            (NICE_MIN..=NICE_MAX).contains(&nice),
            "nice {} out of range",
            nice
        );
        if self.policy != Policy::Mlfq {
            return;
        }

        let cur = self.current_checked();
        cur.record_mut().nice = nice;
        let recomputed = recalculate_priority(cur.record());
        self.assign_priority(cur, recomputed);
    }

    /// Nice value of the running thread.
    pub fn nice(&self) -> i32 {
        self.current_checked().nice()
    }

    /// 100 times the system load average, rounded to nearest.
    pub fn load_avg_x100(&self) -> i32 {
        let _guard = IntrGuard::<P>::new();
        (self.core.lock().load_avg * 100).round()
    }

    /// 100 times the running thread's `recent_cpu`, rounded to nearest.
    pub fn recent_cpu_x100(&self) -> i32 {
        let _guard = IntrGuard::<P>::new();
        (self.current_checked().recent_cpu() * 100).round()
    }

    // ------------------------------------------------------------------
    // Queries and donation bookkeeping
    // ------------------------------------------------------------------

    fn find(core: &Core, tid: ThreadId) -> Option<ThreadRef> {
        core.all.iter().copied().find(|t| t.id() == tid)
    }

    pub fn status_of(&self, tid: ThreadId) -> Option<ThreadState> {
        let _guard = IntrGuard::<P>::new();
        let core = self.core.lock();
        Self::find(&core, tid).map(|t| t.status())
    }

    /// Effective priority of `tid`, if it is live.
    pub fn priority_of(&self, tid: ThreadId) -> Option<i32> {
        let _guard = IntrGuard::<P>::new();
        let core = self.core.lock();
        Self::find(&core, tid).map(|t| t.priority())
    }

    /// Flag `tid` as executing a user address space so its ticks count as
    /// user time. Called by the external process layer.
    pub fn mark_user(&self, tid: ThreadId, user: bool) -> bool {
        let _guard = IntrGuard::<P>::new();
        let core = self.core.lock();
        match Self::find(&core, tid) {
            Some(t) => {
                t.record_mut().user_space = user;
                true
            }
            None => false,
        }
    }

    /// Record a donation to `tid` through `lock`, raising its effective
    /// priority to at least `priority`. Donation never lowers. Round-robin
    /// only; MLFQ ignores donations. Returns whether the donation took.
    pub fn donate(&self, _proof: IntrOff<'_>, tid: ThreadId, lock: LockId, priority: i32) -> bool {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "priority {} out of range",
            priority
        );
        if self.policy == Policy::Mlfq {
            log::trace!("donation ignored under MLFQ");
            return false;
        }

        let core = self.core.lock();
        let Some(t) = Self::find(&core, tid) else {
            return false;
        };
        let record = t.record_mut();
        if !record.donor_locks.iter().any(|&l| l == lock) && record.donor_locks.push(lock).is_err()
        {
            log::warn!("thread {} donor set full, donation dropped", tid);
            return false;
        }
        if priority > record.priority {
            record.priority = priority;
        }
        true
    }

    /// Withdraw `lock`'s donation to `tid`. The effective priority is
    /// restored lazily, the next time the thread enters Running with no
    /// donors left.
    pub fn withdraw_donation(&self, _proof: IntrOff<'_>, tid: ThreadId, lock: LockId) -> bool {
        if self.policy == Policy::Mlfq {
            return false;
        }
        let core = self.core.lock();
        let Some(t) = Self::find(&core, tid) else {
            return false;
        };
        let record = t.record_mut();
        match record.donor_locks.iter().position(|&l| l == lock) {
            Some(i) => {
                record.donor_locks.swap_remove(i);
                true
            }
            None => false,
        }
    }

    /// Point `tid` at the lock it is blocked acquiring, or clear it.
    pub fn set_wait_lock(&self, _proof: IntrOff<'_>, tid: ThreadId, lock: Option<LockId>) -> bool {
        let core = self.core.lock();
        match Self::find(&core, tid) {
            Some(t) => {
                t.record_mut().waiting_on = lock;
                true
            }
            None => false,
        }
    }

    /// The lock `tid` is blocked acquiring, if any.
    pub fn waiting_on(&self, tid: ThreadId) -> Option<LockId> {
        let _guard = IntrGuard::<P>::new();
        let core = self.core.lock();
        Self::find(&core, tid).and_then(|t| t.waiting_on())
    }

    /// Run `f` over every live thread (the idle thread excepted).
    pub fn for_each(&self, _proof: IntrOff<'_>, mut f: impl FnMut(ThreadRef)) {
        let core = self.core.lock();
        for &t in core.all.iter() {
            f(t);
        }
    }

    /// Tick counters, split by idle, kernel and user time.
    pub fn stats(&self) -> Stats {
        Stats {
            idle_ticks: self.idle_ticks.load(Ordering::Relaxed),
            kernel_ticks: self.kernel_ticks.load(Ordering::Relaxed),
            user_ticks: self.user_ticks.load(Ordering::Relaxed),
        }
    }

    /// Context switches performed since boot.
    pub fn context_switches(&self) -> u64 {
        self.switches.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // The switch itself
    // ------------------------------------------------------------------

    /// The best ready thread, or the idle thread when nothing waits.
    fn next_thread_to_run(&self, core: &mut Core) -> ThreadRef {
        core.ready.pop_highest().unwrap_or_else(|| {
            let idle = self.idle.load(Ordering::Acquire);
            assert!(!idle.is_null(), "ready structure empty with no idle thread");
            unsafe { ThreadRef::from_raw(idle) }
        })
    }

    /// Hand the CPU to the next thread. On entry interrupts are off and
    /// the running thread has already left the Running state and parked
    /// itself wherever it belongs (ready structure, sleep queue, nowhere
    /// if blocked on a lock or dying).
    fn schedule(&self, mut core: MutexGuard<'_, Core>) {
        assert!(!P::interrupts_enabled(), "schedule() with interrupts enabled");
        let cur = self.running();
        assert!(
            cur.status() != ThreadState::Running,
            "schedule() from a thread still marked running"
        );

        let next = self.next_thread_to_run(&mut core);
        assert!(next.is_valid(), "scheduling a corrupt record");

        let prev = if cur != next {
            self.switches.fetch_add(1, Ordering::Relaxed);
            self.current.store(next.as_ptr(), Ordering::Release);
            log::trace!("switch {} -> {}", cur.id(), next.id());
            // Not across the switch: the successor relocks as needed.
            drop(core);
            Some(unsafe { P::switch_threads(cur, next) })
        } else {
            drop(core);
            None
        };
        self.schedule_tail(prev);
    }

    /// Complete a switch on the successor's side: mark it Running, restart
    /// its time slice, and bury a dying predecessor.
    fn schedule_tail(&self, prev: Option<ThreadRef>) {
        assert!(
            !P::interrupts_enabled(),
            "schedule_tail() with interrupts enabled"
        );
        let cur = self.running();
        cur.record_mut().status = ThreadState::Running;
        self.thread_ticks.store(0, Ordering::Release);
        P::activate_address_space(cur.id());

        if self.policy == Policy::RoundRobin {
            let record = cur.record_mut();
            if record.donor_locks.is_empty() {
                record.priority = record.priority_orig;
            }
        }

        if let Some(prev) = prev {
            if prev != cur
                && prev.status() == ThreadState::Dying
                && prev.as_ptr() != self.initial.load(Ordering::Acquire)
            {
                log::trace!("reclaiming thread {}", prev.id());
                unsafe { self.pool.free(prev.page()) };
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn force_next_tid(&self, raw: i32) {
        *self.next_tid.lock() = raw;
    }

    #[cfg(test)]
    pub(crate) fn pages_in_use(&self) -> usize {
        self.pool.in_use()
    }

    #[cfg(test)]
    pub(crate) fn sleeper_count(&self) -> usize {
        self.core.lock().sleepers.len()
    }

    #[cfg(test)]
    pub(crate) fn ready_count(&self) -> usize {
        self.core.lock().ready.len()
    }
}

/// First code every kernel thread runs: interrupts back on (the scheduler
/// hands over with them off), then the entry function, then a clean exit.
extern "C" fn kernel_thread<P: Platform + 'static>(function: ThreadFunc, aux: *mut u8) -> ! {
    P::restore_interrupts(true);
    function(aux);
    match Sched::<P>::global() {
        Some(sched) => sched.exit(),
        None => panic!("thread finished with no registered scheduler"),
    }
}

/// Body of the idle thread: block immediately, then halt between wakeups.
fn idle_main<P: Platform + 'static>(_aux: *mut u8) {
    let sched = Sched::<P>::global().expect("idle thread with no registered scheduler");
    loop {
        let guard = IntrGuard::<P>::new();
        sched.block(guard.token());
        drop(guard);
        P::halt_until_interrupt();
    }
}

fn closure_shim<F: FnOnce() + Send + 'static>(aux: *mut u8) {
    let f = unsafe { Box::from_raw(aux as *mut F) };
    f();
}

fn fn_shim(aux: *mut u8) {
    let entry: fn() = unsafe { core::mem::transmute(aux) };
    entry();
}
