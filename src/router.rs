//! [`HelpRouter`]: the two-phase (scan/sweep) epoch scheduler that fans
//! cooperative "help" calls out across every registered thread's pending
//! work, sharded into subqueues to keep contention down.

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use crate::constants::NUM_HELP_ATTEMPTS_BEFORE_BLOCKING;
use crate::thread_data::{TaskOutcome, ThreadData, SCAN, SWEEP};
use crate::tree::StaticTreeRouter;

#[derive(Clone, Copy)]
struct TdPtr(NonNull<ThreadData>);

// SAFETY: ThreadData is itself Sync (see thread_data.rs); this newtype just
// lets us stash the pointer in Send/Sync containers (subqueues, vectors)
// that are shared across the router's helper threads.
unsafe impl Send for TdPtr {}
unsafe impl Sync for TdPtr {}

struct Subqueue {
    queue: Mutex<VecDeque<TdPtr>>,
    /// Number of distinct threads with still-outstanding (not yet
    /// phase-complete) work routed to this subqueue. Independent from the
    /// `queue`'s instantaneous length, which can be transiently empty while
    /// a thread's single entry is being dispatched by a helper.
    count: AtomicUsize,
}

impl Subqueue {
    fn new() -> Self {
        Subqueue {
            queue: Mutex::new(VecDeque::new()),
            count: AtomicUsize::new(0),
        }
    }
}

struct Queue {
    /// Tracks which subqueues currently have at least one dispatchable
    /// entry (vector occupancy).
    router_tree: StaticTreeRouter,
    /// Tracks which subqueues still have threads that haven't finished the
    /// phase (count occupancy). The whole phase can advance once this is
    /// empty.
    barrier: StaticTreeRouter,
    subqueues: Vec<Subqueue>,
}

impl Queue {
    fn new(num_groups: usize) -> Self {
        Queue {
            router_tree: StaticTreeRouter::new(num_groups),
            barrier: StaticTreeRouter::new(num_groups),
            subqueues: (0..num_groups).map(|_| Subqueue::new()).collect(),
        }
    }
}

pub(crate) struct HelpRouter {
    phase: AtomicU8,
    queues: [Queue; 2],
    phase_mutex: Mutex<()>,
    phase_cv: Condvar,
    next_index: AtomicUsize,
}

impl HelpRouter {
    pub(crate) fn new(num_groups: usize) -> Self {
        let num_groups = num_groups.max(1);
        HelpRouter {
            phase: AtomicU8::new(SCAN),
            queues: [Queue::new(num_groups), Queue::new(num_groups)],
            phase_mutex: Mutex::new(()),
            phase_cv: Condvar::new(),
            next_index: AtomicUsize::new(0),
        }
    }

    fn pick_subqueue(&self, len: usize) -> usize {
        self.next_index.fetch_add(1, Ordering::Relaxed) % len
    }

    /// Registers a freshly-created [`ThreadData`] with the router,
    /// transferring ownership of its allocation to the router (it is freed
    /// once the thread detaches and its log fully drains).
    pub(crate) fn add_thread(&self, td: NonNull<ThreadData>) {
        let p = self.phase.load(Ordering::Acquire);
        self.enqueue_thread(td, p);
        self.phase_cv.notify_one();

        // Prevents stalls when this is the only queued thread but it was
        // queued into the *next* phase: another thread may have advanced
        // the phase concurrently while we were being added.
        let now = self.phase.load(Ordering::Acquire);
        if now != p && !self.queues[now as usize].barrier.status() {
            self.try_advance_phase();
        }
    }

    fn enqueue_thread(&self, td: NonNull<ThreadData>, p: u8) {
        let queue = &self.queues[p as usize];
        let idx = self.pick_subqueue(queue.subqueues.len());
        // SAFETY: td is a live ThreadData owned by this router.
        unsafe { td.as_ref() }.subqueue.store(idx, Ordering::Relaxed);
        let subq = &queue.subqueues[idx];

        // Push, router-tree acquire, count increment, and barrier acquire
        // all happen under one held lock: a helper dispatched to this
        // subqueue (try_help_subqueue) must not be able to pop, dispatch,
        // and complete this thread's phase before the count/barrier
        // accounting for it has actually run, or `count` underflows and
        // the barrier can report completion for a thread it never tracked.
        let mut q = subq.queue.lock().unwrap();
        q.push_back(TdPtr(td));
        if q.len() == 1 {
            queue.router_tree.acquire(idx);
        }
        if subq.count.fetch_add(1, Ordering::AcqRel) == 0 {
            queue.barrier.acquire(idx);
        }
    }

    /// Dispatches one block of work from subqueue `idx` of phase `p`'s
    /// queue, if it still has a dispatchable entry. Returns whether any
    /// work was found (not whether a thread's phase completed).
    fn try_help_subqueue(&self, p: u8, idx: usize) -> bool {
        let queue = &self.queues[p as usize];
        let subq = &queue.subqueues[idx];

        let td = {
            let mut q = subq.queue.lock().unwrap();
            if self.phase.load(Ordering::Acquire) != p {
                return false;
            }
            let td = match q.pop_back() {
                Some(td) => td,
                None => return false,
            };
            if q.is_empty() {
                queue.router_tree.release(idx);
            }
            td
        };

        // SAFETY: td is kept alive by the router until it is reaped below.
        let data = unsafe { td.0.as_ref() };
        let outcome = data.run_phase_block(p);

        match outcome {
            TaskOutcome::More => {
                let mut q = subq.queue.lock().unwrap();
                q.push_back(td);
                if q.len() == 1 {
                    queue.router_tree.acquire(idx);
                }
            }
            TaskOutcome::PhaseComplete => {
                let ready_to_delete = p == SWEEP && data.is_ready_to_destruct();
                if !ready_to_delete {
                    self.enqueue_thread(td.0, p ^ 1);
                }
                if subq.count.fetch_sub(1, Ordering::AcqRel) <= 1 && queue.barrier.cyclic_release(idx) {
                    self.try_advance_phase();
                }
                if ready_to_delete {
                    // SAFETY: detached and fully drained; no other
                    // reference to this ThreadData remains anywhere (the
                    // owning thread gave up its pointer in
                    // unregister_thread, and it was not re-enqueued above).
                    drop(unsafe { Box::from_raw(td.0.as_ptr()) });
                }
            }
        }
        true
    }

    /// One attempt, preferring `td`'s home subqueue before falling back to
    /// a tree search.
    fn try_help(&self, td: &ThreadData) -> bool {
        let p = self.phase.load(Ordering::Acquire);
        let home = td.subqueue.load(Ordering::Relaxed);
        self.try_help_subqueue(p, home) || self.try_help_any(p)
    }

    fn try_help_any(&self, p: u8) -> bool {
        match self.queues[p as usize].router_tree.find_acquired() {
            Some(idx) => self.try_help_subqueue(p, idx),
            None => false,
        }
    }

    /// Makes progress on behalf of `td`: one attempt favoring its own
    /// work, otherwise join the general helper loop until any progress is
    /// made somewhere.
    pub(crate) fn help(&self, td: &ThreadData) {
        if !self.try_help(td) {
            self.help_anywhere();
        }
    }

    /// Loops attempting to help anywhere, parking on the phase condition
    /// variable once both the current phase's router and barrier look
    /// exhausted, until something changes.
    fn help_anywhere(&self) {
        loop {
            let p = self.phase.load(Ordering::Acquire);
            for _ in 0..NUM_HELP_ATTEMPTS_BEFORE_BLOCKING {
                if self.try_help_any(p) {
                    return;
                }
            }

            let guard = self.phase_mutex.lock().unwrap();
            let p = self.phase.load(Ordering::Relaxed);
            if self.queues[p as usize].barrier.status() && !self.queues[p as usize].router_tree.status() {
                let _ = self.phase_cv.wait(guard);
            }
        }
    }

    /// Actively helps while blocked specifically waiting for the *next*
    /// phase flip, used by an owner thread whose log is critically full.
    pub(crate) fn block_for_phase_advance(&self) {
        let start = self.phase.load(Ordering::Acquire);
        loop {
            if self.phase.load(Ordering::Acquire) != start {
                return;
            }
            if !self.try_help_any(start) {
                let guard = self.phase_mutex.lock().unwrap();
                if self.phase.load(Ordering::Relaxed) == start {
                    let _ = self.phase_cv.wait(guard);
                }
            }
        }
    }

    /// Drives phase advances to completion on `td`'s behalf: used at
    /// teardown and for explicit `collect()` requests.
    pub(crate) fn collect(&self, td: &ThreadData) {
        loop {
            for _ in 0..16 {
                let start = self.phase.load(Ordering::Acquire);
                loop {
                    td.help();
                    if self.phase.load(Ordering::Acquire) != start {
                        break;
                    }
                }
            }
            if td.all_work_complete() {
                return;
            }
        }
    }

    fn try_advance_phase(&self) -> bool {
        {
            let _guard = self.phase_mutex.lock().unwrap();
            let phase = self.phase.load(Ordering::Relaxed);
            if self.queues[phase as usize].barrier.status() {
                return false;
            }
            self.phase.store(phase ^ 1, Ordering::Release);
        }
        self.phase_cv.notify_all();
        true
    }
}
