//! [`ThreadData`]: the per-thread aggregate — pin set, decrement log, epoch
//! cursors and the "helping" recursion guard — plus the thread-local
//! registration bookkeeping (`Token` reentrancy count, registered pointer).

use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};

use crate::constants::{MAX_INLINE_DECREMENT_DEPTH, PROTECTED_BLOCK_SIZE};
use crate::header::{header_of, ObjectHeader};
use crate::log::{self, DecrementLog};
use crate::pin::PinSet;
use crate::runtime;

/// scan = 0, sweep = 1, matching `FRCConstants::scan`/`sweep`.
pub(crate) const SCAN: u8 = 0;
pub(crate) const SWEEP: u8 = 1;

/// Outcome of dispatching one block of work on a [`ThreadData`].
pub(crate) enum TaskOutcome {
    /// The thread still has more blocks to process this phase.
    More,
    /// This was the last block: the thread just finished its work for the
    /// current phase.
    PhaseComplete,
}

pub(crate) struct ThreadData {
    pin_set: PinSet,
    log: DecrementLog,

    /// Scan-phase cursor: next pin-slot index to mark.
    last_mark_index: AtomicUsize,
    num_remaining_mark_blocks: AtomicUsize,

    /// Sweep-phase block countdown. `-1` is the sentinel for "capture
    /// window was empty, nothing to sweep this phase".
    num_remaining_decrement_blocks: AtomicIsize,

    /// Home subqueue index in the current phase's queue, used by the
    /// router to try a likely-nonempty subqueue before a tree search.
    pub(crate) subqueue: AtomicUsize,

    detached: AtomicBool,
}

// SAFETY: every field is either an atomic or (PinSet's head cursor) touched
// only by the registered owner thread, which is the sole thread that ever
// calls the owner-side methods (`log_decrement`, `register_decrement`,
// `help`, `detach`). Helper threads dispatched by the router only ever call
// `run_phase_block`, which touches nothing but atomics and the log/pin-set
// storage arrays.
unsafe impl Sync for ThreadData {}

impl ThreadData {
    fn new() -> Self {
        ThreadData {
            pin_set: PinSet::new(),
            log: DecrementLog::new(),
            last_mark_index: AtomicUsize::new(0),
            num_remaining_mark_blocks: AtomicUsize::new(mark_blocks_per_phase()),
            num_remaining_decrement_blocks: AtomicIsize::new(-1),
            subqueue: AtomicUsize::new(0),
            detached: AtomicBool::new(false),
        }
    }

    pub(crate) fn pin_set(&self) -> &PinSet {
        &self.pin_set
    }

    /// Enqueues `header` for deferred decrement, calling `help()` if the
    /// adaptive interval was just crossed.
    pub(crate) fn log_decrement(&self, header: NonNull<ObjectHeader>) {
        if self.log.enqueue(header) {
            self.help();
        }
    }

    /// Entry point used by pointer writes/drops: decrement `ptr`'s object
    /// now if safe, otherwise log a deferred decrement. If this thread is
    /// currently dispatching a sweep block (see [`with_helping`]) within
    /// the bounded inline-recursion depth, applies the decrement inline
    /// instead, so that destructor cascades don't explode the log.
    pub(crate) fn register_decrement(&self, raw: *mut ()) {
        if raw.is_null() {
            return;
        }
        // SAFETY: raw was published by a pointer flavor that owned a
        // reference to it.
        let header = unsafe { header_of(raw) };
        if helping_depth() > 0 && helping_depth() <= MAX_INLINE_DECREMENT_DEPTH {
            bump_helping_depth(1);
            // SAFETY: header is live; decrement_and_destroy tolerates
            // reaching zero.
            unsafe { ObjectHeader::decrement_and_destroy(header) };
            bump_helping_depth(-1);
        } else if !unsafe { header.as_ref() }.try_decrement() {
            self.log_decrement(header);
        }
    }

    pub(crate) fn register_increment(raw: *mut ()) {
        if raw.is_null() {
            return;
        }
        unsafe { header_of(raw).as_ref() }.increment();
    }

    /// Runs the owner-thread side of the adaptive help protocol: publish
    /// the producer frontier, then drive the router until either the owner
    /// regains headroom or the log is critically full, in which case block.
    pub(crate) fn help(&self) {
        self.log.publish_last_help_index();

        // Re-entrancy guard: a destructor cascade triggered during this
        // very call can append to the log and retrigger the help-interval
        // check. Don't recurse into the router from there; the outer call
        // is already making progress on our behalf.
        if IN_HELP.with(|f| f.replace(true)) {
            return;
        }

        let usage = self.log.usage();
        if log::should_block(usage) {
            // Log is critically full: don't just make opportunistic
            // progress, block until the phase we're waiting on actually
            // advances.
            runtime::router().block_for_phase_advance();
        } else {
            runtime::router().help(self);
        }

        let decrement_index = self.log.decrement_index();
        let next = log::next_help_index(decrement_index, usage);
        self.log.set_help_index(next);

        IN_HELP.with(|f| f.set(false));
    }

    pub(crate) fn detach(&self) {
        self.log.publish_last_help_index();
        self.detached.store(true, Ordering::Release);
    }

    pub(crate) fn is_ready_to_destruct(&self) -> bool {
        self.all_work_complete() && self.detached.load(Ordering::Relaxed)
    }

    pub(crate) fn all_work_complete(&self) -> bool {
        self.log.consumer_index() == self.log.decrement_index()
    }

    /// Dispatches one scan block: walks [`PROTECTED_BLOCK_SIZE`] pin slots,
    /// incrementing and logging a deferred decrement for each live
    /// protected pointer found.
    pub(crate) fn run_scan_block(&self) -> TaskOutcome {
        let begin = self.last_mark_index.load(Ordering::Relaxed);
        let end = (begin + PROTECTED_BLOCK_SIZE).min(self.pin_set.len());
        self.last_mark_index.store(end, Ordering::Relaxed);

        for i in begin..end {
            let slot = self.pin_set.slot(i);
            let raw = PinSet::wait_published(slot);
            if !self.pin_set.is_valid(raw) {
                continue;
            }
            // SAFETY: a valid (non-free-list) slot value is always a data
            // pointer published by a live AtomicPointer<T> read, which owns
            // a reference for at least as long as the pin is live.
            let header = unsafe { header_of(raw) };
            unsafe { header.as_ref() }.increment();
            // Won't be processed until next epoch's sweep.
            self.log_decrement(header);
        }

        if self.num_remaining_mark_blocks.fetch_sub(1, Ordering::AcqRel) > 1 {
            TaskOutcome::More
        } else {
            TaskOutcome::PhaseComplete
        }
    }

    /// Dispatches one sweep block: drains up to [`crate::constants::LOG_BLOCK_SIZE`]
    /// entries from the captured decrement window, running destructors at
    /// zero. On the last block of the phase, rolls cursors over for the
    /// next epoch.
    pub(crate) fn run_sweep_block(&self) -> TaskOutcome {
        let begin = self.log.consumer_index();
        let remaining = log::buffer_separation(begin, self.log.capture_index());
        let block_size = remaining.min(crate::constants::LOG_BLOCK_SIZE);
        let end = begin.wrapping_add(block_size);
        self.log.set_consumer_index(end);

        bump_helping_depth(1);
        for i in begin..end {
            let raw = self.log.get(i);
            if let Some(header) = NonNull::new(raw) {
                // SAFETY: entries in the capture window were enqueued by a
                // live owner and have not yet been processed.
                unsafe { ObjectHeader::decrement_and_destroy(header) };
            }
            self.log.clear(i);
        }
        bump_helping_depth(-1);

        if self.num_remaining_decrement_blocks.fetch_sub(1, Ordering::AcqRel) > 1 {
            return TaskOutcome::More;
        }

        // Last block: roll over to the next epoch.
        self.log.set_capture_index(self.log.last_help_index());
        self.log.debug_check_cursor_invariant();
        let delta = log::buffer_separation(self.log.consumer_index(), self.log.capture_index());
        let next_blocks = if delta == 0 {
            -1
        } else {
            ((delta + crate::constants::LOG_BLOCK_SIZE - 1) / crate::constants::LOG_BLOCK_SIZE) as isize
        };
        self.num_remaining_decrement_blocks.store(next_blocks, Ordering::Relaxed);

        self.last_mark_index.store(0, Ordering::Relaxed);
        self.num_remaining_mark_blocks
            .store(mark_blocks_per_phase(), Ordering::Release);

        TaskOutcome::PhaseComplete
    }

    /// Dispatches one block of work for `phase` (scan or sweep).
    pub(crate) fn run_phase_block(&self, phase: u8) -> TaskOutcome {
        if phase == SCAN {
            self.run_scan_block()
        } else {
            self.run_sweep_block()
        }
    }
}

fn mark_blocks_per_phase() -> usize {
    crate::constants::PIN_SET_SIZE / PROTECTED_BLOCK_SIZE
}

thread_local! {
    static CURRENT: Cell<Option<NonNull<ThreadData>>> = const { Cell::new(None) };
    static REGISTRATION_COUNT: Cell<usize> = const { Cell::new(0) };
    static HELPING_DEPTH: Cell<usize> = const { Cell::new(0) };
    /// Guards against a destructor cascade re-entering `help()` while this
    /// thread is already inside it.
    static IN_HELP: Cell<bool> = const { Cell::new(false) };
}

fn helping_depth() -> usize {
    HELPING_DEPTH.with(|d| d.get())
}

fn bump_helping_depth(delta: isize) {
    HELPING_DEPTH.with(|d| {
        let v = d.get() as isize + delta;
        d.set(v.max(0) as usize);
    });
}

/// True iff the current OS thread has an active registration.
pub(crate) fn is_thread_registered() -> bool {
    REGISTRATION_COUNT.with(|c| c.get() > 0)
}

/// Returns the current thread's [`ThreadData`], or `None` if unregistered.
pub(crate) fn current() -> Option<NonNull<ThreadData>> {
    CURRENT.with(|c| c.get())
}

/// Like [`current`], but treats the absence of a registration as the
/// precondition violation the error-handling policy says it is: pointer
/// operations from an unregistered thread abort.
pub(crate) fn require_current() -> NonNull<ThreadData> {
    current().expect("frc: pointer operation on a thread with no active Token")
}

/// Registers the current OS thread, allocating a fresh [`ThreadData`] on
/// the first (non-reentrant) call and handing ownership to the
/// [`runtime::Runtime`]'s router. Reentrant: nested calls just bump a
/// counter.
pub(crate) fn register_thread() {
    let already = REGISTRATION_COUNT.with(|c| {
        let v = c.get();
        c.set(v + 1);
        v > 0
    });
    if already {
        return;
    }

    let td = Box::into_raw(Box::new(ThreadData::new()));
    // SAFETY: just allocated, non-null.
    let td = unsafe { NonNull::new_unchecked(td) };
    CURRENT.with(|c| c.set(Some(td)));
    runtime::router().add_thread(td);
}

/// Unregisters the current OS thread. On the outermost exit, flushes this
/// thread's log with a bounded number of help attempts, then marks the
/// `ThreadData` detached and leaves it for the router to reap once its
/// logs fully drain.
pub(crate) fn unregister_thread() {
    let outermost = REGISTRATION_COUNT.with(|c| {
        let v = c.get();
        assert!(v > 0, "frc: unregister_thread() without a matching register_thread()");
        c.set(v - 1);
        v == 1
    });
    if !outermost {
        return;
    }

    let td = CURRENT.with(|c| c.take()).expect("frc: thread registered but no ThreadData");
    // SAFETY: td is valid until the router reaps it; we no longer touch it
    // via TLS after this point, only through the (shared, immutable from
    // here on) reference the router retains.
    let data = unsafe { td.as_ref() };
    for _ in 0..crate::constants::NUM_TRY_HELP_CALLS_ON_UNREGISTER {
        data.help();
    }
    data.detach();
}
