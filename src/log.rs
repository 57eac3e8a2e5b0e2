//! The thread-local decrement ring buffer, and the adaptive back-pressure
//! math that keeps it bounded.

use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::constants::{
    help_interval_reduction_constant, BASE_HELP_INTERVAL, LOG_BUFFER_SIZE, LOG_MASK,
    MAX_LOG_SIZE_BEFORE_HELP_INTERVAL_REDUCTION,
};
use crate::header::ObjectHeader;

/// A power-of-two ring buffer of pending object-header decrements, owned by
/// one [`crate::thread_data::ThreadData`]. The owner thread is the sole
/// producer (`enqueue`); any helper dispatched to this thread during the
/// sweep phase is the consumer.
pub(crate) struct DecrementLog {
    buffer: Box<[AtomicPtr<ObjectHeader>]>,
    /// Producer cursor: next slot the owner will write.
    decrement_index: AtomicUsize,
    /// Next `decrement_index` value at which the owner must call `help()`.
    help_index: AtomicUsize,
    /// Publication of `decrement_index`, read by whichever thread performs
    /// this ThreadData's sweep-phase rollover.
    last_help_index: AtomicUsize,
    /// Start of the window the current sweep phase is draining.
    capture_index: AtomicUsize,
    /// Next slot a sweep task will dequeue.
    consumer_index: AtomicUsize,
}

impl DecrementLog {
    pub(crate) fn new() -> Self {
        let mut buffer = Vec::with_capacity(LOG_BUFFER_SIZE);
        for _ in 0..LOG_BUFFER_SIZE {
            buffer.push(AtomicPtr::new(std::ptr::null_mut()));
        }
        DecrementLog {
            buffer: buffer.into_boxed_slice(),
            decrement_index: AtomicUsize::new(0),
            help_index: AtomicUsize::new(BASE_HELP_INTERVAL),
            last_help_index: AtomicUsize::new(0),
            capture_index: AtomicUsize::new(0),
            consumer_index: AtomicUsize::new(0),
        }
    }

    /// Writes `header` into the next producer slot. Returns `true` if the
    /// owner must now call `help()` (the help-interval trigger was
    /// crossed). Only ever called by the owning thread.
    #[inline]
    pub(crate) fn enqueue(&self, header: std::ptr::NonNull<ObjectHeader>) -> bool {
        let idx = self.decrement_index.load(Ordering::Relaxed);
        self.buffer[idx & LOG_MASK].store(header.as_ptr(), Ordering::Relaxed);
        let next = idx.wrapping_add(1);
        self.decrement_index.store(next, Ordering::Release);
        next == self.help_index.load(Ordering::Relaxed)
    }

    pub(crate) fn decrement_index(&self) -> usize {
        self.decrement_index.load(Ordering::Acquire)
    }

    pub(crate) fn consumer_index(&self) -> usize {
        self.consumer_index.load(Ordering::Relaxed)
    }

    pub(crate) fn set_consumer_index(&self, value: usize) {
        self.consumer_index.store(value, Ordering::Relaxed);
    }

    pub(crate) fn capture_index(&self) -> usize {
        self.capture_index.load(Ordering::Relaxed)
    }

    pub(crate) fn set_capture_index(&self, value: usize) {
        self.capture_index.store(value, Ordering::Relaxed);
    }

    pub(crate) fn last_help_index(&self) -> usize {
        self.last_help_index.load(Ordering::Acquire)
    }

    /// Publishes the current producer frontier so the next sweep rollover
    /// can snapshot it as the new capture window.
    pub(crate) fn publish_last_help_index(&self) {
        let idx = self.decrement_index.load(Ordering::Relaxed);
        self.last_help_index.store(idx, Ordering::Release);
    }

    pub(crate) fn set_help_index(&self, value: usize) {
        self.help_index.store(value, Ordering::Relaxed);
    }

    /// Occupied entries between `consumer_index` and `decrement_index`,
    /// mod the buffer size.
    pub(crate) fn usage(&self) -> usize {
        buffer_separation(
            self.consumer_index.load(Ordering::Relaxed),
            self.decrement_index.load(Ordering::Acquire),
        )
    }

    /// Entry at ring index `index & LOG_MASK`.
    pub(crate) fn get(&self, index: usize) -> *mut ObjectHeader {
        self.buffer[index & LOG_MASK].load(Ordering::Relaxed)
    }

    pub(crate) fn clear(&self, index: usize) {
        self.buffer[index & LOG_MASK].store(std::ptr::null_mut(), Ordering::Relaxed);
    }

    /// Checks §3's `consumerIndex <= captureIndex <= decrementIndex`
    /// (modulo the buffer) invariant. Debug-only: called at phase
    /// boundaries, never on the hot enqueue path.
    pub(crate) fn debug_check_cursor_invariant(&self) {
        let consumer = self.consumer_index.load(Ordering::Relaxed);
        let capture = self.capture_index.load(Ordering::Relaxed);
        let decrement = self.decrement_index.load(Ordering::Relaxed);
        debug_assert_eq!(
            buffer_separation(consumer, decrement),
            buffer_separation(consumer, capture) + buffer_separation(capture, decrement),
            "frc: decrement log cursor invariant violated (consumer={consumer}, capture={capture}, decrement={decrement})"
        );
    }
}

/// Forward distance from `from` to `to`, wrapping at [`LOG_BUFFER_SIZE`].
pub(crate) fn buffer_separation(from: usize, to: usize) -> usize {
    if from <= to {
        to - from
    } else {
        to + (LOG_BUFFER_SIZE - from)
    }
}

/// Computes the next `help_index`, implementing the closed-loop
/// back-pressure described in §4.4: as usage approaches the buffer, the
/// interval shrinks, until eventually the caller is told to block instead
/// (see [`should_block`]).
pub(crate) fn next_help_index(decrement_index: usize, usage: usize) -> usize {
    let over = usage.saturating_sub(MAX_LOG_SIZE_BEFORE_HELP_INTERVAL_REDUCTION);
    let interval = if over == 0 {
        BASE_HELP_INTERVAL
    } else {
        let reduced = BASE_HELP_INTERVAL as f64 / (1.0 + over as f64 / help_interval_reduction_constant());
        (reduced as usize).max(1)
    };
    let candidate = decrement_index.wrapping_add(interval);
    candidate.min(decrement_index.wrapping_add(LOG_BUFFER_SIZE))
}

pub(crate) fn should_block(usage: usize) -> bool {
    usage >= crate::constants::MAX_LOG_SIZE_BEFORE_BLOCKING_HELP_CALL
}
