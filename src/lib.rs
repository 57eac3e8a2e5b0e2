//! Fast reference counting: an epoch-batched, pin-protected concurrent
//! smart-pointer runtime.
//!
//! Hot pointers — read or copied far more often than written — make naive
//! atomic reference counting expensive: every read pays for an atomic
//! increment/decrement pair. This crate instead lets readers *pin* a
//! pointee in a thread-local slot for the duration of a read, and defers
//! the corresponding reference-count update to a cooperative, two-phase
//! (scan/sweep) epoch that every registered thread helps advance. Scan
//! converts live pins into real increments (paired with a decrement queued
//! for the next sweep); sweep drains queued decrements in cache-friendly
//! batches and runs destructors at zero.
//!
//! Call [`Token::new`] once per thread before touching any pointer type.
//! [`AtomicPointer<T>`] is the shared, mutable field; [`SharedPointer<T>`]
//! is a locally owned handle; [`PrivatePointer<T>`] is a hazard-pointer-like
//! short-lived read handle. [`collect`] drives the epoch machine to
//! quiescence.

mod constants;
mod header;
mod log;
mod pin;
mod pointer;
mod router;
mod runtime;
mod thread_data;
mod tree;

pub use pointer::{make_array, AtomicPointer, PrivatePointer, SharedPointer};
pub use runtime::{collect, is_thread_registered, Token};

/// A thin, `pub` pass-through onto the crate-internal [`tree::StaticTreeRouter`],
/// compiled only under `cfg(loom)` so the loom model in `tests/loom.rs` can
/// drive it directly. Not part of the crate's stable API.
#[cfg(loom)]
#[doc(hidden)]
pub mod loom_support {
    use crate::tree::StaticTreeRouter;

    pub struct TreeRouter(StaticTreeRouter);

    impl TreeRouter {
        pub fn new(num_inputs: usize) -> Self {
            TreeRouter(StaticTreeRouter::new(num_inputs))
        }
        pub fn acquire(&self, leaf: usize) {
            self.0.acquire(leaf)
        }
        pub fn release(&self, leaf: usize) {
            self.0.release(leaf)
        }
        pub fn cyclic_release(&self, leaf: usize) -> bool {
            self.0.cyclic_release(leaf)
        }
        pub fn find_acquired(&self) -> Option<usize> {
            self.0.find_acquired()
        }
        pub fn status(&self) -> bool {
            self.0.status()
        }
    }
}
