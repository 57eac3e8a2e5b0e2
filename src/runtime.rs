//! The process-wide [`Runtime`] singleton and the [`Token`] RAII guard
//! applications use to register the current OS thread with it.

use std::sync::OnceLock;
use std::thread::available_parallelism;

use crate::router::HelpRouter;
use crate::thread_data;

pub(crate) struct Runtime {
    router: HelpRouter,
}

impl Runtime {
    fn new() -> Self {
        let parallelism = available_parallelism().map(|n| n.get()).unwrap_or(1);
        Runtime {
            router: HelpRouter::new(2 * parallelism),
        }
    }
}

fn runtime() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(Runtime::new)
}

pub(crate) fn router() -> &'static HelpRouter {
    &runtime().router
}

/// Drives the epoch machine through enough scan/sweep cycles that every
/// decrement logged before this call has either run its destructor or been
/// handed off to another registered thread to do so.
///
/// Requires the current thread to hold a [`Token`]; panics otherwise, since
/// there would be no [`crate::thread_data::ThreadData`] to drive the router
/// from.
pub fn collect() {
    let td = thread_data::current().expect("frc::collect() called without an active Token");
    // SAFETY: registered threads keep their ThreadData alive for the
    // lifetime of the registration, and we hold one here.
    router().collect(unsafe { td.as_ref() });
}

/// RAII registration for the current OS thread. While at least one `Token`
/// is alive on a thread (registrations nest: an inner `Token::new()` just
/// bumps a counter), that thread has a live
/// [`crate::thread_data::ThreadData`] and participates in the scan/sweep
/// epoch machine — required before touching any [`crate::AtomicPointer`],
/// [`crate::SharedPointer`], or [`crate::PrivatePointer`].
///
/// Dropping the outermost `Token` flushes the thread's pending decrements
/// with a bounded number of help attempts, then detaches it: the
/// [`Runtime`]'s router retains and reaps its `ThreadData` once the log
/// fully drains, even if that outlives the `Token` itself.
pub struct Token {
    _private: (),
}

impl Token {
    pub fn new() -> Self {
        thread_data::register_thread();
        Token { _private: () }
    }
}

impl Default for Token {
    fn default() -> Self {
        Token::new()
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        thread_data::unregister_thread();
    }
}

/// True iff the current OS thread holds at least one live [`Token`].
pub fn is_thread_registered() -> bool {
    thread_data::is_thread_registered()
}
