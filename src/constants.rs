//! Tunable compile-time constants.
//!
//! Mirrors `original_source/src/frc/detail/FRCConstants.h`. Two variants of
//! these numbers exist upstream (a 4096 and a 256 `LOG_BLOCK_SIZE`); we keep
//! the smaller, more cache-friendly set, matching §6 of the spec.

/// Slots per thread's [`crate::pin::PinSet`]; also the scan block size.
pub const PIN_SET_SIZE: usize = 128;

/// Pin slots processed per scan-phase task.
pub const PROTECTED_BLOCK_SIZE: usize = PIN_SET_SIZE;

/// Decrements processed per sweep-phase task.
pub const LOG_BLOCK_SIZE: usize = 256;

/// Ring-buffer capacity per thread. Must be a power of two.
pub const LOG_BUFFER_SIZE: usize = 1 << 22;

/// Mask derived from [`LOG_BUFFER_SIZE`].
pub const LOG_MASK: usize = LOG_BUFFER_SIZE - 1;

/// Alias for [`LOG_BUFFER_SIZE`], matching the `logSize` name §6 uses in
/// the two threshold formulas below.
pub const LOG_SIZE: usize = LOG_BUFFER_SIZE;

/// Upper bound on the distance between `help()` calls.
pub const BASE_HELP_INTERVAL: usize = 64;

/// Usage threshold at which the adaptive interval begins shrinking.
pub const MAX_LOG_SIZE_BEFORE_HELP_INTERVAL_REDUCTION: usize = LOG_SIZE / 2;

/// Usage threshold at which the owner thread must block rather than help.
pub const MAX_LOG_SIZE_BEFORE_BLOCKING_HELP_CALL: usize = LOG_SIZE - 32 * LOG_BLOCK_SIZE;

/// Non-blocking help attempts a helper makes before it parks on the phase
/// condition variable.
pub const NUM_HELP_ATTEMPTS_BEFORE_BLOCKING: usize = 64;

/// Bounded number of `try_help` calls a thread makes while unregistering, to
/// flush its own log before leaving the remainder to other helpers.
pub const NUM_TRY_HELP_CALLS_ON_UNREGISTER: usize = 1024;

/// Recursion depth at which a destructor-triggered decrement chain spills
/// back to the [`crate::log::DecrementLog`] instead of recursing inline.
pub const MAX_INLINE_DECREMENT_DEPTH: usize = 32;

pub(crate) const fn help_interval_reduction_constant() -> f64 {
    (LOG_SIZE - MAX_LOG_SIZE_BEFORE_HELP_INTERVAL_REDUCTION) as f64 / BASE_HELP_INTERVAL as f64
}
