use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A payload that records how many times it has been dropped, for
/// asserting that a destructor runs exactly once per allocation. Owns an
/// `Arc` (rather than borrowing) so it satisfies the `'static` bound every
/// FRC pointer constructor requires.
pub struct Counted {
    pub value: u32,
    drops: Arc<AtomicUsize>,
}

impl Counted {
    pub fn new(value: u32, drops: &Arc<AtomicUsize>) -> Self {
        Counted {
            value,
            drops: drops.clone(),
        }
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::AcqRel);
    }
}
