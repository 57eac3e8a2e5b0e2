//! Pin slots: thread-local published-pointer cells, and the free-list backed
//! [`PinSet`] that owns them.

use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::constants::PIN_SET_SIZE;

/// Sentinel written into a slot while its final value is being published.
/// A literal pointer value of `1` (as the original C++ uses) risks
/// colliding with a real object address on exotic platforms; a dedicated
/// static's address cannot alias any heap allocation.
fn busy_signal() -> *mut () {
    static BUSY: u8 = 0;
    &BUSY as *const u8 as *mut ()
}

/// A single thread-local atomic cell. Either:
/// - part of the owning [`PinSet`]'s free list (holds the address of
///   another slot, or null for the list's tail),
/// - transiently [`busy_signal`] while a publish is in progress, or
/// - a published, protected pointer to a live managed object.
pub(crate) struct PinSlot(AtomicPtr<()>);

impl PinSlot {
    fn new() -> Self {
        PinSlot(AtomicPtr::new(std::ptr::null_mut()))
    }
}

/// A fixed-size array of pin slots, owned exclusively by one
/// [`crate::thread_data::ThreadData`]. `acquire`/`release`/`set_protected`
/// are only ever called by the owning thread; the slots themselves are read
/// concurrently by helper threads during the scan phase.
pub(crate) struct PinSet {
    slots: Box<[PinSlot]>,
    head: Cell<*mut PinSlot>,
}

// SAFETY: the free-list head (`Cell`) is only ever touched by the owning
// thread; the slots array is read/written through atomics from any thread.
unsafe impl Sync for PinSet {}

impl PinSet {
    pub(crate) fn new() -> Self {
        let mut slots = Vec::with_capacity(PIN_SET_SIZE);
        for _ in 0..PIN_SET_SIZE {
            slots.push(PinSlot::new());
        }
        let slots = slots.into_boxed_slice();

        for i in 0..slots.len() - 1 {
            let next = &slots[i + 1] as *const PinSlot as *mut ();
            slots[i].0.store(next, Ordering::Relaxed);
        }
        slots[slots.len() - 1].0.store(std::ptr::null_mut(), Ordering::Release);

        let head = &slots[0] as *const PinSlot as *mut PinSlot;
        PinSet {
            slots,
            head: Cell::new(head),
        }
    }

    /// Pops the head of the free list. Only called by the owning thread.
    pub(crate) fn acquire(&self) -> NonNull<PinSlot> {
        let head = self.head.get();
        assert!(!head.is_null(), "pin set exhausted: too many live reads on this thread");
        // SAFETY: non-null, still inside `self.slots`.
        let slot = unsafe { &*head };
        let next = slot.0.load(Ordering::Relaxed) as *mut PinSlot;
        self.head.set(next);
        // SAFETY: head was just checked non-null.
        unsafe { NonNull::new_unchecked(head) }
    }

    /// Pushes `slot` back onto the free list. Only called by the owning
    /// thread.
    pub(crate) fn release(&self, slot: NonNull<PinSlot>) {
        let next = self.head.get();
        // SAFETY: `slot` is a slot owned by this PinSet.
        unsafe { slot.as_ref().0.store(next as *mut (), Ordering::Relaxed) };
        self.head.set(slot.as_ptr());
    }

    /// True iff `raw` names neither null nor a pointer inside this PinSet's
    /// own backing storage (i.e. it's a real, published object pointer).
    pub(crate) fn is_valid(&self, raw: *mut ()) -> bool {
        if raw.is_null() {
            return false;
        }
        let start = self.slots.as_ptr() as usize;
        let end = start + self.slots.len() * std::mem::size_of::<PinSlot>();
        let addr = raw as usize;
        addr < start || addr >= end
    }

    pub(crate) fn slot(&self, index: usize) -> &PinSlot {
        &self.slots[index]
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Publishes `ptr` into `*slot`, protecting it from reclamation, using
    /// the three-step protocol from §4.3.1: store busy, load the source,
    /// CAS from busy to the observed value, retrying if the source changed
    /// between the load and the CAS.
    ///
    /// # Safety
    /// `slot` must have been returned by [`acquire`] on this `PinSet` and
    /// not yet released.
    pub(crate) unsafe fn publish(slot: NonNull<PinSlot>, source: &AtomicPtr<()>) -> *mut () {
        loop {
            slot.as_ref().0.store(busy_signal(), Ordering::Release);
            let observed = source.load(Ordering::Acquire);
            if slot
                .as_ref()
                .0
                .compare_exchange(busy_signal(), observed, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return observed;
            }
        }
    }

    /// Spins on a slot until it no longer reads as busy, returning the
    /// published value (possibly null).
    pub(crate) fn wait_published(slot: &PinSlot) -> *mut () {
        loop {
            let value = slot.0.load(Ordering::Acquire);
            if value != busy_signal() {
                return value;
            }
            std::hint::spin_loop();
        }
    }

    pub(crate) fn store_raw(slot: NonNull<PinSlot>, value: *mut ()) {
        // SAFETY: caller guarantees `slot` belongs to a live PinSet.
        unsafe { slot.as_ref().0.store(value, Ordering::Release) };
    }

    pub(crate) fn load_raw(slot: &PinSlot) -> *mut () {
        slot.0.load(Ordering::Acquire)
    }
}

/// Reinterprets a typed atomic pointer cell as the type-erased form
/// [`PinSet::publish`] takes. Sound because `AtomicPtr<T>` and
/// `AtomicPtr<()>` share layout regardless of `T`.
pub(crate) unsafe fn erase_atomic_ptr<T>(p: &AtomicPtr<T>) -> &AtomicPtr<()> {
    &*(p as *const AtomicPtr<T> as *const AtomicPtr<()>)
}
