use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::header;
use crate::pin::{erase_atomic_ptr, PinSet};
use crate::pointer::private::PrivatePointer;
use crate::pointer::shared::SharedPointer;
use crate::thread_data::{self, ThreadData};

/// A shared, mutable field readable and writable from any thread. Reads go
/// through the pin protocol (§4.3.1): a pin slot is published with the
/// observed address before it is safe to dereference or copy elsewhere.
/// Writes install a new inner pointer and log the old one for deferred
/// decrement.
pub struct AtomicPointer<T> {
    inner: AtomicPtr<T>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send + Sync> Send for AtomicPointer<T> {}
unsafe impl<T: Send + Sync> Sync for AtomicPointer<T> {}

impl<T> AtomicPointer<T> {
    pub fn null() -> Self {
        AtomicPointer {
            inner: AtomicPtr::new(ptr::null_mut()),
            _marker: PhantomData,
        }
    }

    /// Allocates a new object with no prior value to decrement.
    pub fn make(value: T) -> Self
    where
        T: 'static,
    {
        thread_data::require_current();
        let raw = header::allocate(value, header::type_code_scalar::<T>());
        AtomicPointer {
            inner: AtomicPtr::new(raw.as_ptr()),
            _marker: PhantomData,
        }
    }

    /// Publishes the current pointee into a pin slot, increments it while
    /// the pin still protects it, then releases the slot, returning an
    /// owned handle. The increment must happen before the release: until
    /// then the object has no other protection, and a concurrent sweep
    /// could otherwise free it in the gap (§4.3.1, §8 invariant 2).
    pub fn load(&self) -> SharedPointer<T>
    where
        T: 'static,
    {
        let td = thread_data::require_current();
        // SAFETY: td is this thread's live ThreadData.
        let data = unsafe { td.as_ref() };
        let slot = data.pin_set().acquire();
        // SAFETY: slot was just acquired from this PinSet and is released
        // only after the increment below observes the pin's protection.
        let raw = unsafe { PinSet::publish(slot, erase_atomic_ptr(&self.inner)) } as *mut T;
        if !raw.is_null() {
            ThreadData::register_increment(raw as *mut ());
        }
        data.pin_set().release(slot);
        SharedPointer::from_raw(raw)
    }

    /// Publishes the current pointee into a pin slot and keeps the pin
    /// alive in the returned handle, without incrementing (§4.3.3).
    pub fn pin(&self) -> PrivatePointer<T>
    where
        T: 'static,
    {
        let td = thread_data::require_current();
        // SAFETY: td is this thread's live ThreadData.
        let data = unsafe { td.as_ref() };
        let slot = data.pin_set().acquire();
        // SAFETY: slot is handed to the PrivatePointer, which releases it
        // on drop.
        let raw = unsafe { PinSet::publish(slot, erase_atomic_ptr(&self.inner)) } as *mut T;
        PrivatePointer::from_pinned(slot, raw)
    }

    /// Installs `value`'s pointee as the new inner pointer, transferring
    /// its owned reference, and logs the old pointee for deferred
    /// decrement.
    pub fn store(&self, value: SharedPointer<T>) {
        let new = value.into_raw();
        let old = self.inner.swap(new, Ordering::AcqRel);
        if !old.is_null() {
            let td = thread_data::require_current();
            unsafe { td.as_ref() }.register_decrement(old as *mut ());
        }
    }

    pub fn store_null(&self) {
        self.store(SharedPointer::null());
    }
}

impl<T> Drop for AtomicPointer<T> {
    fn drop(&mut self) {
        let raw = *self.inner.get_mut();
        if raw.is_null() {
            return;
        }
        if let Some(td) = thread_data::current() {
            // SAFETY: td is live for as long as the registration lasts.
            unsafe { td.as_ref() }.register_decrement(raw as *mut ());
        }
    }
}

impl<T> PartialEq for AtomicPointer<T> {
    /// Compares the currently published inner pointers. Racy by nature —
    /// either side may be concurrently `store`d — same caveat as comparing
    /// two snapshots of any other shared, mutable field.
    fn eq(&self, other: &Self) -> bool {
        self.inner.load(Ordering::Acquire) == other.inner.load(Ordering::Acquire)
    }
}
