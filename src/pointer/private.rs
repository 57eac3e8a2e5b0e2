use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr;

use crate::header;
use crate::pin::PinSlot;
use crate::pointer::shared::SharedPointer;
use crate::thread_data::{self, ThreadData};
use std::ptr::NonNull;

/// Where a [`PrivatePointer`]'s protection comes from: a live pin slot it
/// must release on drop (no owned reference), or an owned reference it
/// must log a decrement for on drop.
enum Origin {
    Pinned(NonNull<PinSlot>),
    Owned,
}

/// A "hazard-pointer-like" read handle: the pin slot itself IS the
/// protection (§4.3.3). Cheap to construct from an [`crate::pointer::AtomicPointer`]
/// read since it performs no refcount increment; dropping releases the
/// slot back to the thread's [`crate::pin::PinSet`] with no logged
/// decrement. Also usable as an owned handle via [`PrivatePointer::make`],
/// in which case it behaves like [`SharedPointer`] on drop.
pub struct PrivatePointer<T> {
    raw: *mut T,
    origin: Origin,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send + Sync> Send for PrivatePointer<T> {}
unsafe impl<T: Send + Sync> Sync for PrivatePointer<T> {}

impl<T> PrivatePointer<T> {
    pub fn null() -> Self {
        PrivatePointer {
            raw: ptr::null_mut(),
            origin: Origin::Owned,
            _marker: PhantomData,
        }
    }

    /// Allocates a new object and owns its one reference.
    pub fn make(value: T) -> Self
    where
        T: 'static,
    {
        thread_data::require_current();
        let raw = header::allocate(value, header::type_code_scalar::<T>());
        PrivatePointer {
            raw: raw.as_ptr(),
            origin: Origin::Owned,
            _marker: PhantomData,
        }
    }

    pub(crate) fn from_pinned(slot: NonNull<PinSlot>, raw: *mut T) -> Self {
        PrivatePointer {
            raw,
            origin: Origin::Pinned(slot),
            _marker: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }

    pub fn get(&self) -> Option<&T> {
        unsafe { self.raw.as_ref() }
    }
}

impl<T> Deref for PrivatePointer<T> {
    type Target = T;

    fn deref(&self) -> &T {
        assert!(!self.raw.is_null(), "frc: deref of a null PrivatePointer");
        unsafe { &*self.raw }
    }
}

impl<T> Drop for PrivatePointer<T> {
    fn drop(&mut self) {
        match self.origin {
            Origin::Pinned(slot) => {
                if let Some(td) = thread_data::current() {
                    // SAFETY: slot was acquired from this same ThreadData's
                    // PinSet when the pin was published.
                    unsafe { td.as_ref() }.pin_set().release(slot);
                }
            }
            Origin::Owned => {
                if self.raw.is_null() {
                    return;
                }
                let td = thread_data::require_current();
                unsafe { td.as_ref() }.register_decrement(self.raw as *mut ());
            }
        }
    }
}

impl<T> PartialEq for PrivatePointer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

/// Converts an owned handle into a new owned reference: increments before
/// copying the pointer, regardless of whether `p` itself holds a pin or an
/// owned reference.
impl<T: 'static> From<&PrivatePointer<T>> for SharedPointer<T> {
    fn from(p: &PrivatePointer<T>) -> Self {
        if !p.raw.is_null() {
            ThreadData::register_increment(p.raw as *mut ());
        }
        SharedPointer::from_raw(p.raw)
    }
}

/// Converts a [`SharedPointer`] into a new, independently owned
/// [`PrivatePointer`], incrementing the shared reference count.
impl<T> From<&SharedPointer<T>> for PrivatePointer<T> {
    fn from(p: &SharedPointer<T>) -> Self {
        let raw = p.raw_ptr();
        if !raw.is_null() {
            ThreadData::register_increment(raw as *mut ());
        }
        PrivatePointer {
            raw,
            origin: Origin::Owned,
            _marker: PhantomData,
        }
    }
}
