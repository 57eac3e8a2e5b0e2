use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr;

use crate::header;
use crate::thread_data::{self, ThreadData};

/// An owned, locally-held handle to a managed object. Not itself shared
/// across threads (the inner pointer is a plain field, not an atomic) —
/// intended for variables moved or cloned within a thread. Copying (via
/// [`Clone`]) increments; dropping logs a deferred decrement on the
/// current thread.
pub struct SharedPointer<T> {
    raw: *mut T,
    _marker: PhantomData<T>,
}

// SAFETY: the pointee's own Send/Sync bounds govern whether it's sound to
// move/share a reference to it across threads; the refcount and log
// machinery underneath are already thread-safe.
unsafe impl<T: Send + Sync> Send for SharedPointer<T> {}
unsafe impl<T: Send + Sync> Sync for SharedPointer<T> {}

impl<T> SharedPointer<T> {
    pub fn null() -> Self {
        SharedPointer {
            raw: ptr::null_mut(),
            _marker: PhantomData,
        }
    }

    /// Allocates a new object and returns a handle owning its one
    /// reference.
    pub fn make(value: T) -> Self
    where
        T: 'static,
    {
        thread_data::require_current();
        let raw = header::allocate(value, header::type_code_scalar::<T>());
        SharedPointer::from_raw(raw.as_ptr())
    }

    pub(crate) fn from_raw(raw: *mut T) -> Self {
        SharedPointer {
            raw,
            _marker: PhantomData,
        }
    }

    /// Consumes the handle without logging a decrement: used when the one
    /// reference it owns is being handed off (e.g. into an
    /// [`crate::pointer::AtomicPointer`]'s inner slot) rather than dropped.
    pub(crate) fn into_raw(self) -> *mut T {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }

    pub(crate) fn raw_ptr(&self) -> *mut T {
        self.raw
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }

    pub fn get(&self) -> Option<&T> {
        unsafe { self.raw.as_ref() }
    }

    /// Indexed access into an array allocation created by [`make_array`].
    ///
    /// # Panics
    /// Panics if the handle is null or `index` is out of bounds for the
    /// allocation's stored length.
    pub fn index(&self, index: usize) -> &T {
        assert!(!self.raw.is_null(), "frc: index on a null SharedPointer");
        // SAFETY: raw is a live managed pointer; header_of recovers its
        // header.
        let header = unsafe { header::header_of(self.raw as *mut ()) };
        let len = unsafe { header.as_ref() }.length();
        assert!(index < len, "frc: array index {index} out of bounds (len {len})");
        // SAFETY: index < len, and the allocation holds len contiguous Ts.
        unsafe { &*self.raw.add(index) }
    }

    /// Stored length for an array allocation created by [`make_array`]; 0
    /// for null or scalar handles.
    pub fn len(&self) -> usize {
        if self.raw.is_null() {
            return 0;
        }
        unsafe { header::header_of(self.raw as *mut ()).as_ref() }.length()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Clone for SharedPointer<T> {
    fn clone(&self) -> Self {
        if !self.raw.is_null() {
            ThreadData::register_increment(self.raw as *mut ());
        }
        SharedPointer::from_raw(self.raw)
    }
}

impl<T> Drop for SharedPointer<T> {
    fn drop(&mut self) {
        if self.raw.is_null() {
            return;
        }
        // SAFETY: any live SharedPointer was constructed under a
        // registered thread; require_current aborts if that thread has
        // since unregistered without dropping its handles first, which is
        // itself a precondition violation.
        let td = thread_data::require_current();
        unsafe { td.as_ref() }.register_decrement(self.raw as *mut ());
    }
}

impl<T> Deref for SharedPointer<T> {
    type Target = T;

    fn deref(&self) -> &T {
        assert!(!self.raw.is_null(), "frc: deref of a null SharedPointer");
        unsafe { &*self.raw }
    }
}

impl<T> PartialEq for SharedPointer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedPointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("null"),
        }
    }
}

/// Allocates an array of `len` elements, each produced by `init(index)`,
/// and returns a handle owning the allocation's one reference.
pub fn make_array<T: 'static>(len: usize, init: impl FnMut(usize) -> T) -> SharedPointer<T> {
    thread_data::require_current();
    let raw = header::allocate_array(len, header::type_code_array::<T>(), init);
    SharedPointer::from_raw(raw.as_ptr())
}
