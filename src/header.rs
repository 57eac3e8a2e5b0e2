//! [`ObjectHeader`]: the per-allocation metadata prefix, and the process-wide
//! destructor table it indexes into.
//!
//! Every managed object is allocated as `[header bytes][object bytes]` in one
//! allocation. The header's address is recovered from the object's address
//! by subtracting a fixed offset — unlike `splitrc`'s `Inner<T> { data,
//! count }`, there is no visible wrapper struct, because a pin slot holds a
//! type-erased `*mut ()` that must be convertible back to a header without
//! knowing `T`. That forces [`HEADER_OFFSET`] to be one process-wide
//! constant (the header size rounded up to [`HEADER_ALIGN`]) rather than a
//! per-`T` computation: every managed `T` must have an alignment no coarser
//! than [`HEADER_ALIGN`], which covers everything but the rare
//! over-aligned (e.g. `#[repr(align(32))]` SIMD) payload.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::any::TypeId;
use std::collections::HashMap;
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock};

/// Per-allocation metadata living immediately before the managed object.
#[repr(C)]
pub(crate) struct ObjectHeader {
    count: AtomicU32,
    type_code: u32,
    length: usize,
}

/// The coarsest alignment a managed `T` may require. Fixed so that a raw,
/// type-erased object pointer (as published into a pin slot) can be turned
/// back into a header address without knowing `T`.
const HEADER_ALIGN: usize = 16;

/// Fixed byte offset from a header's address to its object's address.
const HEADER_OFFSET: usize = {
    let size = mem::size_of::<ObjectHeader>();
    (size + HEADER_ALIGN - 1) & !(HEADER_ALIGN - 1)
};

impl ObjectHeader {
    fn new(type_code: u32, length: usize) -> Self {
        ObjectHeader {
            count: AtomicU32::new(1),
            type_code,
            length,
        }
    }

    /// Relaxed fetch-add. Overflow is not checked: the practical ceiling is
    /// far beyond any realistic reference count.
    #[inline]
    pub(crate) fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements only if doing so would not reach zero. Returns `true` if
    /// the decrement happened. If the count was 1, returns `false` without
    /// decrementing — the caller must log a deferred decrement instead, so
    /// that the expensive zero-case branch never sits on the hot path.
    #[inline]
    pub(crate) fn try_decrement(&self) -> bool {
        let mut current = self.count.load(Ordering::Relaxed);
        loop {
            if current < 2 {
                return false;
            }
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Decrements unconditionally; if the result is zero, dispatches the
    /// destructor registered for this header's type code and frees the
    /// allocation.
    ///
    /// # Safety
    /// `header` must point at a live [`ObjectHeader`] that was produced by
    /// [`allocate`] or [`allocate_array`], and the caller must not touch
    /// `header` again after this call if the count reaches zero.
    pub(crate) unsafe fn decrement_and_destroy(header: NonNull<ObjectHeader>) {
        let prev = header.as_ref().count.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            destructor_table().destroy(header);
        }
    }

    #[inline]
    pub(crate) fn length(&self) -> usize {
        self.length
    }
}

/// Recovers the header for any pointer produced by [`allocate`] or
/// [`allocate_array`]. Type-erased: works from a raw `*mut ()` pulled out of
/// a pin slot, since [`HEADER_OFFSET`] is a fixed constant.
///
/// # Safety
/// `raw` must be a still-live, non-null data pointer returned by
/// [`allocate`] or [`allocate_array`].
pub(crate) unsafe fn header_of(raw: *mut ()) -> NonNull<ObjectHeader> {
    NonNull::new_unchecked((raw as *mut u8).sub(HEADER_OFFSET) as *mut ObjectHeader)
}

fn checked_layout<T>(len: usize) -> Layout {
    assert!(
        mem::align_of::<T>() <= HEADER_ALIGN,
        "frc: type alignment exceeds the supported maximum ({HEADER_ALIGN})"
    );
    let elems_size = mem::size_of::<T>().checked_mul(len).expect("array size overflow");
    let size = HEADER_OFFSET.checked_add(elems_size).expect("allocation size overflow");
    Layout::from_size_align(size, HEADER_ALIGN).expect("layout overflow")
}

/// Allocates one `[header][T]` block and writes `value` into place.
pub(crate) fn allocate<T>(value: T, type_code: u32) -> NonNull<T> {
    let layout = checked_layout::<T>(1);
    unsafe {
        let base = alloc(layout);
        if base.is_null() {
            handle_alloc_error(layout);
        }
        (base as *mut ObjectHeader).write(ObjectHeader::new(type_code, 0));
        let data = base.add(HEADER_OFFSET) as *mut T;
        data.write(value);
        NonNull::new_unchecked(data)
    }
}

/// Allocates one `[header][T; len]` block and move-constructs each element
/// from `init(i)`. Returns the data pointer to element 0.
pub(crate) fn allocate_array<T>(len: usize, type_code: u32, mut init: impl FnMut(usize) -> T) -> NonNull<T> {
    let layout = checked_layout::<T>(len);
    unsafe {
        let base = alloc(layout);
        if base.is_null() {
            handle_alloc_error(layout);
        }
        (base as *mut ObjectHeader).write(ObjectHeader::new(type_code, len));
        let data = base.add(HEADER_OFFSET) as *mut T;
        for i in 0..len {
            data.add(i).write(init(i));
        }
        NonNull::new_unchecked(data)
    }
}

/// Destroys (drops + deallocates) a scalar allocation of `T`.
///
/// # Safety
/// `header` must be the header of a live scalar allocation of `T` with
/// refcount zero, produced by [`allocate`].
unsafe fn destroy_scalar<T>(header: NonNull<ObjectHeader>) {
    let base = header.as_ptr() as *mut u8;
    let data = base.add(HEADER_OFFSET) as *mut T;
    std::ptr::drop_in_place(data);
    dealloc(base, checked_layout::<T>(1));
}

/// Destroys (drops each element + deallocates) an array allocation of `T`.
///
/// # Safety
/// `header` must be the header of a live array allocation of `T` with
/// refcount zero, produced by [`allocate_array`].
unsafe fn destroy_array<T>(header: NonNull<ObjectHeader>) {
    let len = header.as_ref().length();
    let base = header.as_ptr() as *mut u8;
    let data = base.add(HEADER_OFFSET) as *mut T;
    for i in 0..len {
        std::ptr::drop_in_place(data.add(i));
    }
    dealloc(base, checked_layout::<T>(len));
}

type DestroyFn = unsafe fn(NonNull<ObjectHeader>);

struct DestructorTable {
    // Guards both the TypeId map and the dense Vec, since a new type code
    // is only ever appended, never reassigned.
    entries: Mutex<(HashMap<TypeId, u32>, Vec<DestroyFn>)>,
}

impl DestructorTable {
    fn new() -> Self {
        DestructorTable {
            entries: Mutex::new((HashMap::new(), Vec::new())),
        }
    }

    fn register(&self, key: TypeId, destroy: DestroyFn) -> u32 {
        let mut guard = self.entries.lock().unwrap();
        if let Some(&code) = guard.0.get(&key) {
            return code;
        }
        let code = guard.1.len() as u32;
        guard.1.push(destroy);
        guard.0.insert(key, code);
        code
    }

    /// # Safety
    /// `header`'s type code must have been registered by [`register`] with a
    /// `destroy` function matching the allocation's actual layout.
    unsafe fn destroy(&self, header: NonNull<ObjectHeader>) {
        let code = header.as_ref().type_code;
        let guard = self.entries.lock().unwrap();
        let destroy = guard.1[code as usize];
        drop(guard);
        destroy(header);
    }
}

fn destructor_table() -> &'static DestructorTable {
    static TABLE: OnceLock<DestructorTable> = OnceLock::new();
    TABLE.get_or_init(DestructorTable::new)
}

/// Returns the dense type code for `T` as a scalar allocation, registering
/// it on first use.
pub(crate) fn type_code_scalar<T: 'static>() -> u32 {
    static CODE: OnceLock<u32> = OnceLock::new();
    // NOTE: `CODE` is monomorphized per `T`: each instantiation of this
    // function gets its own `OnceLock`, which is exactly the dense,
    // append-only, "assigned at first use" scheme §3 describes.
    *CODE.get_or_init(|| destructor_table().register(TypeId::of::<T>(), destroy_scalar::<T>))
}

/// Returns the dense type code for `T` as an array allocation, registering
/// it on first use. Distinct from [`type_code_scalar`] because the
/// destructor must drop `length()` elements instead of one.
pub(crate) fn type_code_array<T: 'static>() -> u32 {
    static CODE: OnceLock<u32> = OnceLock::new();
    *CODE.get_or_init(|| {
        // Array and scalar destructors for the same T must not share a type
        // code (different destroy function), so key on a distinct marker.
        struct ArrayMarker<T>(std::marker::PhantomData<T>);
        destructor_table().register(TypeId::of::<ArrayMarker<T>>(), destroy_array::<T>)
    })
}
