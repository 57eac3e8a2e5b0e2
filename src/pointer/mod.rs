//! The three pointer flavors: [`AtomicPointer`], [`SharedPointer`], and
//! [`PrivatePointer`]. All three wrap a pointer to the managed object (never
//! to its [`crate::header::ObjectHeader`]); they differ only in how a read
//! publishes the pointee and whether the handle itself owns a reference.

mod atomic;
mod private;
mod shared;

pub use atomic::AtomicPointer;
pub use private::PrivatePointer;
pub use shared::{make_array, SharedPointer};
