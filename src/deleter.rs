use core::alloc::Layout;
use core::ptr::NonNull;

use crate::heap;

/// A destroy-action for objects owned by a [`Unique`].
///
/// A deleter lives inside its owner and moves with it. [`delete`] is called
/// exactly once for every object the owner destroys, including after
/// [`Unique::reset`] and when the owner is dropped, but never for an object
/// handed out by [`Unique::release`].
///
/// # Examples
/// ```
/// use core::ptr::NonNull;
/// use observable_unique::{Deleter, Unique};
///
/// struct Recycle {
///     freed: usize,
/// }
///
/// impl<T: ?Sized> Deleter<T> for Recycle {
///     unsafe fn delete(&mut self, ptr: NonNull<T>) {
///         self.freed += 1;
///         drop(Box::from_raw(ptr.as_ptr()));
///     }
/// }
///
/// let raw = Box::into_raw(Box::new(7));
/// let mut owner = unsafe { Unique::from_raw_with_deleter(raw, Recycle { freed: 0 }) };
/// Unique::reset(&mut owner);
/// assert_eq!(Unique::get_deleter(&owner).freed, 1);
/// ```
///
/// [`delete`]: Deleter::delete
/// [`Unique`]: crate::Unique
/// [`Unique::reset`]: crate::Unique::reset
/// [`Unique::release`]: crate::Unique::release
pub trait Deleter<T: ?Sized> {
    /// Whether this is a user-configured deleter, as reported by
    /// [`Unique::has_deleter`](crate::Unique::has_deleter).
    const CUSTOM: bool = true;

    /// Destroys the object at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be an object this deleter accepted ownership of, and it must
    /// not be used again afterwards.
    unsafe fn delete(&mut self, ptr: NonNull<T>);

    /// Called when an owner takes ownership of `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live object.
    unsafe fn adopt(&mut self, _ptr: NonNull<T>) {}

    /// Called when an owner hands `ptr` back without destroying it.
    ///
    /// # Safety
    ///
    /// `ptr` must have been passed to [`adopt`](Deleter::adopt) before.
    unsafe fn relinquish(&mut self, _ptr: NonNull<T>) {}
}

/// The deleter used when none is configured. It treats the object as a
/// [`Box`] allocation, and reports adoption and destruction to the
/// [`heap`](crate::heap) funnel.
///
/// [`Box`]: alloc::boxed::Box
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DefaultDeleter;

impl<T: ?Sized> Deleter<T> for DefaultDeleter {
    const CUSTOM: bool = false;

    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        let layout = Layout::for_value(ptr.as_ref());
        core::ptr::drop_in_place(ptr.as_ptr());
        heap::deallocate(ptr.cast(), layout);
    }

    unsafe fn adopt(&mut self, ptr: NonNull<T>) {
        heap::adopt(ptr.cast(), Layout::for_value(ptr.as_ref()));
    }

    unsafe fn relinquish(&mut self, ptr: NonNull<T>) {
        heap::relinquish(ptr.cast(), Layout::for_value(ptr.as_ref()));
    }
}
