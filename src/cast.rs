use core::ptr::NonNull;

/// Re-typing of owners and observers while keeping their control block.
///
/// This is the machinery behind [`upcast!`]. Observers bound to the block are
/// unaffected by a rebind: they keep whatever address they captured.
///
/// [`upcast!`]: crate::upcast
pub trait Rebind<U: ?Sized>: Sized {
    /// The type currently pointed to.
    type Pointee: ?Sized;
    /// The same handle pointing to a `U`.
    type Output;

    /// Gets the current object address.
    fn pointee(&self) -> Option<NonNull<Self::Pointee>>;

    /// Rebinds `self` to `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be `None` or derived from [`pointee`](Rebind::pointee) by a
    /// cast that the handle's destroy-action can still handle.
    unsafe fn rebind(self, ptr: Option<NonNull<U>>) -> Self::Output;
}

/// Converts a [`Unique`], [`Sealed`] or [`Observer`] to a type its pointee
/// unsizes to, usually a trait object. The control block is kept, so existing
/// observers stay valid.
///
/// Only unsizing coercions are accepted; anything else fails to compile.
///
/// # Examples
/// ```
/// use core::fmt::Debug;
/// use observable_unique::{upcast, Observer, Unique};
///
/// let owner = Unique::new(5u32);
/// let observer = Unique::observe(&owner);
///
/// let owner: Unique<dyn Debug> = upcast!(owner => dyn Debug);
/// let base: Observer<dyn Debug> = upcast!(observer.clone() => dyn Debug);
///
/// assert!(!observer.expired());
/// assert!(owner == observer);
/// assert!(base == observer);
/// ```
///
/// [`Unique`]: crate::Unique
/// [`Sealed`]: crate::Sealed
/// [`Observer`]: crate::Observer
#[macro_export]
macro_rules! upcast {
    ($ptr:expr => $target:ty) => {{
        let ptr = $ptr;
        let raw = <_ as $crate::Rebind<$target>>::pointee(&ptr).map(|p| {
            let p: ::core::ptr::NonNull<$target> = p;
            p
        });
        // The only conversion accepted above is an unsizing coercion.
        unsafe { <_ as $crate::Rebind<$target>>::rebind(ptr, raw) }
    }};
}
