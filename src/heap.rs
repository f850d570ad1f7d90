//! The allocation funnel.
//!
//! Every allocation and deallocation performed by this crate passes through
//! this module: control blocks, sealed nodes, objects created by the
//! factories, and objects destroyed by [`DefaultDeleter`]. Boxes handed to
//! [`Unique::from_box`] are reported as allocations when they are adopted, and
//! reported as deallocations when [`Unique::release`] or [`Unique::into_box`]
//! hands them back out.
//!
//! A [`Hook`] installed with [`set_hook`] sees each of these events, which is
//! enough to count outstanding allocations and detect double frees from a
//! test harness.
//!
//! [`DefaultDeleter`]: crate::DefaultDeleter
//! [`Unique::from_box`]: crate::Unique::from_box
//! [`Unique::release`]: crate::Unique::release
//! [`Unique::into_box`]: crate::Unique::into_box

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::AllocError;

/// Callbacks notified of every allocation event in the funnel.
///
/// Zero-sized layouts never reach the hook.
///
/// # Examples
/// ```
/// use core::alloc::Layout;
/// use core::ptr::NonNull;
/// use observable_unique::heap::{self, Hook};
///
/// fn on_alloc(_: NonNull<u8>, _: Layout) {}
/// fn on_free(_: NonNull<u8>, _: Layout) {}
///
/// static HOOK: Hook = Hook { on_alloc, on_free };
///
/// heap::set_hook(&HOOK);
/// # heap::clear_hook();
/// ```
#[derive(Debug)]
pub struct Hook {
    /// Called after memory has been allocated or adopted.
    pub on_alloc: fn(NonNull<u8>, Layout),
    /// Called before memory is deallocated or relinquished.
    pub on_free: fn(NonNull<u8>, Layout),
}

static HOOK: AtomicPtr<Hook> = AtomicPtr::new(core::ptr::null_mut());
static LIVE: AtomicUsize = AtomicUsize::new(0);

/// Installs `hook`, replacing any previously installed hook.
pub fn set_hook(hook: &'static Hook) {
    HOOK.store(hook as *const Hook as *mut Hook, Ordering::Release);
}

/// Removes the installed hook, if any.
pub fn clear_hook() {
    HOOK.store(core::ptr::null_mut(), Ordering::Release);
}

/// Gets the number of allocations currently outstanding across all threads.
pub fn live_allocations() -> usize {
    LIVE.load(Ordering::Relaxed)
}

fn hook() -> Option<&'static Hook> {
    let hook = HOOK.load(Ordering::Acquire);
    // Only ever set from a `&'static Hook`.
    unsafe { hook.as_ref() }
}

/// Records `ptr` as an allocation owned by the crate without allocating.
pub(crate) fn adopt(ptr: NonNull<u8>, layout: Layout) {
    if layout.size() == 0 {
        return;
    }

    LIVE.fetch_add(1, Ordering::Relaxed);
    if let Some(hook) = hook() {
        (hook.on_alloc)(ptr, layout);
    }
}

/// Records that `ptr` is no longer owned by the crate without freeing it.
pub(crate) fn relinquish(ptr: NonNull<u8>, layout: Layout) {
    if layout.size() == 0 {
        return;
    }

    if let Some(hook) = hook() {
        (hook.on_free)(ptr, layout);
    }
    LIVE.fetch_sub(1, Ordering::Relaxed);
}

/// Allocates memory for `layout`, which must have a non-zero size.
pub(crate) fn allocate(layout: Layout) -> Result<NonNull<u8>, AllocError> {
    debug_assert!(layout.size() != 0);

    let ptr = unsafe { alloc::alloc::alloc(layout) };
    match NonNull::new(ptr) {
        Some(ptr) => {
            adopt(ptr, layout);
            Ok(ptr)
        }
        None => {
            log::debug!(
                "allocation of {} bytes (align {}) failed",
                layout.size(),
                layout.align()
            );
            Err(AllocError::new(layout))
        }
    }
}

/// Allocates uninitialized storage for a `T`. Zero-sized types get a dangling
/// pointer and no allocation.
pub(crate) fn allocate_for<T>() -> Result<NonNull<T>, AllocError> {
    let layout = Layout::new::<T>();
    if layout.size() == 0 {
        return Ok(NonNull::dangling());
    }

    allocate(layout).map(NonNull::cast)
}

/// Frees memory previously returned by [`allocate`] or adopted with the same
/// layout. Zero-sized layouts are ignored.
pub(crate) unsafe fn deallocate(ptr: NonNull<u8>, layout: Layout) {
    if layout.size() == 0 {
        return;
    }

    relinquish(ptr, layout);
    alloc::alloc::dealloc(ptr.as_ptr(), layout);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_allocations_are_dangling() {
        let ptr = allocate_for::<()>().unwrap();
        assert_eq!(ptr, NonNull::dangling());
        unsafe {
            deallocate(ptr.cast(), Layout::new::<()>());
        }
    }

    #[test]
    fn allocate_and_free() {
        let layout = Layout::new::<u64>();
        let ptr = allocate(layout).unwrap();
        assert_eq!(ptr.as_ptr() as usize % layout.align(), 0);
        unsafe {
            deallocate(ptr, layout);
        }
    }
}
