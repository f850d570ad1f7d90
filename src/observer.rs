use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ptr::NonNull;

use crate::block::Block;
use crate::{addr, Deleter, Rebind, Sealed, Unique};

/// A non-owning reference to an object held by a [`Unique`] or [`Sealed`].
///
/// An observer never keeps its object alive. It can always tell whether the
/// object still exists with [`expired`], from any thread, and it keeps the
/// address it was created with even after the object is gone.
///
/// # Examples
/// ```
/// use observable_unique::{Observer, Unique};
///
/// let mut owner = Unique::new(1);
/// let observer = Unique::observe(&owner);
/// let copy = observer.clone();
///
/// Unique::reset_box(&mut owner, Box::new(2));
/// assert!(observer.expired() && copy.expired());
///
/// let fresh: Observer<i32> = Observer::from(&owner);
/// assert!(!fresh.expired());
/// ```
///
/// [`expired`]: Observer::expired
pub struct Observer<T: ?Sized> {
    object: Option<NonNull<T>>,
    block: Option<NonNull<Block>>,
    _marker: PhantomData<*const T>,
}

unsafe impl<T: ?Sized + Send + Sync> Send for Observer<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for Observer<T> {}

impl<T: ?Sized> Observer<T> {
    /// Creates an observer of nothing. It is always expired.
    pub const fn new() -> Observer<T> {
        Observer {
            object: None,
            block: None,
            _marker: PhantomData,
        }
    }

    pub(crate) unsafe fn bind(
        block: Option<NonNull<Block>>,
        object: Option<NonNull<T>>,
    ) -> Observer<T> {
        match (block, object) {
            (Some(block), Some(object)) => {
                Block::acquire(block);
                Observer {
                    object: Some(object),
                    block: Some(block),
                    _marker: PhantomData,
                }
            }
            _ => Observer::new(),
        }
    }

    /// Returns true if the observed object has been destroyed or released, or
    /// if nothing is observed.
    pub fn expired(&self) -> bool {
        match self.block {
            Some(block) => unsafe { Block::is_expired(block) },
            None => true,
        }
    }

    /// Gets the observed address. It is returned even after the object has
    /// expired, in which case it must not be dereferenced.
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.object
    }

    pub fn is_null(&self) -> bool {
        self.object.is_none()
    }

    /// Gets a reference to the observed object, or `None` if it has expired.
    ///
    /// # Safety
    ///
    /// The object must not be destroyed or mutated while the returned
    /// reference is alive. Checking [`expired`](Observer::expired) is not
    /// enough when the owner lives on another thread.
    pub unsafe fn as_ref(&self) -> Option<&T> {
        if self.expired() {
            return None;
        }

        let object = self.object?;
        let object = &*object.as_ptr();
        debug_assert!(
            !self.expired(),
            "observed object expired while being accessed"
        );
        Some(object)
    }

    /// Gets the number of observers bound to the same control block,
    /// including this one. Returns 0 for an empty observer.
    pub fn observer_count(&self) -> usize {
        match self.block {
            Some(block) => unsafe { Block::observers(block) },
            None => 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Observer::new();
    }

    pub fn swap(&mut self, other: &mut Observer<T>) {
        core::mem::swap(self, other);
    }

    /// Re-types the observer to point at `ptr`, keeping the control block.
    ///
    /// A `None` pointer (a failed cast) yields an empty observer, which is
    /// expired; other observers of the same object are unaffected.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must point into the observed object. Unrelated
    /// addresses are not detected.
    pub unsafe fn rebind<U: ?Sized>(this: Self, ptr: Option<NonNull<U>>) -> Observer<U> {
        match ptr {
            Some(ptr) => {
                let this = ManuallyDrop::new(this);
                Observer {
                    object: Some(ptr),
                    block: this.block,
                    _marker: PhantomData,
                }
            }
            None => Observer::new(),
        }
    }
}

impl<T: ?Sized> Drop for Observer<T> {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            unsafe {
                Block::release(block);
            }
        }
    }
}

impl<T: ?Sized> Clone for Observer<T> {
    fn clone(&self) -> Self {
        unsafe { Observer::bind(self.block, self.object) }
    }
}

impl<T: ?Sized> Default for Observer<T> {
    fn default() -> Self {
        Observer::new()
    }
}

impl<T: ?Sized, D: Deleter<T>> From<&Unique<T, D>> for Observer<T> {
    fn from(owner: &Unique<T, D>) -> Self {
        Unique::observe(owner)
    }
}

impl<T: ?Sized> From<&Sealed<T>> for Observer<T> {
    fn from(owner: &Sealed<T>) -> Self {
        Sealed::observe(owner)
    }
}

impl<T: ?Sized, U: ?Sized> Rebind<U> for Observer<T> {
    type Pointee = T;
    type Output = Observer<U>;

    fn pointee(&self) -> Option<NonNull<T>> {
        self.object
    }

    unsafe fn rebind(self, ptr: Option<NonNull<U>>) -> Observer<U> {
        Observer::rebind(self, ptr)
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<Observer<U>> for Observer<T> {
    fn eq(&self, other: &Observer<U>) -> bool {
        addr(self.object) == addr(other.object)
    }
}

impl<T: ?Sized, U: ?Sized, D: Deleter<U>> PartialEq<Unique<U, D>> for Observer<T> {
    fn eq(&self, other: &Unique<U, D>) -> bool {
        addr(self.object) == addr(Unique::as_ptr(other))
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<Sealed<U>> for Observer<T> {
    fn eq(&self, other: &Sealed<U>) -> bool {
        addr(self.object) == addr(Sealed::as_ptr(other))
    }
}

impl<T: ?Sized> Eq for Observer<T> {}

impl<T: ?Sized> PartialOrd for Observer<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized> Ord for Observer<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        addr(self.object).cmp(&addr(other.object))
    }
}

impl<T: ?Sized> Hash for Observer<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        addr(self.object).hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("ptr", &(addr(self.object) as *const u8))
            .field("expired", &self.expired())
            .finish()
    }
}

impl<T: ?Sized> fmt::Pointer for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&(addr(self.object) as *const u8), f)
    }
}

#[test]
fn test() {
    let owner = Unique::new(5);
    let observer = Unique::observe(&owner);

    let mut copies = alloc::vec::Vec::new();
    for _ in 0..10 {
        copies.push(observer.clone());
    }
    assert_eq!(observer.observer_count(), 11);
    assert!(copies.iter().all(|copy| *copy == observer));

    let mut moved = copies.pop().unwrap();
    assert_eq!(observer.observer_count(), 11);
    moved.reset();
    assert!(moved.expired());
    assert_eq!(observer.observer_count(), 10);

    drop(owner);
    assert!(observer.expired());
    assert!(copies.iter().all(|copy| copy.expired()));
    assert_eq!(observer.observer_count(), 10);

    drop(copies);
    assert_eq!(observer.observer_count(), 1);
}
