use core::any::Any;
use core::cmp::Ordering;
use core::convert::Infallible;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use alloc::alloc::handle_alloc_error;

use crate::block::{Block, SealedNode};
use crate::guard::Guard;
use crate::{addr, null_deref, AllocError, Deleter, MakeError, Observer, Rebind, Unique};

/// A uniquely owned object stored in the same allocation as its control
/// block.
///
/// Compared to [`Unique`], this saves one allocation per object, at the cost
/// of never giving ownership back out: there is no `release`, and a `Sealed`
/// can only be created by its factories. There is no deleter either; the
/// object is always dropped in place.
///
/// # Examples
/// ```
/// use observable_unique::Sealed;
///
/// let owner = Sealed::new(vec![1, 2, 3]);
/// let first = Sealed::observe(&owner);
/// let second = first.clone();
///
/// drop(first);
/// drop(owner);
/// assert!(second.expired());
/// ```
pub struct Sealed<T: ?Sized> {
    object: Option<NonNull<T>>,
    block: Option<NonNull<Block>>,
    _marker: PhantomData<T>,
}

unsafe impl<T: ?Sized + Send> Send for Sealed<T> {}
unsafe impl<T: ?Sized + Sync> Sync for Sealed<T> {}

impl<T> Sealed<T> {
    /// Allocates a combined block and moves `value` into it.
    ///
    /// Aborts through [`handle_alloc_error`] if allocation fails; see
    /// [`try_new`](Sealed::try_new).
    pub fn new(value: T) -> Sealed<T> {
        match Sealed::try_new(value) {
            Ok(owner) => owner,
            Err(err) => handle_alloc_error(err.layout()),
        }
    }

    /// Allocates a combined block and moves `value` into it, reporting
    /// allocation failure to the caller.
    pub fn try_new(value: T) -> Result<Sealed<T>, AllocError> {
        Sealed::try_new_with(|| Ok::<T, Infallible>(value)).map_err(|err| match err {
            MakeError::Alloc(err) => err,
            MakeError::Construct(never) => match never {},
        })
    }

    /// Allocates the combined block first, then constructs the object with
    /// `f` and moves it in. If `f` fails or panics, the block is freed before
    /// returning.
    pub fn try_new_with<E, F>(f: F) -> Result<Sealed<T>, MakeError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let node = SealedNode::<T>::alloc()?;
        let free_node = Guard::new(|| unsafe { SealedNode::free_uninit(node) });

        let value = f().map_err(MakeError::Construct)?;
        let object = SealedNode::value(node);
        unsafe {
            object.as_ptr().write(value);
        }

        free_node.defuse();

        Ok(Sealed {
            object: Some(object),
            block: Some(SealedNode::block(node)),
            _marker: PhantomData,
        })
    }
}

impl<T: ?Sized> Sealed<T> {
    pub const fn null() -> Self {
        Sealed {
            object: None,
            block: None,
            _marker: PhantomData,
        }
    }

    fn destroy(&mut self) {
        self.object = None;
        if let Some(block) = self.block.take() {
            unsafe {
                Block::expire(block);
                let _release = Guard::new(|| Block::release(block));
                Block::drop_value(block);
            }
        }
    }

    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.object
    }

    pub fn is_null(this: &Self) -> bool {
        this.object.is_none()
    }

    pub fn as_ref(this: &Self) -> Option<&T> {
        this.object.map(|object| unsafe { &*object.as_ptr() })
    }

    pub fn as_mut(this: &mut Self) -> Option<&mut T> {
        this.object.map(|object| unsafe { &mut *object.as_ptr() })
    }

    pub fn observe(this: &Self) -> Observer<T> {
        unsafe { Observer::bind(this.block, this.object) }
    }

    pub fn observe_with<U: ?Sized, F>(this: &Self, f: F) -> Observer<U>
    where
        F: FnOnce(&T) -> &U,
    {
        match Sealed::as_ref(this) {
            Some(object) => {
                let part = NonNull::from(f(object));
                unsafe { Observer::bind(this.block, Some(part)) }
            }
            None => Observer::new(),
        }
    }

    /// Destroys the owned object, if any, expiring its observers. Resetting
    /// an empty owner does nothing.
    pub fn reset(this: &mut Self) {
        this.destroy();
    }

    pub fn swap(this: &mut Self, other: &mut Self) {
        core::mem::swap(this, other);
    }

    /// Narrows the owner to a part of the object, such as a field. The whole
    /// object is still dropped when the returned owner is.
    ///
    /// The returned type no longer names `T`, so `T` must not borrow anything
    /// and must be safe to drop on whichever thread ends up owning the part.
    ///
    /// # Examples
    /// ```
    /// use observable_unique::Sealed;
    ///
    /// let owner = Sealed::new((String::from("left"), 7u32));
    /// let observer = Sealed::observe(&owner);
    ///
    /// let right: Sealed<u32> = Sealed::map(owner, |pair| &mut pair.1);
    /// assert_eq!(*right, 7);
    /// assert!(!observer.expired());
    /// ```
    ///
    /// A borrowed object cannot be narrowed past its borrow:
    /// ```compile_fail
    /// use observable_unique::Sealed;
    ///
    /// let mut value = 5u64;
    /// let owner = Sealed::new(&mut value);
    /// let inner: Sealed<u64> = Sealed::map(owner, |r| &mut **r);
    /// ```
    ///
    /// Nor can a thread-bound object hide behind a sendable part:
    /// ```compile_fail
    /// use std::rc::Rc;
    /// use observable_unique::Sealed;
    ///
    /// let owner = Sealed::new((Rc::new(1u8), 7u32));
    /// let right: Sealed<u32> = Sealed::map(owner, |pair| &mut pair.1);
    /// ```
    pub fn map<U: ?Sized, F>(this: Self, f: F) -> Sealed<U>
    where
        T: Send + 'static,
        F: FnOnce(&mut T) -> &mut U,
    {
        let object = match this.object {
            Some(mut object) => Some(NonNull::from(f(unsafe { object.as_mut() }))),
            None => None,
        };

        // The block drops the whole value, whatever `object` points to.
        unsafe { Sealed::rebind(this, object) }
    }

    /// Re-types the owner to point at `ptr`, keeping the control block.
    /// Observers bound to the block are unaffected.
    ///
    /// A `None` pointer (a failed cast) destroys the owned object and returns
    /// an empty owner.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must point into the owned object and be valid for
    /// reads and writes as a `U` for as long as the object lives. The returned
    /// owner must not outlive any borrow held by `T`, nor move `T` to a thread
    /// it cannot be sent to.
    pub unsafe fn rebind<U: ?Sized>(mut this: Self, ptr: Option<NonNull<U>>) -> Sealed<U> {
        debug_assert!(ptr.is_none() || this.object.is_some());

        if ptr.is_none() && this.object.is_some() {
            log::trace!("rebinding an owner to a null pointer destroys its object");
            this.destroy();
        }

        let this = ManuallyDrop::new(this);
        Sealed {
            object: ptr,
            block: this.block,
            _marker: PhantomData,
        }
    }
}

impl Sealed<dyn Any> {
    /// Converts to the concrete type of the owned object, or returns the owner
    /// unchanged if the type does not match.
    pub fn downcast<U: Any>(this: Self) -> Result<Sealed<U>, Self> {
        let object = this.object;
        match object {
            Some(object) if unsafe { object.as_ref() }.is::<U>() => {
                Ok(unsafe { Sealed::rebind(this, Some(object.cast::<U>())) })
            }
            _ => Err(this),
        }
    }
}

impl<T: ?Sized> Drop for Sealed<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<T: ?Sized> Default for Sealed<T> {
    fn default() -> Self {
        Sealed::null()
    }
}

impl<T: ?Sized> Deref for Sealed<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self.object {
            Some(object) => unsafe { &*object.as_ptr() },
            None => null_deref(),
        }
    }
}

impl<T: ?Sized> DerefMut for Sealed<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.object {
            Some(object) => unsafe { &mut *object.as_ptr() },
            None => null_deref(),
        }
    }
}

impl<T: ?Sized, U: ?Sized> Rebind<U> for Sealed<T> {
    type Pointee = T;
    type Output = Sealed<U>;

    fn pointee(&self) -> Option<NonNull<T>> {
        self.object
    }

    unsafe fn rebind(self, ptr: Option<NonNull<U>>) -> Sealed<U> {
        Sealed::rebind(self, ptr)
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<Sealed<U>> for Sealed<T> {
    fn eq(&self, other: &Sealed<U>) -> bool {
        addr(self.object) == addr(other.object)
    }
}

impl<T: ?Sized, U: ?Sized, D: Deleter<U>> PartialEq<Unique<U, D>> for Sealed<T> {
    fn eq(&self, other: &Unique<U, D>) -> bool {
        addr(self.object) == addr(Unique::as_ptr(other))
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<Observer<U>> for Sealed<T> {
    fn eq(&self, other: &Observer<U>) -> bool {
        addr(self.object) == addr(other.as_ptr())
    }
}

impl<T: ?Sized> Eq for Sealed<T> {}

impl<T: ?Sized> PartialOrd for Sealed<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized> Ord for Sealed<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        addr(self.object).cmp(&addr(other.object))
    }
}

impl<T: ?Sized> Hash for Sealed<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        addr(self.object).hash(state);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Sealed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Sealed::as_ref(self) {
            Some(object) => fmt::Debug::fmt(object, f),
            None => f.write_str("null"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for Sealed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&(addr(self.object) as *const u8), f)
    }
}

#[cfg(feature = "stable_deref_trait")]
unsafe impl<T: ?Sized> stable_deref_trait::StableDeref for Sealed<T> {}

#[test]
fn test() {
    extern crate std;

    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Test(Arc<AtomicUsize>);

    impl Drop for Test {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    let counter = Arc::new(AtomicUsize::new(0));

    let owner = Sealed::new((Test(counter.clone()), 5u32));
    let observers: std::vec::Vec<_> = (0..10).map(|_| Sealed::observe(&owner)).collect();
    assert_eq!(observers[0].observer_count(), 10);

    let part = Sealed::map(owner, |pair| &mut pair.1);
    assert_eq!(*part, 5);
    assert_eq!(counter.load(Ordering::Relaxed), 0);

    drop(part);
    assert_eq!(counter.load(Ordering::Relaxed), 1);
    assert!(observers.iter().all(|observer| observer.expired()));
}
