use core::alloc::Layout;
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
use alloc::boxed::Box;

use crate::block::Block;
use crate::guard::Guard;
use crate::{
    addr, heap, null_deref, AllocError, DefaultDeleter, Deleter, MakeError, Observer, Rebind,
    Sealed,
};

/// A uniquely owned heap object that can be observed by any number of
/// [`Observer`]s.
///
/// The object and its control block are separate allocations, which is what
/// allows [`release`] to hand the object back out. Use [`Sealed`] when that is
/// not needed, to save an allocation.
///
/// `Unique` dereferences to `T`; its own operations are associated functions
/// (`Unique::reset(&mut owner)`) so they cannot shadow methods of `T`.
///
/// # Examples
/// ```
/// use observable_unique::Unique;
///
/// let owner = Unique::new(String::from("hello"));
/// let observer = Unique::observe(&owner);
/// assert!(!observer.expired());
///
/// drop(owner);
/// assert!(observer.expired());
/// ```
///
/// [`release`]: Unique::release
pub struct Unique<T: ?Sized, D: Deleter<T> = DefaultDeleter> {
    object: Option<NonNull<T>>,
    block: Option<NonNull<Block>>,
    deleter: D,
    _marker: PhantomData<T>,
}

unsafe impl<T: ?Sized + Send, D: Deleter<T> + Send> Send for Unique<T, D> {}
unsafe impl<T: ?Sized + Sync, D: Deleter<T> + Sync> Sync for Unique<T, D> {}

impl<T> Unique<T> {
    /// Moves `value` to the heap and takes ownership of it.
    ///
    /// Aborts through [`handle_alloc_error`] if allocation fails; see
    /// [`try_new`](Unique::try_new).
    pub fn new(value: T) -> Unique<T> {
        match Unique::try_new(value) {
            Ok(owner) => owner,
            Err(err) => handle_alloc_error(err.layout()),
        }
    }

    /// Moves `value` to the heap and takes ownership of it, reporting
    /// allocation failure to the caller.
    pub fn try_new(value: T) -> Result<Unique<T>, AllocError> {
        Unique::try_new_with(|| Ok::<T, Infallible>(value)).map_err(|err| match err {
            MakeError::Alloc(err) => err,
            MakeError::Construct(never) => match never {},
        })
    }

    /// Allocates storage and control block first, then constructs the object
    /// with `f`. If `f` fails or panics, or an allocation fails, everything
    /// allocated so far is released before returning.
    ///
    /// # Examples
    /// ```
    /// use observable_unique::{MakeError, Unique};
    ///
    /// let result = Unique::<u32>::try_new_with(|| "42x".parse::<u32>());
    /// assert!(matches!(result, Err(MakeError::Construct(_))));
    ///
    /// let owner = Unique::<u32>::try_new_with(|| "42".parse::<u32>()).unwrap();
    /// assert_eq!(*owner, 42);
    /// ```
    pub fn try_new_with<E, F>(f: F) -> Result<Unique<T>, MakeError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let storage = heap::allocate_for::<T>()?;
        let free_storage =
            Guard::new(|| unsafe { heap::deallocate(storage.cast(), Layout::new::<T>()) });

        let block = Block::alloc()?;
        let free_block = Guard::new(|| unsafe {
            Block::expire(block);
            Block::release(block);
        });

        let value = f().map_err(MakeError::Construct)?;
        unsafe {
            storage.as_ptr().write(value);
        }

        free_block.defuse();
        free_storage.defuse();

        Ok(Unique {
            object: Some(storage),
            block: Some(block),
            deleter: DefaultDeleter,
            _marker: PhantomData,
        })
    }
}

impl<T: ?Sized> Unique<T> {
    pub fn from_box(value: Box<T>) -> Unique<T> {
        unsafe { Unique::acquire(Some(NonNull::from(Box::leak(value))), DefaultDeleter) }
    }

    /// Takes ownership of a boxed object, reporting allocation failure of the
    /// control block to the caller. The box is dropped in that case.
    pub fn try_from_box(value: Box<T>) -> Result<Unique<T>, AllocError> {
        unsafe { Unique::try_acquire(Some(NonNull::from(Box::leak(value))), DefaultDeleter) }
    }

    /// Destroys the current object, if any, and takes ownership of `value`.
    pub fn reset_box(this: &mut Self, value: Box<T>) {
        this.destroy();
        unsafe { this.attach(Some(NonNull::from(Box::leak(value)))) };
    }

    /// Gives up ownership and returns the object as a [`Box`]. Observers see
    /// the object as expired from this point on.
    pub fn into_box(mut this: Self) -> Option<Box<T>> {
        Unique::release(&mut this).map(|object| unsafe { Box::from_raw(object.as_ptr()) })
    }
}

impl<T: ?Sized, D: Deleter<T>> Unique<T, D> {
    pub fn null() -> Self
    where
        D: Default,
    {
        Unique::null_with_deleter(D::default())
    }

    /// Creates an owner that owns nothing but holds `deleter`. No control
    /// block is allocated until an object is acquired.
    pub fn null_with_deleter(deleter: D) -> Self {
        Unique {
            object: None,
            block: None,
            deleter,
            _marker: PhantomData,
        }
    }

    /// Takes ownership of `ptr`, which may be null.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must point to a live object that a default-constructed
    /// `D` can destroy (for [`DefaultDeleter`], one obtained from
    /// [`Box::into_raw`]), and nothing else may own it.
    pub unsafe fn from_raw(ptr: *mut T) -> Self
    where
        D: Default,
    {
        Unique::from_raw_with_deleter(ptr, D::default())
    }

    /// Takes ownership of `ptr`, which may be null, to be destroyed by
    /// `deleter`.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must point to a live object that `deleter` can
    /// destroy, and nothing else may own it.
    pub unsafe fn from_raw_with_deleter(ptr: *mut T, deleter: D) -> Self {
        Unique::acquire(NonNull::new(ptr), deleter)
    }

    unsafe fn acquire(object: Option<NonNull<T>>, deleter: D) -> Self {
        match Unique::try_acquire(object, deleter) {
            Ok(owner) => owner,
            Err(err) => handle_alloc_error(err.layout()),
        }
    }

    unsafe fn try_acquire(object: Option<NonNull<T>>, deleter: D) -> Result<Self, AllocError> {
        let mut owner = Unique::null_with_deleter(deleter);
        owner.try_attach(object)?;
        Ok(owner)
    }

    unsafe fn attach(&mut self, object: Option<NonNull<T>>) {
        if let Err(err) = self.try_attach(object) {
            handle_alloc_error(err.layout());
        }
    }

    unsafe fn try_attach(&mut self, object: Option<NonNull<T>>) -> Result<(), AllocError> {
        debug_assert!(self.block.is_none());

        let object = match object {
            Some(object) => object,
            None => return Ok(()),
        };

        self.deleter.adopt(object);
        match Block::alloc() {
            Ok(block) => {
                self.object = Some(object);
                self.block = Some(block);
                Ok(())
            }
            Err(err) => {
                self.deleter.delete(object);
                Err(err)
            }
        }
    }

    fn destroy(&mut self) {
        let object = self.object.take();
        if let Some(block) = self.block.take() {
            unsafe {
                Block::expire(block);
                let _release = Guard::new(|| Block::release(block));
                if let Some(object) = object {
                    self.deleter.delete(object);
                }
            }
        }
    }

    fn into_parts(this: Self) -> (Option<NonNull<T>>, Option<NonNull<Block>>, D) {
        let this = ManuallyDrop::new(this);
        let deleter = unsafe { core::ptr::read(&this.deleter) };
        (this.object, this.block, deleter)
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

    /// Creates an observer of a part of the owned object, such as a field.
    /// The observer expires together with the whole object.
    ///
    /// # Examples
    /// ```
    /// use observable_unique::Unique;
    ///
    /// struct Pair {
    ///     left: u8,
    ///     right: u8,
    /// }
    ///
    /// let owner = Unique::new(Pair { left: 1, right: 2 });
    /// let right = Unique::observe_with(&owner, |pair| &pair.right);
    /// assert_eq!(unsafe { right.as_ref() }, Some(&2));
    ///
    /// drop(owner);
    /// assert!(right.expired());
    /// ```
    pub fn observe_with<U: ?Sized, F>(this: &Self, f: F) -> Observer<U>
    where
        F: FnOnce(&T) -> &U,
    {
        match Unique::as_ref(this) {
            Some(object) => {
                let part = NonNull::from(f(object));
                unsafe { Observer::bind(this.block, Some(part)) }
            }
            None => Observer::new(),
        }
    }

    /// Destroys the owned object, if any. The deleter is kept.
    ///
    /// Observers of the destroyed object are expired; resetting an empty
    /// owner does nothing.
    pub fn reset(this: &mut Self) {
        this.destroy();
    }

    /// Destroys the owned object, if any, and takes ownership of `ptr` using
    /// the current deleter.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw_with_deleter`](Unique::from_raw_with_deleter).
    pub unsafe fn reset_raw(this: &mut Self, ptr: *mut T) {
        this.destroy();
        this.attach(NonNull::new(ptr));
    }

    /// Destroys the owned object, if any, replaces the deleter, and takes
    /// ownership of `ptr`.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw_with_deleter`](Unique::from_raw_with_deleter).
    pub unsafe fn reset_raw_with_deleter(this: &mut Self, ptr: *mut T, deleter: D) {
        this.destroy();
        this.deleter = deleter;
        this.attach(NonNull::new(ptr));
    }

    pub fn swap(this: &mut Self, other: &mut Self) {
        core::mem::swap(this, other);
    }

    /// Gives up ownership without destroying the object, and returns it.
    ///
    /// The control block is expired immediately, so observers of the object
    /// report it as gone even though it is still alive. The deleter is not
    /// invoked and stays with the owner.
    ///
    /// # Examples
    /// ```
    /// use observable_unique::Unique;
    ///
    /// let mut owner = Unique::new(3);
    /// let observer = Unique::observe(&owner);
    ///
    /// let raw = Unique::release(&mut owner).unwrap();
    /// assert!(Unique::is_null(&owner));
    /// assert!(observer.expired());
    ///
    /// let value = unsafe { Box::from_raw(raw.as_ptr()) };
    /// assert_eq!(*value, 3);
    /// ```
    pub fn release(this: &mut Self) -> Option<NonNull<T>> {
        let object = this.object.take();
        if let Some(block) = this.block.take() {
            unsafe {
                Block::expire(block);
                if let Some(object) = object {
                    this.deleter.relinquish(object);
                }
                Block::release(block);
            }
        }

        object
    }

    /// Returns true if a custom deleter type is configured.
    pub fn has_deleter(_this: &Self) -> bool {
        <D as Deleter<T>>::CUSTOM
    }

    pub fn get_deleter(this: &Self) -> &D {
        &this.deleter
    }

    pub fn get_deleter_mut(this: &mut Self) -> &mut D {
        &mut this.deleter
    }

    /// Re-types the owner to point at `ptr`, keeping the control block and
    /// the deleter. Observers bound to the block are unaffected.
    ///
    /// A `None` pointer (a failed cast) destroys the owned object and returns
    /// an empty owner.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must be derived from [`as_ptr`](Unique::as_ptr) by a
    /// cast after which the deleter still destroys the whole object. Unrelated
    /// addresses are not detected. As with [`Sealed::rebind`], the returned
    /// owner must not outlive a borrow held by `T` or send `T` to another
    /// thread when `T` is not `Send`.
    pub unsafe fn rebind<U: ?Sized>(mut this: Self, ptr: Option<NonNull<U>>) -> Unique<U, D>
    where
        D: Deleter<U>,
    {
        debug_assert!(ptr.is_none() || this.object.is_some());

        if ptr.is_none() && this.object.is_some() {
            log::trace!("rebinding an owner to a null pointer destroys its object");
            this.destroy();
        }

        let (_, block, deleter) = Unique::into_parts(this);
        Unique {
            object: ptr,
            block,
            deleter,
            _marker: PhantomData,
        }
    }
}

impl<D: Deleter<dyn Any>> Unique<dyn Any, D> {
    /// Converts to the concrete type of the owned object, or returns the owner
    /// unchanged if the type does not match.
    ///
    /// # Examples
    /// ```
    /// use core::any::Any;
    /// use observable_unique::{upcast, Unique};
    ///
    /// let owner: Unique<dyn Any> = upcast!(Unique::new(1u8) => dyn Any);
    /// let owner = Unique::downcast::<u16>(owner).unwrap_err();
    /// let owner = Unique::downcast::<u8>(owner).unwrap();
    /// assert_eq!(*owner, 1);
    /// ```
    pub fn downcast<U: Any>(this: Self) -> Result<Unique<U, D>, Self>
    where
        D: Deleter<U>,
    {
        let object = this.object;
        match object {
            Some(object) if unsafe { object.as_ref() }.is::<U>() => {
                Ok(unsafe { Unique::rebind(this, Some(object.cast::<U>())) })
            }
            _ => Err(this),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> Drop for Unique<T, D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<T: ?Sized, D: Deleter<T> + Default> Default for Unique<T, D> {
    fn default() -> Self {
        Unique::null()
    }
}

impl<T: ?Sized> From<Box<T>> for Unique<T> {
    fn from(value: Box<T>) -> Self {
        Unique::from_box(value)
    }
}

impl<T: ?Sized, D: Deleter<T>> Deref for Unique<T, D> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self.object {
            Some(object) => unsafe { &*object.as_ptr() },
            None => null_deref(),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> DerefMut for Unique<T, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.object {
            Some(object) => unsafe { &mut *object.as_ptr() },
            None => null_deref(),
        }
    }
}

impl<T: ?Sized, U: ?Sized, D> Rebind<U> for Unique<T, D>
where
    D: Deleter<T> + Deleter<U>,
{
    type Pointee = T;
    type Output = Unique<U, D>;

    fn pointee(&self) -> Option<NonNull<T>> {
        self.object
    }

    unsafe fn rebind(self, ptr: Option<NonNull<U>>) -> Unique<U, D> {
        Unique::rebind(self, ptr)
    }
}

impl<T: ?Sized, D: Deleter<T>, U: ?Sized, E: Deleter<U>> PartialEq<Unique<U, E>> for Unique<T, D> {
    fn eq(&self, other: &Unique<U, E>) -> bool {
        addr(self.object) == addr(other.object)
    }
}

impl<T: ?Sized, D: Deleter<T>, U: ?Sized> PartialEq<Sealed<U>> for Unique<T, D> {
    fn eq(&self, other: &Sealed<U>) -> bool {
        addr(self.object) == addr(Sealed::as_ptr(other))
    }
}

impl<T: ?Sized, D: Deleter<T>, U: ?Sized> PartialEq<Observer<U>> for Unique<T, D> {
    fn eq(&self, other: &Observer<U>) -> bool {
        addr(self.object) == addr(other.as_ptr())
    }
}

impl<T: ?Sized, D: Deleter<T>> Eq for Unique<T, D> {}

impl<T: ?Sized, D: Deleter<T>> PartialOrd for Unique<T, D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized, D: Deleter<T>> Ord for Unique<T, D> {
    fn cmp(&self, other: &Self) -> Ordering {
        addr(self.object).cmp(&addr(other.object))
    }
}

impl<T: ?Sized, D: Deleter<T>> Hash for Unique<T, D> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        addr(self.object).hash(state);
    }
}

impl<T: ?Sized + fmt::Debug, D: Deleter<T>> fmt::Debug for Unique<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Unique::as_ref(self) {
            Some(object) => fmt::Debug::fmt(object, f),
            None => f.write_str("null"),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> fmt::Pointer for Unique<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&(addr(self.object) as *const u8), f)
    }
}

#[cfg(feature = "stable_deref_trait")]
unsafe impl<T: ?Sized, D: Deleter<T>> stable_deref_trait::StableDeref for Unique<T, D> {}
