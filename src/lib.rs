//! Unique-ownership smart pointers that can be observed, but never kept alive,
//! by non-owning references.
//!
//! An owner ([`Unique`] or [`Sealed`]) is the single owner of a heap object.
//! Any number of [`Observer`]s can be created from it; they can be copied,
//! moved and sent between threads independently of the owner, and each can
//! always tell whether the object still exists:
//!
//! ```
//! use observable_unique::{Observer, Unique};
//!
//! let owner = Unique::new(String::from("config"));
//! let observer: Observer<String> = Unique::observe(&owner);
//!
//! assert!(!observer.expired());
//! drop(owner);
//! assert!(observer.expired());
//! ```
//!
//! Unlike [`Weak`](alloc::sync::Weak), an observer cannot be upgraded: the
//! owner decides alone when the object dies. `expired() == true` is final,
//! while `expired() == false` may already be stale by the time it is acted
//! upon if the owner lives on another thread.
//!
//! # Owners
//!
//! - [`Unique`] allocates the object and its control block separately. It
//!   supports custom [`Deleter`]s and can hand the object back out with
//!   [`Unique::release`].
//! - [`Sealed`] stores the object and its control block in one allocation and
//!   never gives the object back out.
//!
//! Both can be converted to a trait object with [`upcast!`] and back with
//! `downcast` for `dyn Any`, keeping the control block, so observers created
//! before the conversion remain valid.
//!
//! # Memory accounting
//!
//! Every allocation and deallocation made by the crate goes through the
//! [`heap`] module, which can report them to a [`heap::Hook`].

#![no_std]

extern crate alloc;

mod block;
mod cast;
mod deleter;
mod error;
mod guard;
pub mod heap;
mod observer;
mod sealed;
mod unique;

pub use cast::Rebind;
pub use deleter::{DefaultDeleter, Deleter};
pub use error::{AllocError, MakeError};
pub use observer::Observer;
pub use sealed::Sealed;
pub use unique::Unique;

use core::ptr::NonNull;

/// The address used for comparing and hashing pointers; 0 for null.
pub(crate) fn addr<T: ?Sized>(ptr: Option<NonNull<T>>) -> usize {
    ptr.map_or(0, |ptr| ptr.cast::<u8>().as_ptr() as usize)
}

#[cold]
#[track_caller]
pub(crate) fn null_deref() -> ! {
    panic!("dereferenced a null owner")
}
