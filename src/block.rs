//! Control blocks and the two allocation layouts.
//!
//! A [`Block`] tracks whether the owned object is still alive and how many
//! references to the block remain. Both live in a single atomic word: the top
//! bit is the expired flag and the remaining bits count references. The owner
//! holds one implicit reference for as long as it is bound to the block, and
//! each [`Observer`] holds one more.
//!
//! Owner teardown always runs in the same order:
//!
//! 1. [`Block::expire`] sets the expired flag, so no observer can see the
//!    object as alive once its destructor starts.
//! 2. The object is destroyed, either by the owner's deleter or by
//!    [`Block::drop_value`] for the combined layout.
//! 3. [`Block::release`] gives up the owner's reference.
//!
//! Whichever release brings the word to `EXPIRED | 0` frees the block.
//! Because the owner's reference is only dropped in step 3, the combined
//! layout cannot be freed by an observer while the value is being destroyed.
//!
//! [`Observer`]: crate::Observer

use core::alloc::Layout;
use core::mem::MaybeUninit;
use core::ptr::{addr_of_mut, NonNull};
use core::sync::atomic::{self, AtomicUsize, Ordering};

use crate::{heap, AllocError};

const EXPIRED: usize = 1 << (usize::BITS - 1);
const COUNT: usize = !EXPIRED;
const MAX_REFS: usize = COUNT >> 1;

#[repr(C)]
pub(crate) struct Block {
    state: AtomicUsize,
    drop_value: unsafe fn(NonNull<Block>),
    dealloc: unsafe fn(NonNull<Block>),
}

/// The combined layout: a block followed by storage for its object.
#[repr(C)]
pub(crate) struct SealedNode<T> {
    block: Block,
    value: MaybeUninit<T>,
}

unsafe fn drop_nothing(_: NonNull<Block>) {}

unsafe fn dealloc_block(block: NonNull<Block>) {
    heap::deallocate(block.cast(), Layout::new::<Block>());
}

unsafe fn drop_sealed<T>(block: NonNull<Block>) {
    let node = block.cast::<SealedNode<T>>();
    core::ptr::drop_in_place(addr_of_mut!((*node.as_ptr()).value).cast::<T>());
}

unsafe fn dealloc_sealed<T>(block: NonNull<Block>) {
    heap::deallocate(block.cast(), Layout::new::<SealedNode<T>>());
}

impl Block {
    fn header(drop_value: unsafe fn(NonNull<Block>), dealloc: unsafe fn(NonNull<Block>)) -> Block {
        Block {
            state: AtomicUsize::new(1),
            drop_value,
            dealloc,
        }
    }

    /// Allocates a standalone block for the separate layout. The caller holds
    /// the owner's reference.
    pub(crate) fn alloc() -> Result<NonNull<Block>, AllocError> {
        let block = heap::allocate(Layout::new::<Block>())?.cast::<Block>();
        unsafe {
            block
                .as_ptr()
                .write(Block::header(drop_nothing, dealloc_block));
        }

        Ok(block)
    }

    /// Adds an observer reference.
    ///
    /// `block` must be live, and the caller must already hold a reference to
    /// it (or be its owner).
    pub(crate) unsafe fn acquire(block: NonNull<Block>) {
        let state = &block.as_ref().state;
        let old = state.fetch_add(1, Ordering::Relaxed);
        if old & COUNT >= MAX_REFS {
            state.fetch_sub(1, Ordering::Relaxed);
            panic!("observer count overflow");
        }
    }

    /// Drops one reference, freeing the block if it was the last one and the
    /// block has expired.
    ///
    /// The caller must hold the reference being dropped and must not touch
    /// `block` afterwards.
    pub(crate) unsafe fn release(block: NonNull<Block>) {
        let old = block.as_ref().state.fetch_sub(1, Ordering::Release);
        debug_assert!(old & COUNT != 0);

        if old == EXPIRED | 1 {
            atomic::fence(Ordering::Acquire);
            log::trace!("freeing control block {:p}", block);
            let dealloc = block.as_ref().dealloc;
            dealloc(block);
        }
    }

    /// Marks the block expired. Only the owner may call this, exactly once.
    pub(crate) unsafe fn expire(block: NonNull<Block>) {
        let old = block.as_ref().state.fetch_or(EXPIRED, Ordering::AcqRel);
        debug_assert!(old & EXPIRED == 0, "control block expired twice");
    }

    pub(crate) unsafe fn is_expired(block: NonNull<Block>) -> bool {
        block.as_ref().state.load(Ordering::Acquire) & EXPIRED != 0
    }

    /// Gets the number of observers, excluding the owner's reference.
    pub(crate) unsafe fn observers(block: NonNull<Block>) -> usize {
        let state = block.as_ref().state.load(Ordering::Acquire);
        let refs = state & COUNT;
        if state & EXPIRED == 0 {
            refs - 1
        } else {
            refs
        }
    }

    /// Destroys the value stored in a combined allocation. Does nothing for
    /// standalone blocks.
    pub(crate) unsafe fn drop_value(block: NonNull<Block>) {
        let drop_value = block.as_ref().drop_value;
        drop_value(block);
    }
}

impl<T> SealedNode<T> {
    /// Allocates a combined block with uninitialized value storage. The caller
    /// holds the owner's reference.
    pub(crate) fn alloc() -> Result<NonNull<SealedNode<T>>, AllocError> {
        let node = heap::allocate(Layout::new::<SealedNode<T>>())?.cast::<SealedNode<T>>();
        unsafe {
            addr_of_mut!((*node.as_ptr()).block)
                .write(Block::header(drop_sealed::<T>, dealloc_sealed::<T>));
        }

        Ok(node)
    }

    pub(crate) fn block(node: NonNull<SealedNode<T>>) -> NonNull<Block> {
        node.cast()
    }

    pub(crate) fn value(node: NonNull<SealedNode<T>>) -> NonNull<T> {
        unsafe { NonNull::new_unchecked(addr_of_mut!((*node.as_ptr()).value).cast::<T>()) }
    }

    /// Frees a node whose value was never initialized and which has never
    /// been observed.
    pub(crate) unsafe fn free_uninit(node: NonNull<SealedNode<T>>) {
        heap::deallocate(node.cast(), Layout::new::<SealedNode<T>>());
    }
}
