use core::alloc::Layout;

/// The heap refused an allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("failed to allocate {size} bytes with alignment {align}")]
pub struct AllocError {
    size: usize,
    align: usize,
}

impl AllocError {
    pub(crate) fn new(layout: Layout) -> AllocError {
        AllocError {
            size: layout.size(),
            align: layout.align(),
        }
    }

    /// Gets the layout of the failed allocation.
    pub fn layout(&self) -> Layout {
        // Constructed from a valid layout.
        unsafe { Layout::from_size_align_unchecked(self.size, self.align) }
    }
}

/// The error returned by fallible factories such as
/// [`Unique::try_new_with`](crate::Unique::try_new_with).
///
/// Whichever variant is returned, any storage allocated for the object and its
/// control block has already been released.
#[derive(Debug, thiserror::Error)]
pub enum MakeError<E> {
    /// Storage for the object or its control block could not be allocated.
    #[error(transparent)]
    Alloc(#[from] AllocError),
    /// The object's constructor failed.
    #[error("constructor failed: {0}")]
    Construct(E),
}

impl<E> MakeError<E> {
    /// Returns the constructor's error, if that is what failed.
    pub fn into_construct(self) -> Option<E> {
        match self {
            MakeError::Construct(err) => Some(err),
            MakeError::Alloc(_) => None,
        }
    }
}
