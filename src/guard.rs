use core::mem::ManuallyDrop;

/// Runs a cleanup closure when dropped, including while unwinding, unless
/// [`defuse`](Guard::defuse) is called first.
pub(crate) struct Guard<F>
where
    F: FnOnce(),
{
    f: ManuallyDrop<F>,
}

impl<F> Guard<F>
where
    F: FnOnce(),
{
    pub(crate) fn new(f: F) -> Self {
        Guard {
            f: ManuallyDrop::new(f),
        }
    }

    /// Drops the closure without running it.
    pub(crate) fn defuse(self) {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so `f` is not touched again.
        unsafe { ManuallyDrop::drop(&mut this.f) };
    }
}

impl<F> Drop for Guard<F>
where
    F: FnOnce(),
{
    fn drop(&mut self) {
        // SAFETY: self.f will not be used anymore.
        let f = unsafe { ManuallyDrop::take(&mut self.f) };
        f();
    }
}
