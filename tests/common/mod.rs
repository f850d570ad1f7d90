#![allow(dead_code)]

use std::alloc::Layout;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::Once;

use observable_unique::heap::{self, Hook};
use observable_unique::Deleter;

thread_local! {
    static LIVE: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
    static DOUBLE_FREES: Cell<usize> = Cell::new(0);
    static INSTANCES: Cell<usize> = Cell::new(0);
    static INSTANCES_DERIVED: Cell<usize> = Cell::new(0);
    static INSTANCES_DELETER: Cell<usize> = Cell::new(0);
}

fn on_alloc(ptr: NonNull<u8>, _: Layout) {
    let _ = LIVE.try_with(|live| live.borrow_mut().insert(ptr.as_ptr() as usize));
}

fn on_free(ptr: NonNull<u8>, _: Layout) {
    let _ = LIVE.try_with(|live| {
        if !live.borrow_mut().remove(&(ptr.as_ptr() as usize)) {
            DOUBLE_FREES.with(|count| count.set(count.get() + 1));
        }
    });
}

static HOOK: Hook = Hook { on_alloc, on_free };
static INSTALL: Once = Once::new();

/// Counts the crate's allocations made on the current thread since the
/// tracker was created.
pub struct MemoryTracker {
    _private: (),
}

impl MemoryTracker {
    pub fn new() -> MemoryTracker {
        INSTALL.call_once(|| heap::set_hook(&HOOK));

        LIVE.with(|live| live.borrow_mut().clear());
        DOUBLE_FREES.with(|count| count.set(0));
        INSTANCES.with(|count| count.set(0));
        INSTANCES_DERIVED.with(|count| count.set(0));
        INSTANCES_DELETER.with(|count| count.set(0));

        MemoryTracker { _private: () }
    }

    pub fn allocated(&self) -> usize {
        LIVE.with(|live| live.borrow().len())
    }

    pub fn double_free(&self) -> usize {
        DOUBLE_FREES.with(|count| count.get())
    }
}

pub fn instances() -> usize {
    INSTANCES.with(|count| count.get())
}

pub fn instances_derived() -> usize {
    INSTANCES_DERIVED.with(|count| count.get())
}

pub fn instances_deleter() -> usize {
    INSTANCES_DELETER.with(|count| count.get())
}

fn increment(counter: &'static std::thread::LocalKey<Cell<usize>>) {
    counter.with(|count| count.set(count.get() + 1));
}

fn decrement(counter: &'static std::thread::LocalKey<Cell<usize>>) {
    counter.with(|count| count.set(count.get() - 1));
}

/// The base of the test hierarchy.
pub trait Object: Any {
    fn state(&self) -> i32;

    fn as_any(&self) -> &dyn Any;
}

pub struct TestObject {
    pub state: i32,
}

impl TestObject {
    pub fn new() -> TestObject {
        TestObject::with_state(1337)
    }

    pub fn with_state(state: i32) -> TestObject {
        increment(&INSTANCES);
        TestObject { state }
    }
}

impl Drop for TestObject {
    fn drop(&mut self) {
        decrement(&INSTANCES);
    }
}

impl Object for TestObject {
    fn state(&self) -> i32 {
        self.state
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct TestDerived {
    pub base: TestObject,
    pub extra: i32,
}

impl TestDerived {
    pub fn new() -> TestDerived {
        increment(&INSTANCES_DERIVED);
        TestDerived {
            base: TestObject::new(),
            extra: 42,
        }
    }
}

impl Drop for TestDerived {
    fn drop(&mut self) {
        decrement(&INSTANCES_DERIVED);
    }
}

impl Object for TestDerived {
    fn state(&self) -> i32 {
        self.base.state + self.extra
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A stateful deleter for boxed objects that counts its own instances and
/// how many objects it destroyed.
pub struct TestDeleter {
    pub state: i32,
    pub deleted: usize,
}

impl TestDeleter {
    pub fn new(state: i32) -> TestDeleter {
        increment(&INSTANCES_DELETER);
        TestDeleter { state, deleted: 0 }
    }
}

impl Default for TestDeleter {
    fn default() -> TestDeleter {
        TestDeleter::new(0)
    }
}

impl Clone for TestDeleter {
    fn clone(&self) -> TestDeleter {
        increment(&INSTANCES_DELETER);
        TestDeleter {
            state: self.state,
            deleted: self.deleted,
        }
    }
}

impl Drop for TestDeleter {
    fn drop(&mut self) {
        decrement(&INSTANCES_DELETER);
    }
}

impl<T: ?Sized> Deleter<T> for TestDeleter {
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        self.deleted += 1;
        drop(Box::from_raw(ptr.as_ptr()));
    }
}

pub fn boxed<T>(value: T) -> *mut T {
    Box::into_raw(Box::new(value))
}
