mod common;

use std::any::Any;

use common::*;
use observable_unique::{upcast, MakeError, Observer, Sealed};

type TestPtr = Sealed<TestObject>;

#[test]
fn default_constructor() {
    let mem = MemoryTracker::new();
    {
        let ptr = TestPtr::default();
        assert!(Sealed::is_null(&ptr));
        assert!(Sealed::observe(&ptr).is_null());
    }

    assert_eq!(instances(), 0);
    assert_eq!(mem.allocated(), 0);
}

#[test]
fn make_is_a_single_allocation() {
    let mem = MemoryTracker::new();
    {
        let ptr = TestPtr::new(TestObject::new());
        assert_eq!(instances(), 1);
        assert_eq!(ptr.state, 1337);
        assert_eq!(mem.allocated(), 1);
    }

    assert_eq!(instances(), 0);
    assert_eq!(mem.allocated(), 0);
    assert_eq!(mem.double_free(), 0);
}

#[test]
fn observers_outlive_owner() {
    let mem = MemoryTracker::new();
    {
        let ptr = TestPtr::new(TestObject::new());
        let first = Sealed::observe(&ptr);
        let second = first.clone();
        assert_eq!(first.observer_count(), 2);

        drop(first);
        assert!(!second.expired());

        drop(ptr);
        assert_eq!(instances(), 0);
        assert!(second.expired());
        // The combined allocation stays until the last observer is gone.
        assert_eq!(mem.allocated(), 1);

        drop(second);
    }

    assert_eq!(mem.allocated(), 0);
    assert_eq!(mem.double_free(), 0);
}

#[test]
fn owner_outlives_observers() {
    let mem = MemoryTracker::new();
    {
        let ptr = TestPtr::new(TestObject::new());
        {
            let observer = Sealed::observe(&ptr);
            assert!(!observer.expired());
        }
        assert_eq!(instances(), 1);
    }

    assert_eq!(instances(), 0);
    assert_eq!(mem.allocated(), 0);
    assert_eq!(mem.double_free(), 0);
}

#[test]
fn reset() {
    let mem = MemoryTracker::new();
    {
        let mut ptr = TestPtr::new(TestObject::new());
        let observer = Sealed::observe(&ptr);

        Sealed::reset(&mut ptr);
        assert!(Sealed::is_null(&ptr));
        assert!(observer.expired());
        assert_eq!(instances(), 0);

        Sealed::reset(&mut ptr);
        assert!(Sealed::is_null(&ptr));
    }

    assert_eq!(mem.allocated(), 0);
    assert_eq!(mem.double_free(), 0);
}

#[test]
fn move_assignment_expires_previous() {
    let mem = MemoryTracker::new();
    {
        let mut ptr = TestPtr::new(TestObject::with_state(1));
        let stale = Sealed::observe(&ptr);
        let orig = TestPtr::new(TestObject::with_state(2));
        let kept = Sealed::observe(&orig);

        ptr = orig;
        assert_eq!(ptr.state, 2);
        assert!(stale.expired());
        assert!(!kept.expired());
        assert!(ptr == kept);
        assert_eq!(instances(), 1);
    }

    assert_eq!(instances(), 0);
    assert_eq!(mem.allocated(), 0);
}

#[test]
fn swap() {
    let mem = MemoryTracker::new();
    {
        let mut a = TestPtr::new(TestObject::with_state(1));
        let mut b = TestPtr::null();
        let observer = Sealed::observe(&a);

        Sealed::swap(&mut a, &mut b);
        assert!(Sealed::is_null(&a));
        assert_eq!(b.state, 1);
        assert!(b == observer);

        drop(b);
        assert!(observer.expired());
    }

    assert_eq!(instances(), 0);
    assert_eq!(mem.allocated(), 0);
}

#[test]
fn upcast_keeps_block() {
    let mem = MemoryTracker::new();
    {
        let ptr = Sealed::new(TestDerived::new());
        let observer = Sealed::observe(&ptr);

        let base: Sealed<dyn Object> = upcast!(ptr => dyn Object);
        assert_eq!(base.state(), 1337 + 42);
        assert!(base == observer);
        assert_eq!(mem.allocated(), 1);

        let base_observer: Observer<dyn Object> = Sealed::observe(&base);
        assert_eq!(base_observer.observer_count(), 2);

        drop(base);
        assert!(observer.expired());
        assert!(base_observer.expired());
        assert_eq!(instances_derived(), 0);
    }

    assert_eq!(instances(), 0);
    assert_eq!(mem.allocated(), 0);
    assert_eq!(mem.double_free(), 0);
}

#[test]
fn downcast() {
    let mem = MemoryTracker::new();
    {
        let ptr: Sealed<dyn Any> = upcast!(Sealed::new(TestDerived::new()) => dyn Any);
        let observer = Sealed::observe(&ptr);

        let ptr = match Sealed::downcast::<TestObject>(ptr) {
            Ok(_) => panic!("downcast to the wrong type succeeded"),
            Err(ptr) => ptr,
        };
        let ptr = match Sealed::downcast::<TestDerived>(ptr) {
            Ok(ptr) => ptr,
            Err(_) => panic!("downcast failed"),
        };

        assert_eq!(ptr.extra, 42);
        assert!(!observer.expired());
    }

    assert_eq!(instances(), 0);
    assert_eq!(instances_derived(), 0);
    assert_eq!(mem.allocated(), 0);
    assert_eq!(mem.double_free(), 0);
}

#[test]
fn explicit_conversion_to_null_destroys() {
    let mem = MemoryTracker::new();
    {
        let ptr = TestPtr::new(TestObject::new());
        let observer = Sealed::observe(&ptr);

        let ptr: Sealed<TestDerived> = unsafe { Sealed::rebind(ptr, None) };
        assert!(Sealed::is_null(&ptr));
        assert!(observer.expired());
        assert_eq!(instances(), 0);
        assert_eq!(mem.allocated(), 1);
    }

    assert_eq!(mem.allocated(), 0);
    assert_eq!(mem.double_free(), 0);
}

#[test]
fn map_to_field() {
    let mem = MemoryTracker::new();
    {
        let ptr = Sealed::new(TestDerived::new());
        let whole = Sealed::observe(&ptr);

        let base: Sealed<TestObject> = Sealed::map(ptr, |derived| &mut derived.base);
        assert_eq!(base.state, 1337);
        assert_eq!(instances_derived(), 1);
        assert!(!whole.expired());

        drop(base);
        assert_eq!(instances_derived(), 0);
        assert_eq!(instances(), 0);
        assert!(whole.expired());
    }

    assert_eq!(mem.allocated(), 0);
    assert_eq!(mem.double_free(), 0);
}

#[test]
fn make_constructor_error() {
    let mem = MemoryTracker::new();

    let result = TestPtr::try_new_with(|| Err::<TestObject, _>(7));
    assert_eq!(result.err().and_then(MakeError::into_construct), Some(7));

    assert_eq!(instances(), 0);
    assert_eq!(mem.allocated(), 0);
    assert_eq!(mem.double_free(), 0);
}

#[test]
fn make_constructor_panic() {
    let mem = MemoryTracker::new();

    let result = std::panic::catch_unwind(|| {
        TestPtr::try_new_with(|| -> Result<TestObject, ()> { panic!("constructor panicked") })
    });
    assert!(result.is_err());

    assert_eq!(instances(), 0);
    assert_eq!(mem.allocated(), 0);
    assert_eq!(mem.double_free(), 0);
}

#[test]
fn destructor_sees_expired_observer() {
    use std::cell::Cell;
    use std::rc::Rc;

    struct Watch {
        observer: Rc<Cell<Option<Observer<i32>>>>,
        saw_expired: Rc<Cell<bool>>,
    }

    impl Drop for Watch {
        fn drop(&mut self) {
            if let Some(observer) = self.observer.take() {
                self.saw_expired.set(observer.expired());
            }
        }
    }

    let slot = Rc::new(Cell::new(None));
    let saw_expired = Rc::new(Cell::new(false));

    let ptr = Sealed::new((
        Watch {
            observer: slot.clone(),
            saw_expired: saw_expired.clone(),
        },
        5,
    ));
    slot.set(Some(Sealed::observe_with(&ptr, |pair| &pair.1)));

    drop(ptr);
    assert!(saw_expired.get());
}

#[test]
fn mapped_part_drops_whole_object_on_another_thread() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    struct Counted(Arc<AtomicUsize>);

    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    let dropped = Arc::new(AtomicUsize::new(0));
    let ptr = Sealed::new((Counted(dropped.clone()), 7u32));
    let observer = Sealed::observe(&ptr);

    let part: Sealed<u32> = Sealed::map(ptr, |pair| &mut pair.1);
    assert_eq!(*part, 7);
    assert!(!observer.expired());

    thread::spawn(move || drop(part)).join().unwrap();
    assert!(observer.expired());
    assert_eq!(dropped.load(Ordering::Relaxed), 1);
    assert_eq!(Arc::strong_count(&dropped), 1);
}
