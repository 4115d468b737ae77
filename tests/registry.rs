use std::sync::{Arc, Barrier};

use binder_remote::{ObjectRegistry, RemoteObject, RemoteObjectExt};

#[test]
fn concurrent_resolve_and_death() {
    let registry = ObjectRegistry::new("/dev/binder");
    let barrier = Barrier::new(4);

    let firsts: Vec<Arc<RemoteObject>> = std::thread::scope(|s| {
        let threads: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    registry.resolve(9)
                })
            })
            .collect();
        threads.into_iter().map(|t| t.join().unwrap()).collect()
    });
    let first = firsts[0].clone();
    assert!(firsts.iter().all(|o| Arc::ptr_eq(o, &first)));

    assert!(registry.handle_death_notification(9));
    assert!(firsts.iter().all(|o| o.is_dead()));

    // every lookup after death sees a live, distinct instance
    let seconds: Vec<Arc<RemoteObject>> = std::thread::scope(|s| {
        let threads: Vec<_> = (0..4).map(|_| s.spawn(|| registry.resolve(9))).collect();
        threads.into_iter().map(|t| t.join().unwrap()).collect()
    });
    assert!(seconds.iter().all(|o| !o.is_dead()));
    assert!(seconds.iter().all(|o| Arc::ptr_eq(o, &seconds[0])));
    assert!(!Arc::ptr_eq(&seconds[0], &first));

    drop(firsts);
    drop(first);
    assert_eq!(registry.live_objects(), 1);
    drop(seconds);
    assert_eq!(registry.live_objects(), 0);
}

#[test]
fn contexts_are_independent() {
    let a = ObjectRegistry::new("/dev/binder");
    let b = ObjectRegistry::new("/dev/vndbinder");
    let obj_a = a.resolve(1);
    let obj_b = b.resolve(1);
    assert!(!Arc::ptr_eq(&obj_a, &obj_b));
    assert!(a.handle_death_notification(1));
    assert!(obj_a.is_dead());
    assert!(!obj_b.is_dead());
    let obj_b = Some(obj_b);
    assert_eq!(obj_b.registry().map(|r| r.dev()), Some("/dev/vndbinder"));
    assert_eq!(obj_b.handle(), Some(1));
}

#[test]
fn death_handler_can_resolve_again() {
    let registry = ObjectRegistry::new("/dev/binder");
    let obj = registry.resolve(2);
    let (tx, rx) = std::sync::mpsc::channel();
    obj.add_death_handler(move |dead| {
        let replacement = dead.registry().resolve(dead.handle());
        tx.send(replacement).unwrap();
    });
    registry.handle_death_notification(2);
    let replacement = rx.recv().unwrap();
    assert!(!replacement.is_dead());
    assert!(!Arc::ptr_eq(&replacement, &obj));
}
