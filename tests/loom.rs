#![cfg(loom)]

use std::sync::Arc;

use frc::loom_support::TreeRouter;

/// Acquire/release on a single leaf is a no-op round trip regardless of
/// interleaving (§8's round-trip law).
#[test]
fn acquire_release_round_trip() {
    loom::model(|| {
        let tree = TreeRouter::new(4);
        tree.acquire(2);
        tree.release(2);
        assert!(!tree.status());
    });
}

/// Two threads concurrently acquiring distinct leaves both observe the
/// root as acquired, and releasing both leaves clears it again.
#[test]
fn concurrent_acquire_from_distinct_leaves() {
    loom::model(|| {
        let tree = Arc::new(TreeRouter::new(4));

        let t1 = {
            let tree = tree.clone();
            loom::thread::spawn(move || tree.acquire(0))
        };
        let t2 = {
            let tree = tree.clone();
            loom::thread::spawn(move || tree.acquire(1))
        };
        t1.join().unwrap();
        t2.join().unwrap();

        assert!(tree.status());
        tree.release(0);
        tree.release(1);
        assert!(!tree.status());
    });
}

/// A release that clears the whole tree is reported via `cyclic_release`
/// no matter which of two concurrent releases happens last.
#[test]
fn cyclic_release_reports_exactly_once() {
    loom::model(|| {
        let tree = Arc::new(TreeRouter::new(2));
        tree.acquire(0);
        tree.acquire(1);

        let tree2 = tree.clone();
        let t1 = loom::thread::spawn(move || tree2.cyclic_release(0));
        let cleared_here = tree.cyclic_release(1);
        let cleared_there = t1.join().unwrap();

        assert!(cleared_here ^ cleared_there);
    });
}

/// `find_acquired` returns nothing for a tree with no acquired leaves.
#[test]
fn find_acquired_on_empty_tree_is_none() {
    loom::model(|| {
        let tree = TreeRouter::new(8);
        assert_eq!(tree.find_acquired(), None);
    });
}
