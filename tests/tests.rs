mod fixture;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fixture::Counted;
use frc::{collect, is_thread_registered, make_array, AtomicPointer, PrivatePointer, SharedPointer, Token};

#[test]
fn make_and_drop() {
    let _token = Token::new();
    let drops = Arc::new(AtomicUsize::new(0));
    let p = SharedPointer::make(Counted::new(7, &drops));
    assert_eq!(p.value, 7);
    drop(p);
    collect();
    assert_eq!(drops.load(Ordering::Acquire), 1);
}

#[test]
fn registration_is_required() {
    assert!(!is_thread_registered());
    let token = Token::new();
    assert!(is_thread_registered());
    drop(token);
    assert!(!is_thread_registered());
}

/// Re-entrant token: nested registration scopes in the same thread.
#[test]
fn nested_tokens() {
    assert!(!is_thread_registered());
    let outer = Token::new();
    assert!(is_thread_registered());
    {
        let inner = Token::new();
        assert!(is_thread_registered());
        drop(inner);
    }
    assert!(is_thread_registered());
    drop(outer);
    assert!(!is_thread_registered());
}

/// Single-writer, many-readers hot pointer: a writer repeatedly replaces an
/// `AtomicPointer`'s target while readers continuously take pinned reads.
/// Expect no use-after-free and every allocation destroyed after collect().
#[test]
fn hot_pointer_single_writer_many_readers() {
    const WRITES: u32 = 1000;
    const READERS: usize = 4;

    let _token = Token::new();
    let drops = Arc::new(AtomicUsize::new(0));
    let target: Arc<AtomicPointer<Counted>> = Arc::new(AtomicPointer::null());
    target.store(SharedPointer::make(Counted::new(0, &drops)));

    std::thread::scope(|scope| {
        for _ in 0..READERS {
            let target = target.clone();
            scope.spawn(move || {
                let _reader_token = Token::new();
                for _ in 0..5000 {
                    let pinned: PrivatePointer<Counted> = target.pin();
                    if let Some(value) = pinned.get() {
                        assert!(value.value < WRITES);
                    }
                }
            });
        }

        for k in 1..WRITES {
            target.store(SharedPointer::make(Counted::new(k, &drops)));
        }
    });

    target.store_null();
    collect();
    assert_eq!(drops.load(Ordering::Acquire), WRITES as usize);
}

/// Rapid assignment cycle: three distinct SharedPointers, cyclically
/// reassigned many times, remain distinct and live throughout.
#[test]
fn rapid_assignment_cycle() {
    let _token = Token::new();
    let drops = Arc::new(AtomicUsize::new(0));
    let mut a = SharedPointer::make(Counted::new(0, &drops));
    let mut b = SharedPointer::make(Counted::new(1, &drops));
    let mut c = SharedPointer::make(Counted::new(2, &drops));

    for _ in 0..10_000 {
        a = b.clone();
        b = c.clone();
        c = a.clone();
    }

    assert!(!a.is_null());
    assert!(!b.is_null());
    assert!(!c.is_null());
    drop(a);
    drop(b);
    drop(c);
    collect();
    assert_eq!(drops.load(Ordering::Acquire), 3);
}

#[test]
fn array_pointer() {
    let _token = Token::new();
    let drops = Arc::new(AtomicUsize::new(0));
    let array = make_array(17, |i| Counted::new(i as u32, &drops));

    assert_eq!(array.len(), 17);
    assert_eq!(array.index(16).value, 16);

    drop(array);
    collect();
    assert_eq!(drops.load(Ordering::Acquire), 17);
}

/// A thread enqueues a large number of decrements then detaches. After the
/// creator thread calls `collect()`, every object is destroyed even though
/// the detaching thread never called `collect()` itself.
#[test]
fn detaching_thread_with_large_log() {
    let _creator = Token::new();
    let drops = Arc::new(AtomicUsize::new(0));

    {
        let drops = drops.clone();
        std::thread::spawn(move || {
            let _token = Token::new();
            let mut p = SharedPointer::make(Counted::new(0, &drops));
            for k in 1..20_000u32 {
                p = SharedPointer::make(Counted::new(k, &drops));
            }
            drop(p);
        })
        .join()
        .unwrap();
    }

    collect();
    assert_eq!(drops.load(Ordering::Acquire), 20_000);
}

/// Pushes one thread's decrement log usage past
/// `maxLogSizeBeforeBlockingHelpCall` (§6), the threshold at which `help()`
/// must take the blocking path instead of the opportunistic one (§8's
/// boundary behavior: "Log at exactly maxLogSizeBeforeBlockingHelpCall:
/// producer takes the blocking path; no deadlock"). `LOG_BUFFER_SIZE` is
/// 2^22 and the threshold is `LOG_BUFFER_SIZE - 32 * LOG_BLOCK_SIZE`
/// (constants.rs); allocate comfortably past it on a single thread with no
/// other thread around to help drain its log, so this thread's own `help()`
/// calls are the only thing keeping the log bounded.
#[test]
fn single_thread_crosses_blocking_threshold() {
    const LOG_BUFFER_SIZE: usize = 1 << 22;
    const LOG_BLOCK_SIZE: usize = 256;
    const BLOCKING_THRESHOLD: usize = LOG_BUFFER_SIZE - 32 * LOG_BLOCK_SIZE;
    const COUNT: u32 = (BLOCKING_THRESHOLD + 64 * LOG_BLOCK_SIZE) as u32;

    let _creator = Token::new();
    let drops = Arc::new(AtomicUsize::new(0));

    {
        let drops = drops.clone();
        std::thread::spawn(move || {
            let _token = Token::new();
            let mut p = SharedPointer::make(Counted::new(0, &drops));
            for k in 1..COUNT {
                p = SharedPointer::make(Counted::new(k, &drops));
            }
            drop(p);
        })
        .join()
        .unwrap();
    }

    collect();
    assert_eq!(drops.load(Ordering::Acquire), COUNT as usize);
}

#[test]
fn shared_pointer_clone_keeps_object_alive_until_last_drop() {
    let _token = Token::new();
    let drops = Arc::new(AtomicUsize::new(0));
    let a = SharedPointer::make(Counted::new(1, &drops));
    let b = a.clone();
    drop(a);
    collect();
    assert_eq!(drops.load(Ordering::Acquire), 0);
    drop(b);
    collect();
    assert_eq!(drops.load(Ordering::Acquire), 1);
}

#[test]
fn private_pointer_from_shared_owns_independently() {
    let _token = Token::new();
    let drops = Arc::new(AtomicUsize::new(0));
    let shared = SharedPointer::make(Counted::new(5, &drops));
    let private = PrivatePointer::from(&shared);
    drop(shared);
    collect();
    assert_eq!(drops.load(Ordering::Acquire), 0);
    assert_eq!(private.get().unwrap().value, 5);
    drop(private);
    collect();
    assert_eq!(drops.load(Ordering::Acquire), 1);
}
