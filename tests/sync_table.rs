// SyncHashTable integration tests.
//
// Invariants exercised:
// - Linearizable writes: concurrent inserts of disjoint keys all land.
// - Readers never observe a torn table: every key a reader finds carries
//   the value its writer stored.
use propstore::{IdHash, SyncHashTable, TableOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Test: writers and readers share one table across growth.
#[test]
fn readers_see_consistent_values_during_growth() {
    let table = Arc::new(SyncHashTable::new(TableOptions::new(4), IdHash).unwrap());
    let done = Arc::new(AtomicBool::new(false));
    let writers = 4u32;
    let per_writer = 2_000u32;

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let table = Arc::clone(&table);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut probes = 0u64;
                while !done.load(Ordering::Acquire) {
                    for k in (0..writers * per_writer).step_by(97) {
                        if let Some(v) = table.find(&k) {
                            assert_eq!(v, u64::from(k) * 3);
                        }
                        probes += 1;
                    }
                }
                probes
            })
        })
        .collect();

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                for i in 0..per_writer {
                    let k = w * per_writer + i;
                    table.insert(k, u64::from(k) * 3).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    done.store(true, Ordering::Release);
    for r in readers {
        assert!(r.join().unwrap() > 0);
    }

    assert_eq!(table.len(), (writers * per_writer) as usize);
    let read = table.read();
    assert!(read.capacity() >= (writers * per_writer) as usize);
    for k in 0..writers * per_writer {
        assert_eq!(read.find(&k), Some(&(u64::from(k) * 3)));
    }
}

// Test: concurrent removals of the same key succeed exactly once.
#[test]
fn concurrent_removals_claim_each_key_once() {
    let table = SyncHashTable::new(TableOptions::with_estimate(256), IdHash).unwrap();
    for k in 0..200u32 {
        table.insert(k, k).unwrap();
    }
    let claimed = std::sync::atomic::AtomicUsize::new(0);
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for k in 0..200u32 {
                    if table.take(&k).is_some() {
                        claimed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });
    assert_eq!(claimed.load(Ordering::Relaxed), 200);
    assert!(table.is_empty());
}
