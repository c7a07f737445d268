//! Lost-update tests for the shared counter store
//!
//! Several handles on the same backing file stand in for separate worker
//! processes: each has its own mapping of the same pages.

use slotmeter::CounterSlab;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

const WRITERS: usize = 8;
const INCREMENTS: u64 = 20_000;

#[test]
fn test_no_lost_increments_across_mappings_with_concurrent_drain() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.dat");

    // One mapping per writer, as separate processes would have
    let writers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let slab = CounterSlab::open(&path, 4).expect("should open slab");
            std::thread::spawn(move || {
                for _ in 0..INCREMENTS {
                    slab.increment(1).unwrap();
                }
            })
        })
        .collect();

    let drainer_slab = CounterSlab::open(&path, 4).unwrap();
    let done = Arc::new(AtomicBool::new(false));
    let drainer = {
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let mut total = 0u64;
            let mut drains = 0u32;
            while !done.load(Ordering::Acquire) {
                let snapshot = drainer_slab.drain_and_reset();
                total += u64::from(snapshot[1]);
                assert_eq!(snapshot[0], 0);
                assert_eq!(snapshot[2], 0);
                drains += 1;
            }
            // Pick up whatever landed after the last loop drain
            total += u64::from(drainer_slab.drain_and_reset()[1]);
            (total, drains)
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    let (total, drains) = drainer.join().unwrap();

    assert!(drains > 0);
    assert_eq!(total, WRITERS as u64 * INCREMENTS);
}

#[test]
fn test_no_lost_increments_with_multiple_drainers() {
    let dir = TempDir::new().unwrap();
    let slab = Arc::new(CounterSlab::open(dir.path().join("metrics.dat"), 2).unwrap());

    let writers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let slab = Arc::clone(&slab);
            std::thread::spawn(move || {
                for _ in 0..INCREMENTS {
                    slab.increment(0).unwrap();
                }
            })
        })
        .collect();

    let drainers: Vec<_> = (0..3)
        .map(|_| {
            let slab = Arc::clone(&slab);
            std::thread::spawn(move || {
                (0..500)
                    .map(|_| u64::from(slab.drain_and_reset()[0]))
                    .sum::<u64>()
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    let drained: u64 = drainers.into_iter().map(|d| d.join().unwrap()).sum();
    let remaining = u64::from(slab.drain_and_reset()[0]);

    assert_eq!(drained + remaining, WRITERS as u64 * INCREMENTS);
}

#[test]
fn test_drain_resets_to_zero() {
    let dir = TempDir::new().unwrap();
    let slab = CounterSlab::open(dir.path().join("metrics.dat"), 5).unwrap();

    for slot in 0..5 {
        for _ in 0..=slot {
            slab.increment(slot).unwrap();
        }
    }

    assert_eq!(slab.drain_and_reset(), vec![1, 2, 3, 4, 5]);
    assert_eq!(slab.drain_and_reset(), vec![0, 0, 0, 0, 0]);
}
