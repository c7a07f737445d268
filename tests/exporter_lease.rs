//! Single-exporter election
//!
//! Two exporters over one counter store must never both drain it: the
//! collector has to see every increment exactly once.

use async_trait::async_trait;
use slotmeter::config::ExporterConfig;
use slotmeter::{AppResult, CounterSlab, DatagramSink, Exporter, TickOutcome};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CollectingSink {
    payloads: Mutex<Vec<String>>,
}

impl CollectingSink {
    /// Sum of values received for `slot`, parsed from `<domain>_<value>_<slot>`
    fn total_for(&self, slot: usize) -> u64 {
        self.payloads
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| {
                let mut parts = p.rsplitn(3, '_');
                let s: usize = parts.next()?.parse().ok()?;
                let v: u64 = parts.next()?.parse().ok()?;
                (s == slot).then_some(v)
            })
            .sum()
    }

    fn count(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }
}

#[async_trait]
impl DatagramSink for CollectingSink {
    async fn send(&self, payload: &[u8]) -> AppResult<()> {
        self.payloads
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(payload).into_owned());
        Ok(())
    }

    fn target(&self) -> String {
        "collector".to_string()
    }
}

fn config(domain: &str) -> ExporterConfig {
    ExporterConfig::default()
        .with_domain(domain)
        .with_interval_ms(5)
        .with_send_timeout_ms(5)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_exporters_deliver_each_increment_once() {
    const INCREMENTS: u64 = 20_000;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.dat");

    // Separate mappings, as two worker processes would have
    let slab_a = Arc::new(CounterSlab::open(&path, 4).unwrap());
    let slab_b = Arc::new(CounterSlab::open(&path, 4).unwrap());
    let sink = Arc::new(CollectingSink::default());

    let shutdown = CancellationToken::new();
    let a = Exporter::new(slab_a.clone(), sink.clone(), &config("a"))
        .unwrap()
        .spawn(shutdown.clone());
    let b = Exporter::new(slab_b.clone(), sink.clone(), &config("b"))
        .unwrap()
        .spawn(shutdown.clone());

    let writer = {
        let slab = slab_a.clone();
        tokio::task::spawn_blocking(move || {
            for i in 0..INCREMENTS {
                slab.increment(3).unwrap();
                if i % 1000 == 0 {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        })
    };
    writer.await.unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown.cancel();
    let metrics_a = a.await.unwrap();
    let metrics_b = b.await.unwrap();

    // Both final ticks ran after the last increment, so nothing is left
    assert_eq!(slab_b.peek()[3], 0);
    assert_eq!(sink.total_for(3), INCREMENTS);
    assert_eq!(
        metrics_a.drained_count() + metrics_b.drained_count(),
        INCREMENTS
    );
    assert!(metrics_a.ticks_skipped_count() + metrics_b.ticks_skipped_count() > 0);
}

#[tokio::test]
async fn test_lease_moves_to_survivor() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.dat");
    let slab = Arc::new(CounterSlab::open(&path, 2).unwrap());
    let sink = Arc::new(CollectingSink::default());

    let mut leader = Exporter::new(slab.clone(), sink.clone(), &config("leader")).unwrap();
    let mut follower = Exporter::new(slab.clone(), sink.clone(), &config("follower")).unwrap();

    assert!(matches!(leader.tick().await, TickOutcome::Exported { .. }));
    slab.increment(1).unwrap();
    assert_eq!(follower.tick().await, TickOutcome::Skipped);
    assert_eq!(sink.count(), 0);

    drop(leader);

    assert_eq!(
        follower.tick().await,
        TickOutcome::Exported { sent: 1, failed: 0 }
    );
    assert!(follower.holds_lease());
    assert_eq!(sink.total_for(1), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlinked_store_shares_one_lease() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.dat");
    let alias = dir.path().join("alias.dat");

    let slab_a = Arc::new(CounterSlab::open(&path, 2).unwrap());
    std::os::unix::fs::symlink(&path, &alias).unwrap();
    let slab_b = Arc::new(CounterSlab::open(&alias, 2).unwrap());
    let sink = Arc::new(CollectingSink::default());

    let mut a = Exporter::new(slab_a.clone(), sink.clone(), &config("a")).unwrap();
    let mut b = Exporter::new(slab_b.clone(), sink.clone(), &config("b")).unwrap();

    slab_a.increment(0).unwrap();
    slab_b.increment(0).unwrap();

    assert_eq!(a.tick().await, TickOutcome::Exported { sent: 1, failed: 0 });
    assert_eq!(b.tick().await, TickOutcome::Skipped);
    assert!(a.holds_lease() && !b.holds_lease());
    assert_eq!(sink.total_for(0), 2);
}
