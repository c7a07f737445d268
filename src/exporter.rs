//! Collector/exporter
//!
//! A periodic task that drains the counter store and ships every non-zero
//! slot to a remote collector as a plaintext datagram
//! (`<domain>_<value>_<slot>`). Export is best-effort: a failed send is
//! logged and counted, never retried.
//!
//! Only the process holding the store's export lease drains it. Exporters in
//! other processes keep ticking and take over once the holder goes away.

use crate::config::ExporterConfig;
use crate::error::{AppError, AppResult};
use crate::lease::ExportLease;
use crate::metrics::{ExporterMetrics, SendFailure};
use crate::slab::CounterSlab;
use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// One exported observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    pub domain: String,
    pub slot: usize,
    pub value: u32,
}

impl ExportRecord {
    /// Build records for every non-zero slot of a drained snapshot
    pub fn from_snapshot(domain: &str, snapshot: &[u32]) -> Vec<Self> {
        snapshot
            .iter()
            .enumerate()
            .filter(|(_, value)| **value != 0)
            .map(|(slot, value)| Self {
                domain: domain.to_string(),
                slot,
                value: *value,
            })
            .collect()
    }
}

impl fmt::Display for ExportRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.domain, self.value, self.slot)
    }
}

/// Connectionless, unacknowledged transport for export records
#[async_trait]
pub trait DatagramSink: Send + Sync {
    /// Send one datagram
    async fn send(&self, payload: &[u8]) -> AppResult<()>;

    /// Human-readable destination, for logs
    fn target(&self) -> String;
}

/// UDP transport bound to an ephemeral local port
#[derive(Debug)]
pub struct UdpSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpSink {
    /// Resolve `collector` (`host:port`) and bind a local socket for it
    ///
    /// The name is resolved once; the first address returned is used for
    /// the lifetime of the sink.
    pub async fn bind(collector: &str) -> AppResult<Self> {
        let transport_err = |source| AppError::Transport {
            target: collector.to_string(),
            source,
        };

        let target = tokio::net::lookup_host(collector)
            .await
            .map_err(transport_err)?
            .next()
            .ok_or_else(|| {
                transport_err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "collector name resolved to no addresses",
                ))
            })?;

        let local: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let socket = UdpSocket::bind(local).await.map_err(transport_err)?;

        tracing::info!(collector, resolved = %target, "Export socket bound");
        Ok(Self { socket, target })
    }
}

#[async_trait]
impl DatagramSink for UdpSink {
    async fn send(&self, payload: &[u8]) -> AppResult<()> {
        self.socket
            .send_to(payload, self.target)
            .await
            .map(|_| ())
            .map_err(|source| AppError::Transport {
                target: self.target.to_string(),
                source,
            })
    }

    fn target(&self) -> String {
        self.target.to_string()
    }
}

/// What a single export tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another process holds the export lease; nothing was drained
    Skipped,
    /// The store was drained and its non-zero slots sent
    Exported { sent: usize, failed: usize },
}

/// Periodic drain-and-export loop for one counter store
pub struct Exporter {
    slab: Arc<CounterSlab>,
    lease: ExportLease,
    sink: Arc<dyn DatagramSink>,
    domain: String,
    interval: Duration,
    send_timeout: Duration,
    metrics: ExporterMetrics,
}

impl Exporter {
    /// Create an exporter for `slab`
    ///
    /// Opens (but does not take) the export lease on the store file.
    pub fn new(
        slab: Arc<CounterSlab>,
        sink: Arc<dyn DatagramSink>,
        config: &ExporterConfig,
    ) -> AppResult<Self> {
        let lease = ExportLease::for_store(slab.path())?;
        Ok(Self {
            slab,
            lease,
            sink,
            domain: config.domain().to_string(),
            interval: config.interval(),
            send_timeout: config.send_timeout(),
            metrics: ExporterMetrics::new()?,
        })
    }

    /// Create an exporter that sends over UDP to the configured collector
    pub async fn with_udp(slab: Arc<CounterSlab>, config: &ExporterConfig) -> AppResult<Self> {
        config.collector_endpoint()?;
        let sink = UdpSink::bind(config.collector()).await?;
        Self::new(slab, Arc::new(sink), config)
    }

    /// Domain tag this exporter attaches to records
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Self-instrumentation counters (shared with clones)
    pub fn metrics(&self) -> ExporterMetrics {
        self.metrics.clone()
    }

    /// Whether this exporter currently holds the export lease
    pub fn holds_lease(&self) -> bool {
        self.lease.is_held()
    }

    /// Run one export tick
    pub async fn tick(&mut self) -> TickOutcome {
        match self.lease.try_acquire() {
            Ok(true) => {}
            Ok(false) => {
                tracing::trace!("Export lease held elsewhere, skipping tick");
                self.metrics.tick_skipped();
                return TickOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!(error = %e, "Export lease check failed, skipping tick");
                self.metrics.tick_skipped();
                return TickOutcome::Skipped;
            }
        }

        let snapshot = self.slab.drain_and_reset();
        self.metrics.tick();

        let records = ExportRecord::from_snapshot(&self.domain, &snapshot);
        let drained: u64 = records.iter().map(|r| u64::from(r.value)).sum();
        self.metrics.drained(drained);

        let mut sent = 0;
        let mut failed = 0;
        for record in &records {
            let payload = record.to_string();
            match self.send(payload.as_bytes()).await {
                Ok(()) => {
                    sent += 1;
                    self.metrics.record_sent();
                }
                Err(e) => {
                    failed += 1;
                    let kind = match &e {
                        AppError::TransportTimeout { .. } => SendFailure::Timeout,
                        _ => SendFailure::Io,
                    };
                    self.metrics.send_failed(kind);
                    tracing::warn!(
                        target_addr = %self.sink.target(),
                        slot = record.slot,
                        value = record.value,
                        error = %e,
                        "Export record lost"
                    );
                }
            }
        }

        if !records.is_empty() {
            tracing::debug!(sent, failed, drained, "Export tick completed");
        }
        TickOutcome::Exported { sent, failed }
    }

    /// Send one datagram, giving up after the configured send timeout
    async fn send(&self, payload: &[u8]) -> AppResult<()> {
        match tokio::time::timeout(self.send_timeout, self.sink.send(payload)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::TransportTimeout {
                target: self.sink.target(),
                timeout_ms: self.send_timeout.as_millis() as u64,
            }),
        }
    }

    /// Tick every interval until `shutdown` is cancelled
    ///
    /// Runs one last tick after cancellation so counts recorded just before
    /// shutdown still leave the process, then releases the lease.
    pub async fn run(mut self, shutdown: CancellationToken) -> ExporterMetrics {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            domain = %self.domain,
            store = %self.slab.path().display(),
            target_addr = %self.sink.target(),
            "Starting exporter"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        if let TickOutcome::Exported { sent, failed } = self.tick().await {
            tracing::info!(sent, failed, "Final export tick on shutdown");
        }
        self.lease.release();

        tracing::info!(
            ticks = self.metrics.ticks_count(),
            skipped = self.metrics.ticks_skipped_count(),
            records_sent = self.metrics.records_sent_count(),
            send_failures = self.metrics.send_failures_count(),
            "Exporter stopped"
        );
        self.metrics
    }

    /// Spawn the export loop on the current tokio runtime
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<ExporterMetrics> {
        tokio::spawn(self.run(shutdown))
    }
}

impl fmt::Debug for Exporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exporter")
            .field("store", &self.slab.path())
            .field("target", &self.sink.target())
            .field("domain", &self.domain)
            .field("interval", &self.interval)
            .field("send_timeout", &self.send_timeout)
            .field("holds_lease", &self.lease.is_held())
            .finish()
    }
}
