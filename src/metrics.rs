//! Prometheus self-instrumentation for the exporter
//!
//! Tracks what the exporter itself did: ticks run, ticks skipped because
//! another process holds the export lease, records sent, send failures and
//! the total count drained. These are about the exporter, not the counted
//! traffic; the counted traffic only ever leaves the process as datagrams.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Why a datagram send failed, as a bounded label value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// The socket returned an error
    Io,
    /// The send did not complete within the configured timeout
    Timeout,
}

impl SendFailure {
    /// Convert to Prometheus label string
    pub fn as_str(&self) -> &'static str {
        match self {
            SendFailure::Io => "io",
            SendFailure::Timeout => "timeout",
        }
    }
}

/// Exporter counters
#[derive(Clone)]
pub struct ExporterMetrics {
    pub registry: Arc<Registry>,
    ticks: IntCounter,
    ticks_skipped: IntCounter,
    records_sent: IntCounter,
    send_failures: IntCounterVec,
    drained: IntCounter,
}

impl ExporterMetrics {
    /// Create and register all exporter metrics in a fresh registry
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let ticks = IntCounter::with_opts(Opts::new(
            "slotmeter_export_ticks_total",
            "Export ticks that drained the counter store",
        ))?;

        let ticks_skipped = IntCounter::with_opts(Opts::new(
            "slotmeter_export_ticks_skipped_total",
            "Export ticks skipped because another process holds the export lease",
        ))?;

        let records_sent = IntCounter::with_opts(Opts::new(
            "slotmeter_export_records_sent_total",
            "Export records handed to the transport successfully",
        ))?;

        // Cardinality: 2 failure kinds
        let send_failures = IntCounterVec::new(
            Opts::new(
                "slotmeter_export_send_failures_total",
                "Export records lost to transport failures, by failure kind",
            ),
            &["kind"],
        )?;

        let drained = IntCounter::with_opts(Opts::new(
            "slotmeter_drained_total",
            "Sum of all counter values drained from the store",
        ))?;

        registry.register(Box::new(ticks.clone()))?;
        registry.register(Box::new(ticks_skipped.clone()))?;
        registry.register(Box::new(records_sent.clone()))?;
        registry.register(Box::new(send_failures.clone()))?;
        registry.register(Box::new(drained.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            ticks,
            ticks_skipped,
            records_sent,
            send_failures,
            drained,
        })
    }

    pub fn tick(&self) {
        self.ticks.inc();
    }

    pub fn tick_skipped(&self) {
        self.ticks_skipped.inc();
    }

    pub fn record_sent(&self) {
        self.records_sent.inc();
    }

    pub fn send_failed(&self, kind: SendFailure) {
        self.send_failures.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn drained(&self, total: u64) {
        self.drained.inc_by(total);
    }

    pub fn ticks_count(&self) -> u64 {
        self.ticks.get()
    }

    pub fn ticks_skipped_count(&self) -> u64 {
        self.ticks_skipped.get()
    }

    pub fn records_sent_count(&self) -> u64 {
        self.records_sent.get()
    }

    pub fn drained_count(&self) -> u64 {
        self.drained.get()
    }

    pub fn send_failures_of(&self, kind: SendFailure) -> u64 {
        self.send_failures.with_label_values(&[kind.as_str()]).get()
    }

    /// Total send failures across all kinds
    pub fn send_failures_count(&self) -> u64 {
        [SendFailure::Io, SendFailure::Timeout]
            .into_iter()
            .map(|kind| self.send_failures_of(kind))
            .sum()
    }

    /// Encode all exporter metrics in Prometheus text format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!("Metrics output is not valid UTF-8: {}", e))
        })
    }
}

impl std::fmt::Debug for ExporterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterMetrics")
            .field("ticks", &self.ticks_count())
            .field("ticks_skipped", &self.ticks_skipped_count())
            .field("records_sent", &self.records_sent_count())
            .field("send_failures", &self.send_failures_count())
            .finish()
    }
}
