//! slotmeter - per-URL HTTP status counters in shared memory
//!
//! Counts responses by URL pattern and status code into a file-backed
//! counter array shared by every worker process, and periodically exports
//! the counts to a remote collector over UDP.

pub mod cli;
pub mod config;
pub mod error;
pub mod exporter;
pub mod lease;
pub mod metrics;
pub mod recorder;
pub mod rules;
pub mod slab;
pub mod telemetry;

pub use error::{AppError, AppResult};
pub use exporter::{DatagramSink, ExportRecord, Exporter, TickOutcome, UdpSink};
pub use recorder::{InitSettings, MeterContext, Recorder};
pub use rules::{MetricRule, RuleRegistry};
pub use slab::CounterSlab;

/// Open the rule source and counter store for this process
///
/// Convenience wrapper around [`MeterContext::initialize`] for hosts that
/// manage their own once-only setup.
pub fn initialize(
    rule_source: impl AsRef<std::path::Path>,
    store_path: impl AsRef<std::path::Path>,
    slot_count: usize,
) -> AppResult<MeterContext> {
    MeterContext::initialize(rule_source, store_path, slot_count)
}
