//! Error types for slotmeter
//!
//! One error enum covers startup failures, contract violations, transport
//! failures and configuration problems. Only startup failures are ever
//! surfaced to the host; everything else is handled where it happens.

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read configuration file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML configuration in {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Failed to read rule source {path}: {source}")]
    RuleSourceRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create or open counter store {path}: {source}")]
    CounterStoreOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to map counter store {path}: {source}")]
    CounterStoreMap {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Slot count must be greater than 0")]
    InvalidSlotCount,

    #[error("Slot count {slot_count} is too large for a counter store")]
    SlotCountTooLarge { slot_count: usize },

    #[error("Slot {slot} is out of range (slot count {slot_count})")]
    SlotOutOfRange { slot: usize, slot_count: usize },

    #[error("Rule registry lock is poisoned")]
    RegistryLockPoisoned,

    #[error("Metrics subsystem is disabled: initialization failed earlier")]
    MetricsDisabled,

    #[error("Failed to open export lease file {path}: {source}")]
    LeaseFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Datagram send to {target} failed: {source}")]
    Transport {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Datagram send to {target} timed out after {timeout_ms} ms")]
    TransportTimeout { target: String, timeout_ms: u64 },

    #[error("Exporter metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl AppError {
    /// Whether this error disables the metrics subsystem for the process
    ///
    /// Everything else is either a caller bug or a per-tick loss.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RuleSourceRead { .. }
                | Self::CounterStoreOpen { .. }
                | Self::CounterStoreMap { .. }
                | Self::InvalidSlotCount
                | Self::SlotCountTooLarge { .. }
                | Self::RegistryLockPoisoned
                | Self::MetricsDisabled
                | Self::LeaseFile { .. }
        )
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;
