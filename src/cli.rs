//! Command-line interface for slotmeter
//!
//! Provides argument parsing and subcommand handling for the slotmeter binary.

use crate::config::Config;
use crate::error::AppResult;
use clap::{Parser, Subcommand};
use std::path::Path;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "slotmeter.toml";

/// Per-URL HTTP status counters, exported over UDP
#[derive(Parser)]
#[command(name = "slotmeter")]
#[command(version)]
#[command(about = "Per-URL HTTP status counters in shared memory, exported over UDP")]
#[command(
    long_about = "slotmeter counts HTTP responses by URL pattern and status code into a \
    counter store shared by every worker process, and exports the counts to a remote \
    collector as UDP datagrams."
)]
pub struct Cli {
    /// Path to configuration file (defaults apply if the default file is absent)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Drain the counter store and export it until interrupted (default)
    Run,
    /// Record a single response
    Record {
        /// Request URL
        url: String,
        /// HTTP status code
        status: u16,
    },
    /// Print current counter values without draining them
    Show,
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

impl Cli {
    /// Load the configuration named on the command line
    ///
    /// An explicit `--config` must exist. Without one, `slotmeter.toml` is
    /// used if present and built-in defaults otherwise.
    pub fn load_config(&self) -> AppResult<Config> {
        match &self.config {
            Some(path) => Config::from_file(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Config::from_file(DEFAULT_CONFIG_PATH)
            }
            None => Ok(Config::default()),
        }
    }
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# slotmeter Configuration
# ========================
#
# Every section is optional. Values shown are the defaults.
# SLOTMETER_RULES, SLOTMETER_COLLECTOR and SLOTMETER_DOMAIN override the
# matching settings below.

# ─────────────────────────────────────────────────────────────────────────────
# RULES
# ─────────────────────────────────────────────────────────────────────────────
#
# One rule per line, three tab-separated fields:
#
#   <slot index> <TAB> <URL substring> <TAB> <status code>
#
# Lines that do not parse are skipped with a warning.

[rules]
path = "metrics.idx"

# ─────────────────────────────────────────────────────────────────────────────
# COUNTER STORE
# ─────────────────────────────────────────────────────────────────────────────
#
# File-backed counters shared by every process that opens the same path.
# An advisory lock on the store file elects the single exporting process.

[store]
path = "metrics.dat"
slot_count = 8

# ─────────────────────────────────────────────────────────────────────────────
# EXPORTER
# ─────────────────────────────────────────────────────────────────────────────
#
# Datagram payload: "<domain>_<value>_<slot>"
# The collector is "host:port"; host names are resolved at startup.

[exporter]
collector = "127.0.0.1:10011"
domain = "unknown"
interval_ms = 1000
send_timeout_ms = 250

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
log_level = "info"
"#
}
