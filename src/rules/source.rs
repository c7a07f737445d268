//! Rule source parsing
//!
//! The rule source is line-oriented text with three tab-separated fields
//! per line: `index`, `pattern`, `statusCode`. Malformed lines are reported
//! back to the caller and skipped; they never abort a load.

use super::MetricRule;
use crate::error::{AppError, AppResult};
use std::path::Path;

/// Default rule source file name
pub const DEFAULT_RULE_SOURCE: &str = "metrics.idx";

/// Why a rule source line was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    /// Fewer than three tab-separated fields
    MissingFields,
    /// The index field is not a non-negative decimal integer
    BadIndex(String),
    /// The status field is not a decimal integer in `0..=65535`
    BadStatus(String),
    /// The pattern field is empty
    EmptyPattern,
    /// The index is outside `[0, slot_count)`
    SlotOutOfRange { slot: usize, slot_count: usize },
}

impl std::fmt::Display for LineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingFields => write!(f, "expected 3 tab-separated fields"),
            Self::BadIndex(raw) => write!(f, "invalid slot index '{}'", raw),
            Self::BadStatus(raw) => write!(f, "invalid status code '{}'", raw),
            Self::EmptyPattern => write!(f, "empty pattern"),
            Self::SlotOutOfRange { slot, slot_count } => {
                write!(f, "slot {} out of range (slot count {})", slot, slot_count)
            }
        }
    }
}

/// Result of parsing a whole rule source
#[derive(Debug, Default)]
pub struct ParsedSource {
    /// Valid rules, in file order
    pub rules: Vec<MetricRule>,
    /// Skipped lines as `(1-based line number, reason)`
    pub skipped: Vec<(usize, LineError)>,
}

/// Parse one rule line
///
/// Returns `Ok(None)` for blank lines and `#` comments.
pub fn parse_line(line: &str, slot_count: usize) -> Result<Option<MetricRule>, LineError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.split('\t');
    let (Some(index), Some(pattern), Some(status)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(LineError::MissingFields);
    };

    let slot: usize = index
        .trim()
        .parse()
        .map_err(|_| LineError::BadIndex(index.to_string()))?;
    let status: u16 = status
        .trim()
        .parse()
        .map_err(|_| LineError::BadStatus(status.to_string()))?;

    if pattern.is_empty() {
        return Err(LineError::EmptyPattern);
    }
    if slot >= slot_count {
        return Err(LineError::SlotOutOfRange { slot, slot_count });
    }

    Ok(Some(MetricRule::new(pattern, status, slot)))
}

/// Parse rule source text
pub fn parse_str(content: &str, slot_count: usize) -> ParsedSource {
    let mut parsed = ParsedSource::default();
    for (number, line) in content.lines().enumerate() {
        match parse_line(line, slot_count) {
            Ok(Some(rule)) => parsed.rules.push(rule),
            Ok(None) => {}
            Err(reason) => parsed.skipped.push((number + 1, reason)),
        }
    }
    parsed
}

/// Read and parse a rule source file
///
/// # Errors
///
/// Returns `RuleSourceRead` if the file cannot be read. Malformed lines are
/// not errors; they are listed in `ParsedSource::skipped`.
pub fn read_file<P: AsRef<Path>>(path: P, slot_count: usize) -> AppResult<ParsedSource> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| AppError::RuleSourceRead {
        path: path.display().to_string(),
        source,
    })?;

    let parsed = parse_str(&content, slot_count);
    for (line, reason) in &parsed.skipped {
        tracing::warn!(
            path = %path.display(),
            line,
            reason = %reason,
            "Skipping malformed rule line"
        );
    }
    Ok(parsed)
}
