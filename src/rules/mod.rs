//! Rule registry
//!
//! Maps `(URL substring pattern, status code)` to a counter slot.
//!
//! Rules are grouped into buckets by pattern. Both the bucket list and each
//! bucket's status list are ordered most-recently-inserted first, and lookup
//! returns the first hit, so a newer rule shadows an older one.
//!
//! The whole registry sits behind one readers-writer lock: any number of
//! concurrent `resolve` calls, and mutations that are exclusive with each
//! other and with readers. A reader never sees a half-applied mutation.

pub mod source;

use crate::error::{AppError, AppResult};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A single `(pattern, status) -> slot` mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRule {
    pattern: String,
    status: u16,
    slot: usize,
}

impl MetricRule {
    /// Create a new rule
    pub fn new(pattern: impl Into<String>, status: u16, slot: usize) -> Self {
        Self {
            pattern: pattern.into(),
            status,
            slot,
        }
    }

    /// URL substring this rule matches
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// HTTP status code this rule matches exactly
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Counter slot this rule increments
    pub fn slot(&self) -> usize {
        self.slot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatusEntry {
    status: u16,
    slot: usize,
}

/// All rules sharing one pattern, most recent first
#[derive(Debug, Clone)]
struct RuleBucket {
    pattern: String,
    entries: VecDeque<StatusEntry>,
}

impl RuleBucket {
    fn position(&self, status: u16) -> Option<usize> {
        self.entries.iter().position(|e| e.status == status)
    }
}

#[derive(Debug, Default, Clone)]
struct RuleSet {
    buckets: VecDeque<RuleBucket>,
}

impl RuleSet {
    fn from_rules(rules: &[MetricRule]) -> Self {
        let mut set = Self::default();
        for rule in rules {
            set.add(rule);
        }
        set
    }

    /// First bucket whose pattern is contained in `url`
    fn matching_bucket(&self, url: &str) -> Option<usize> {
        self.buckets.iter().position(|b| url.contains(&b.pattern))
    }

    /// `(bucket, entry)` position of the first hit for `(url, status)`
    fn locate(&self, url: &str, status: u16) -> Option<(usize, usize)> {
        let bucket = self.matching_bucket(url)?;
        let entry = self.buckets[bucket].position(status)?;
        Some((bucket, entry))
    }

    fn resolve(&self, url: &str, status: u16) -> Option<usize> {
        self.locate(url, status)
            .map(|(b, e)| self.buckets[b].entries[e].slot)
    }

    fn add(&mut self, rule: &MetricRule) -> bool {
        // Already covered: looking the pattern up yields this slot.
        if self.resolve(&rule.pattern, rule.status) == Some(rule.slot) {
            return false;
        }

        let entry = StatusEntry {
            status: rule.status,
            slot: rule.slot,
        };

        match self.buckets.iter_mut().find(|b| b.pattern == rule.pattern) {
            Some(bucket) => bucket.entries.push_front(entry),
            None => self.buckets.push_front(RuleBucket {
                pattern: rule.pattern.clone(),
                entries: VecDeque::from([entry]),
            }),
        }
        true
    }

    fn update(&mut self, pattern: &str, status: u16, slot: usize) -> bool {
        match self.locate(pattern, status) {
            Some((b, e)) => {
                self.buckets[b].entries[e].slot = slot;
                true
            }
            None => false,
        }
    }

    fn delete(&mut self, pattern: &str, status: u16) -> bool {
        let Some((b, e)) = self.locate(pattern, status) else {
            return false;
        };
        self.buckets[b].entries.remove(e);
        if self.buckets[b].entries.is_empty() {
            self.buckets.remove(b);
        }
        true
    }

    fn rules(&self) -> Vec<MetricRule> {
        self.buckets
            .iter()
            .flat_map(|bucket| {
                bucket
                    .entries
                    .iter()
                    .map(|e| MetricRule::new(bucket.pattern.clone(), e.status, e.slot))
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.len()).sum()
    }
}

/// Thread-safe registry of metric rules
#[derive(Debug)]
pub struct RuleRegistry {
    slot_count: usize,
    inner: RwLock<RuleSet>,
}

impl RuleRegistry {
    /// Create an empty registry for a store with `slot_count` slots
    pub fn new(slot_count: usize) -> Self {
        Self {
            slot_count,
            inner: RwLock::new(RuleSet::default()),
        }
    }

    /// Build a registry from rules, applied in order through `add`
    ///
    /// Rules whose slot is out of range are skipped with a warning.
    pub fn from_rules(rules: Vec<MetricRule>, slot_count: usize) -> Self {
        let valid: Vec<MetricRule> = rules
            .into_iter()
            .filter(|rule| {
                let ok = rule.slot < slot_count;
                if !ok {
                    tracing::warn!(
                        pattern = %rule.pattern,
                        status = rule.status,
                        slot = rule.slot,
                        slot_count,
                        "Skipping rule with out-of-range slot"
                    );
                }
                ok
            })
            .collect();

        Self {
            slot_count,
            inner: RwLock::new(RuleSet::from_rules(&valid)),
        }
    }

    /// Load a registry from a rule source file
    ///
    /// # Errors
    ///
    /// Returns `RuleSourceRead` if the file cannot be read. Malformed lines
    /// are skipped and logged.
    pub fn load<P: AsRef<Path>>(path: P, slot_count: usize) -> AppResult<Self> {
        let parsed = source::read_file(path.as_ref(), slot_count)?;
        let registry = Self::from_rules(parsed.rules, slot_count);

        tracing::info!(
            path = %path.as_ref().display(),
            rules = registry.len(),
            skipped_lines = parsed.skipped.len(),
            "Loaded metric rules"
        );
        Ok(registry)
    }

    /// Number of slots rules may point at
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn read(&self) -> AppResult<RwLockReadGuard<'_, RuleSet>> {
        self.inner.read().map_err(|_| AppError::RegistryLockPoisoned)
    }

    fn write(&self) -> AppResult<RwLockWriteGuard<'_, RuleSet>> {
        self.inner.write().map_err(|_| AppError::RegistryLockPoisoned)
    }

    fn check_slot(&self, slot: usize) -> AppResult<()> {
        if slot >= self.slot_count {
            return Err(AppError::SlotOutOfRange {
                slot,
                slot_count: self.slot_count,
            });
        }
        Ok(())
    }

    /// Find the slot for a response
    ///
    /// The first bucket (most recent first) whose pattern is a substring of
    /// `url` decides the outcome: its newest entry with exactly `status`
    /// wins, and if it has none the result is `None` even when an older
    /// bucket would match.
    pub fn resolve(&self, url: &str, status: u16) -> Option<usize> {
        match self.read() {
            Ok(set) => set.resolve(url, status),
            Err(e) => {
                tracing::error!(error = %e, "Rule lookup skipped");
                None
            }
        }
    }

    /// Add a rule
    ///
    /// Returns `Ok(false)` when `resolve(pattern, status)` already yields
    /// `slot`, whether through this pattern or a broader one. Otherwise the
    /// rule is inserted in front of any older mapping for the same pair.
    pub fn add(&self, pattern: &str, status: u16, slot: usize) -> AppResult<bool> {
        self.check_slot(slot)?;
        let added = self.write()?.add(&MetricRule::new(pattern, status, slot));
        if added {
            tracing::debug!(pattern, status, slot, "Added metric rule");
        }
        Ok(added)
    }

    /// Point the first rule matching `(pattern, status)` at a new slot
    ///
    /// Matching is the same walk as `resolve(pattern, status)`.
    /// Returns `Ok(false)` if nothing matched.
    pub fn update(&self, pattern: &str, status: u16, slot: usize) -> AppResult<bool> {
        self.check_slot(slot)?;
        let updated = self.write()?.update(pattern, status, slot);
        if updated {
            tracing::debug!(pattern, status, slot, "Updated metric rule");
        }
        Ok(updated)
    }

    /// Remove the first rule matching `(pattern, status)`
    ///
    /// A bucket left without entries is removed with it.
    /// Returns `Ok(false)` if nothing matched.
    pub fn delete(&self, pattern: &str, status: u16) -> AppResult<bool> {
        let deleted = self.write()?.delete(pattern, status);
        if deleted {
            tracing::debug!(pattern, status, "Deleted metric rule");
        }
        Ok(deleted)
    }

    /// Replace every rule with the contents of a rule source file
    ///
    /// The file is parsed before the lock is taken; if it cannot be read the
    /// current rules are kept.
    pub fn reload<P: AsRef<Path>>(&self, path: P) -> AppResult<usize> {
        let parsed = source::read_file(path.as_ref(), self.slot_count)?;
        let fresh = RuleSet::from_rules(&parsed.rules);
        let count = fresh.len();

        *self.write()? = fresh;

        tracing::info!(
            path = %path.as_ref().display(),
            rules = count,
            skipped_lines = parsed.skipped.len(),
            "Reloaded metric rules"
        );
        Ok(count)
    }

    /// All rules in lookup order
    pub fn rules(&self) -> Vec<MetricRule> {
        self.read().map(|set| set.rules()).unwrap_or_default()
    }

    /// Total number of rules
    pub fn len(&self) -> usize {
        self.read().map(|set| set.len()).unwrap_or(0)
    }

    /// Whether the registry holds no rules
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RuleRegistry {
        RuleRegistry::new(8)
    }

    #[test]
    fn test_substring_match() {
        let reg = registry();
        reg.add("/test", 200, 0).unwrap();

        assert_eq!(reg.resolve("/test/page", 200), Some(0));
        assert_eq!(reg.resolve("/prefix/test", 200), Some(0));
        assert_eq!(reg.resolve("/other", 200), None);
    }

    #[test]
    fn test_status_must_match_exactly() {
        let reg = registry();
        reg.add("/test", 200, 0).unwrap();

        assert_eq!(reg.resolve("/test", 404), None);
    }

    #[test]
    fn test_most_recent_wins() {
        let reg = registry();
        reg.add("/a", 200, 0).unwrap();
        reg.add("/a", 200, 1).unwrap();

        assert_eq!(reg.resolve("/a", 200), Some(1));
    }

    #[test]
    fn test_add_is_idempotent() {
        let reg = registry();
        assert!(reg.add("/a", 200, 3).unwrap());
        assert!(!reg.add("/a", 200, 3).unwrap());

        let rules = reg.rules();
        assert_eq!(rules, vec![MetricRule::new("/a", 200, 3)]);
    }

    #[test]
    fn test_add_covered_by_broader_pattern_is_noop() {
        let reg = registry();
        reg.add("/api", 200, 0).unwrap();

        assert!(!reg.add("/api/v2", 200, 0).unwrap());
        assert_eq!(reg.rules(), vec![MetricRule::new("/api", 200, 0)]);
        assert_eq!(reg.resolve("/api/v2/items", 200), Some(0));

        // A different slot is a real change and gets its own bucket
        assert!(reg.add("/api/v2", 200, 4).unwrap());
        assert_eq!(reg.resolve("/api/v2/items", 200), Some(4));
        assert_eq!(reg.resolve("/api/v1/items", 200), Some(0));
    }

    #[test]
    fn test_newer_bucket_shadows_older_bucket() {
        let reg = registry();
        reg.add("/api", 200, 0).unwrap();
        reg.add("/api/users", 200, 1).unwrap();

        assert_eq!(reg.resolve("/api/users/7", 200), Some(1));
        assert_eq!(reg.resolve("/api/orders", 200), Some(0));
    }

    #[test]
    fn test_first_matching_bucket_decides() {
        let reg = registry();
        reg.add("/api", 404, 0).unwrap();
        reg.add("/api/users", 200, 1).unwrap();

        // "/api/users" matches first and has no 404 entry
        assert_eq!(reg.resolve("/api/users", 404), None);
    }

    #[test]
    fn test_add_out_of_range_slot_is_rejected() {
        let reg = registry();
        let err = reg.add("/a", 200, 8).unwrap_err();
        assert!(matches!(err, AppError::SlotOutOfRange { slot: 8, .. }));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_update_rewrites_slot() {
        let reg = registry();
        reg.add("/a", 200, 0).unwrap();

        assert!(reg.update("/a", 200, 5).unwrap());
        assert_eq!(reg.resolve("/a", 200), Some(5));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_update_missing_is_noop() {
        let reg = registry();
        reg.add("/a", 200, 0).unwrap();

        assert!(!reg.update("/b", 200, 5).unwrap());
        assert!(!reg.update("/a", 500, 5).unwrap());
        assert_eq!(reg.resolve("/a", 200), Some(0));
    }

    #[test]
    fn test_delete_only_entry_removes_bucket() {
        let reg = registry();
        reg.add("/a", 200, 0).unwrap();

        assert!(reg.delete("/a", 200).unwrap());
        assert_eq!(reg.resolve("/a", 200), None);
        assert!(reg.is_empty());
        assert!(reg.rules().is_empty());
    }

    #[test]
    fn test_delete_keeps_other_statuses() {
        let reg = registry();
        reg.add("/a", 200, 0).unwrap();
        reg.add("/a", 404, 1).unwrap();

        assert!(reg.delete("/a", 200).unwrap());
        assert_eq!(reg.resolve("/a", 200), None);
        assert_eq!(reg.resolve("/a", 404), Some(1));
    }

    #[test]
    fn test_delete_uncovers_shadowed_mapping() {
        let reg = registry();
        reg.add("/a", 200, 0).unwrap();
        reg.add("/a", 200, 1).unwrap();

        assert!(reg.delete("/a", 200).unwrap());
        assert_eq!(reg.resolve("/a", 200), Some(0));
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let reg = registry();
        assert!(!reg.delete("/a", 200).unwrap());
    }

    #[test]
    fn test_from_rules_skips_out_of_range() {
        let reg = RuleRegistry::from_rules(
            vec![MetricRule::new("/a", 200, 1), MetricRule::new("/b", 200, 9)],
            4,
        );
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.resolve("/b", 200), None);
    }

    #[test]
    fn test_rules_lists_most_recent_first() {
        let reg = registry();
        reg.add("/a", 200, 0).unwrap();
        reg.add("/b", 200, 1).unwrap();
        reg.add("/a", 404, 2).unwrap();

        let listed: Vec<(String, u16, usize)> = reg
            .rules()
            .into_iter()
            .map(|r| (r.pattern().to_string(), r.status(), r.slot()))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("/b".to_string(), 200, 1),
                ("/a".to_string(), 404, 2),
                ("/a".to_string(), 200, 0),
            ]
        );
    }
}
