//! Report types for resync passes.

use serde::{Deserialize, Serialize};

/// Outcome of a verify or compare pass over the registry roots.
///
/// Roots are named by their model key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Number of roots examined.
    pub checked: usize,
    /// Roots whose remote state matched.
    pub in_sync: Vec<String>,
    /// Roots that drifted and were not repaired.
    pub drifted: Vec<String>,
    /// Roots that drifted and were pushed again.
    pub repaired: Vec<String>,
    /// Roots whose check or repair failed, with the error.
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_in_sync(&mut self, key: impl ToString) {
        self.checked += 1;
        self.in_sync.push(key.to_string());
    }

    pub(crate) fn record_drifted(&mut self, key: impl ToString) {
        self.checked += 1;
        self.drifted.push(key.to_string());
    }

    pub(crate) fn record_repaired(&mut self, key: impl ToString) {
        self.checked += 1;
        self.repaired.push(key.to_string());
    }

    pub(crate) fn record_failed(&mut self, key: impl ToString, error: impl ToString) {
        self.checked += 1;
        self.failed.push((key.to_string(), error.to_string()));
    }

    /// Whether every root matched without needing repair.
    pub fn converged(&self) -> bool {
        self.drifted.is_empty() && self.repaired.is_empty() && self.failed.is_empty()
    }

    /// Whether every root either matched or was repaired.
    pub fn all_succeeded(&self) -> bool {
        self.drifted.is_empty() && self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_report_is_converged() {
        let report = SyncReport::new();
        assert!(report.converged());
        assert_eq!(report.checked, 0);
    }

    #[test]
    fn test_repaired_roots_succeed_but_do_not_converge() {
        let mut report = SyncReport::new();
        report.record_in_sync("virtual-network:net-1");
        report.record_repaired("virtual-machine:vm-1");

        assert_eq!(report.checked, 2);
        assert!(report.all_succeeded());
        assert!(!report.converged());
    }

    #[test]
    fn test_failure_is_recorded_with_error() {
        let mut report = SyncReport::new();
        report.record_failed("virtual-machine:vm-1", "controller api 'read' failed");

        assert!(!report.all_succeeded());
        assert_eq!(
            report.failed.first().map(|(key, _)| key.as_str()),
            Some("virtual-machine:vm-1")
        );
    }
}
