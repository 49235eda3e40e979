//! Per-category error counters and service counters.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::ErrorCategory;

/// Internally synchronized counter map exposed via `metrics.get`.
#[derive(Default)]
pub struct MetricsState {
    counters: Mutex<HashMap<String, i64>>,
}

impl MetricsState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a named counter.
    pub fn inc(&self, name: &str) {
        let mut counters = self.lock();
        *counters.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Count an error against its category.
    pub fn inc_category(&self, category: ErrorCategory) {
        self.inc(&format!("errors_{}", category.as_str()));
    }

    /// Snapshot of every counter.
    pub fn snapshot(&self) -> HashMap<String, i64> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, i64>> {
        match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
