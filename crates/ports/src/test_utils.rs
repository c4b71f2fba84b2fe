use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use domain::common::error::DomainError;
use domain::ipset::taxonomy::SetKind;

use crate::secondary::dataplane_port::DataplanePort;
use crate::secondary::metrics_port::{ConfigMetrics, LifecycleMetrics, SetMetrics, SyncMetrics};

/// No-op implementation of all metrics sub-traits for use in tests.
///
/// All methods inherit the default no-op implementations from the
/// sub-traits.
pub struct NoopMetrics;

impl SetMetrics for NoopMetrics {}
impl LifecycleMetrics for NoopMetrics {}
impl SyncMetrics for NoopMetrics {}
impl ConfigMetrics for NoopMetrics {}

/// Counting implementation for tests that assert on emitted diagnostics
/// (e.g. that a counter underflow is signalled exactly once per call).
#[derive(Default)]
pub struct RecordingMetrics {
    pub counter_underflows: AtomicU64,
    pub taxonomy_violations: AtomicU64,
    pub sync_failures: AtomicU64,
}

impl RecordingMetrics {
    pub fn underflows(&self) -> u64 {
        self.counter_underflows.load(Ordering::Relaxed)
    }

    pub fn violations(&self) -> u64 {
        self.taxonomy_violations.load(Ordering::Relaxed)
    }

    pub fn failed_syncs(&self) -> u64 {
        self.sync_failures.load(Ordering::Relaxed)
    }
}

impl SetMetrics for RecordingMetrics {}
impl ConfigMetrics for RecordingMetrics {}

impl SyncMetrics for RecordingMetrics {
    fn record_dataplane_sync(&self, result: &str) {
        if result == "failure" {
            self.sync_failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl LifecycleMetrics for RecordingMetrics {
    fn record_counter_underflow(&self, _counter: &str) {
        self.counter_underflows.fetch_add(1, Ordering::Relaxed);
    }

    fn record_taxonomy_violation(&self) {
        self.taxonomy_violations.fetch_add(1, Ordering::Relaxed);
    }
}

/// In-memory dataplane recording every programmed set, for
/// reconciliation tests. Clones share state, so tests can keep a handle
/// while the service owns the boxed port.
#[derive(Default, Clone)]
pub struct MockDataplane {
    sets: Arc<Mutex<HashMap<String, (SetKind, Vec<String>)>>>,
    pub fail_creates: bool,
}

impl MockDataplane {
    /// A dataplane whose `create_set` always fails, for error-path tests.
    pub fn failing_creates() -> Self {
        Self {
            fail_creates: true,
            ..Self::default()
        }
    }

    /// Hashed names currently programmed, sorted.
    pub fn programmed(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sets.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Programmed members of one set, sorted.
    pub fn members_of(&self, hashed_name: &str) -> Option<Vec<String>> {
        self.sets
            .lock()
            .unwrap()
            .get(hashed_name)
            .map(|(_, members)| members.clone())
    }
}

impl DataplanePort for MockDataplane {
    fn create_set(&mut self, hashed_name: &str, kind: SetKind) -> Result<(), DomainError> {
        if self.fail_creates {
            return Err(DomainError::EngineError(format!(
                "mock refusing to create {hashed_name}"
            )));
        }
        self.sets
            .lock()
            .unwrap()
            .entry(hashed_name.to_string())
            .or_insert((kind, Vec::new()));
        Ok(())
    }

    fn destroy_set(&mut self, hashed_name: &str) -> Result<(), DomainError> {
        self.sets.lock().unwrap().remove(hashed_name);
        Ok(())
    }

    fn replace_members(
        &mut self,
        hashed_name: &str,
        members: &[String],
    ) -> Result<(), DomainError> {
        let mut sets = self.sets.lock().unwrap();
        let entry = sets
            .get_mut(hashed_name)
            .ok_or_else(|| DomainError::SetNotFound(hashed_name.to_string()))?;
        entry.1 = members.to_vec();
        entry.1.sort();
        Ok(())
    }

    fn set_count(&self) -> Result<usize, DomainError> {
        Ok(self.sets.lock().unwrap().len())
    }
}
