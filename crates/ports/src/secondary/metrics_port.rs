// Focused sub-traits for recording diagnostics, grouped by concern.
//
// All methods take `&self` because the underlying implementation uses
// atomic operations (interior mutability via `prometheus-client`).
//
// Default implementations are no-ops, allowing test mocks to implement
// only the sub-traits relevant to the code under test.

// ── Set cache metrics ──────────────────────────────────────────────

pub trait SetMetrics: Send + Sync {
    /// Set the number of set entities currently in the in-memory cache.
    fn set_sets_in_cache(&self, _count: u64) {}

    /// Set the number of sets the kernel dataplane currently holds.
    fn set_sets_in_kernel(&self, _count: u64) {}

    /// Record sets reclaimed by a cleanup pass (deletion or sweep).
    fn record_sets_reclaimed(&self, _count: u64) {}
}

// ── Lifecycle contract-violation metrics ───────────────────────────

pub trait LifecycleMetrics: Send + Sync {
    /// Record a reference-counter decrement that hit zero. A non-zero
    /// rate here means a missing matching increment or a double
    /// decrement somewhere upstream.
    fn record_counter_underflow(&self, _counter: &str) {}

    /// Record an unknown-typed set metadata reaching the lifecycle
    /// engine.
    fn record_taxonomy_violation(&self) {}
}

// ── Dataplane sync metrics ─────────────────────────────────────────

pub trait SyncMetrics: Send + Sync {
    /// Record one reconciliation pass with its outcome ("success" or
    /// "failure").
    fn record_dataplane_sync(&self, _result: &str) {}
}

// ── Configuration metrics ──────────────────────────────────────────

pub trait ConfigMetrics: Send + Sync {
    /// Record a configuration reload attempt (success or failure).
    fn record_config_reload(&self, _result: &str) {}
}

// ── Composite super-trait ──────────────────────────────────────────

/// Unified diagnostics port composing all sub-traits.
///
/// Services accept `Arc<dyn MetricsPort>` for full access. The sub-traits
/// provide default no-op implementations so that test mocks only need to
/// override the methods they care about.
pub trait MetricsPort: SetMetrics + LifecycleMetrics + SyncMetrics + ConfigMetrics {}

/// Blanket implementation: any type implementing all sub-traits
/// automatically implements `MetricsPort`.
impl<T> MetricsPort for T where T: SetMetrics + LifecycleMetrics + SyncMetrics + ConfigMetrics {}
