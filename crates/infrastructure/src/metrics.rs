use ports::secondary::metrics_port::{ConfigMetrics, LifecycleMetrics, SetMetrics, SyncMetrics};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ── Label types ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CounterLabels {
    pub counter: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResultLabels {
    pub result: String,
}

// ── Agent metrics registry ──────────────────────────────────────────

/// Prometheus metrics registry for the agent.
///
/// All metric families use interior mutability (atomics), so recording
/// metrics only requires `&self`. The registry itself is NOT Clone —
/// wrap in `Arc` for multi-task sharing.
pub struct AgentMetrics {
    registry: Registry,
    pub sets_in_cache: Gauge,
    pub sets_in_kernel: Gauge,
    pub sets_reclaimed_total: Counter,
    pub counter_underflows_total: Family<CounterLabels, Counter>,
    pub taxonomy_violations_total: Counter,
    pub dataplane_syncs_total: Family<ResultLabels, Counter>,
    pub config_reloads_total: Family<ResultLabels, Counter>,
}

impl AgentMetrics {
    /// Create a new metrics registry with all metrics registered under
    /// the `npset` prefix.
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("npset");

        let sets_in_cache = Gauge::default();
        registry.register(
            "sets_in_cache",
            "Set entities currently held in the in-memory cache",
            sets_in_cache.clone(),
        );

        let sets_in_kernel = Gauge::default();
        registry.register(
            "sets_in_kernel",
            "Sets currently programmed in the kernel dataplane",
            sets_in_kernel.clone(),
        );

        let sets_reclaimed_total = Counter::default();
        registry.register(
            "sets_reclaimed",
            "Sets reclaimed by deletion and cleanup sweeps",
            sets_reclaimed_total.clone(),
        );

        let counter_underflows_total = Family::<CounterLabels, Counter>::default();
        registry.register(
            "counter_underflows",
            "Reference counter decrements that hit zero, by counter",
            counter_underflows_total.clone(),
        );

        let taxonomy_violations_total = Counter::default();
        registry.register(
            "taxonomy_violations",
            "Unknown-typed set metadata reaching the lifecycle engine",
            taxonomy_violations_total.clone(),
        );

        let dataplane_syncs_total = Family::<ResultLabels, Counter>::default();
        registry.register(
            "dataplane_syncs",
            "Dataplane reconciliation passes by result",
            dataplane_syncs_total.clone(),
        );

        let config_reloads_total = Family::<ResultLabels, Counter>::default();
        registry.register(
            "config_reloads",
            "Configuration reload attempts by result",
            config_reloads_total.clone(),
        );

        Self {
            registry,
            sets_in_cache,
            sets_in_kernel,
            sets_reclaimed_total,
            counter_underflows_total,
            taxonomy_violations_total,
            dataplane_syncs_total,
            config_reloads_total,
        }
    }

    /// Encode all registered metrics to `OpenMetrics` text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// ── Sub-trait implementations ──────────────────────────────────────

impl SetMetrics for AgentMetrics {
    fn set_sets_in_cache(&self, count: u64) {
        self.sets_in_cache.set(count.try_into().unwrap_or(i64::MAX));
    }

    fn set_sets_in_kernel(&self, count: u64) {
        self.sets_in_kernel.set(count.try_into().unwrap_or(i64::MAX));
    }

    fn record_sets_reclaimed(&self, count: u64) {
        self.sets_reclaimed_total.inc_by(count);
    }
}

impl LifecycleMetrics for AgentMetrics {
    fn record_counter_underflow(&self, counter: &str) {
        self.counter_underflows_total
            .get_or_create(&CounterLabels {
                counter: counter.to_string(),
            })
            .inc();
    }

    fn record_taxonomy_violation(&self) {
        self.taxonomy_violations_total.inc();
    }
}

impl SyncMetrics for AgentMetrics {
    fn record_dataplane_sync(&self, result: &str) {
        self.dataplane_syncs_total
            .get_or_create(&ResultLabels {
                result: result.to_string(),
            })
            .inc();
    }
}

impl ConfigMetrics for AgentMetrics {
    fn record_config_reload(&self, result: &str) {
        self.config_reloads_total
            .get_or_create(&ResultLabels {
                result: result.to_string(),
            })
            .inc();
    }
}
