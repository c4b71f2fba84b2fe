use std::time::Duration;

// ── Defaults ───────────────────────────────────────────────────────

pub const DEFAULT_CONFIG_PATH: &str = "/etc/npset/config.yaml";

/// Default upper bound on cached set entities. Matches the headroom the
/// node kernel comfortably handles; tighten per deployment via config.
pub const DEFAULT_MAX_SETS: usize = 65_536;

// ── Intervals ──────────────────────────────────────────────────────

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

// ── Timeouts ───────────────────────────────────────────────────────

pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
