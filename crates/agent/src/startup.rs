use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use application::IpSetAppService;
use domain::ipset::engine::IpSetEngine;
use infrastructure::config::AgentConfig;
use infrastructure::constants::GRACEFUL_SHUTDOWN_TIMEOUT;
use infrastructure::logging::init_logging;
use infrastructure::metrics::AgentMetrics;
use ports::secondary::metrics_port::MetricsPort;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::cli::Cli;

/// Run the agent startup sequence and block until shutdown.
pub async fn run(cli: &Cli) -> anyhow::Result<()> {
    // ── 1. Load config ──────────────────────────────────────────────
    let config = AgentConfig::load(Path::new(&cli.config))?;

    // ── 2. Initialize logging ───────────────────────────────────────
    // CLI flags take precedence over config file
    let log_level = cli.log_level.unwrap_or(config.agent.log_level);
    let log_format = cli.log_format.unwrap_or(config.agent.log_format);
    init_logging(log_level, log_format)?;

    // Service root span — fields appear in every subsequent log entry
    let _root_span = tracing::span!(
        tracing::Level::INFO,
        "service",
        service.name = "npset-agent",
        service.version = env!("CARGO_PKG_VERSION"),
    )
    .entered();

    info!(
        config_path = %cli.config,
        node = %config.agent.node_name,
        log_level = log_level.as_str(),
        log_format = log_format.as_str(),
        "npset agent starting"
    );

    // ── 3. Initialize metrics ───────────────────────────────────────
    let metrics = Arc::new(AgentMetrics::new());

    // ── 4. Build the lifecycle service ──────────────────────────────
    // The kernel driver is an external adapter wired in by the embedding
    // dataplane; without one the engine runs cache-only.
    if config.ipset.dataplane_enabled {
        warn!("no kernel dataplane driver linked in this build, running cache-only");
    }
    let service = IpSetAppService::new(
        IpSetEngine::with_capacity(config.ipset.max_sets),
        None,
        Arc::clone(&metrics) as Arc<dyn MetricsPort>,
    );
    let service = Arc::new(RwLock::new(service));
    info!(
        max_sets = config.ipset.max_sets,
        sync_interval_secs = config.ipset.sync_interval_secs,
        cleanup_interval_secs = config.ipset.cleanup_interval_secs,
        "set lifecycle engine initialized"
    );

    // ── 5. Create cancellation token ────────────────────────────────
    let cancel_token = crate::shutdown::create_shutdown_token();

    // ── 6. Spawn the dataplane reconciliation loop ──────────────────
    let sync_svc = Arc::clone(&service);
    let sync_cancel = cancel_token.clone();
    let sync_secs = config.ipset.sync_interval_secs;
    let sync_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(sync_secs));
        loop {
            tokio::select! {
                () = sync_cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let report = sync_svc.write().await.reconcile();
            if report.failed > 0 {
                warn!(
                    created = report.created,
                    updated = report.updated,
                    destroyed = report.destroyed,
                    failed = report.failed,
                    "dataplane reconciliation pass had failures"
                );
            }
        }
    });

    // ── 7. Spawn the orphan-reclamation sweep ───────────────────────
    let cleanup_svc = Arc::clone(&service);
    let cleanup_cancel = cancel_token.clone();
    let cleanup_secs = config.ipset.cleanup_interval_secs;
    let cleanup_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cleanup_secs));
        // Skip the immediate first tick; a sweep right at startup would
        // reclaim sets whose references simply have not arrived yet.
        interval.tick().await;
        loop {
            tokio::select! {
                () = cleanup_cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            cleanup_svc.write().await.cleanup();
        }
    });

    // ── 8. Spawn the SIGHUP config-reload listener ──────────────────
    let _reload_handle = crate::reload::spawn_reload_task(
        cli.config.clone(),
        Arc::clone(&service),
        Arc::clone(&metrics) as Arc<dyn MetricsPort>,
        cancel_token.clone(),
    );

    // ── 9. Ready — wait for cancellation ────────────────────────────
    info!("agent ready, waiting for shutdown signal");
    cancel_token.cancelled().await;

    // ── 10. Ordered shutdown ────────────────────────────────────────
    info!("shutting down, waiting for background loops");
    let drain = async {
        let _ = sync_handle.await;
        let _ = cleanup_handle.await;
    };
    if tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, drain).await.is_err() {
        warn!("background loops did not stop within the shutdown timeout");
    }

    info!(sets_cached = service.read().await.set_count(), "agent stopped");
    Ok(())
}
