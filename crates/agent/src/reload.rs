//! SIGHUP-driven configuration reload.
//!
//! Only the fields that can change while the agent runs are applied:
//! the set cache limit. Intervals feed loops spawned at startup and
//! logging is installed once, so those keep their boot-time values
//! until a restart.

use std::path::Path;
use std::sync::Arc;

use application::IpSetAppService;
use infrastructure::config::AgentConfig;
use ports::secondary::metrics_port::MetricsPort;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Spawn the reload listener. A failed reload keeps the running
/// configuration untouched.
pub fn spawn_reload_task(
    config_path: String,
    service: Arc<RwLock<IpSetAppService>>,
    metrics: Arc<dyn MetricsPort>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut hangup = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::hangup(),
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("failed to install SIGHUP handler, config reload disabled: {e}");
                    cancel.cancelled().await;
                    return;
                }
            };
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = hangup.recv() => {}
                }
                match AgentConfig::load(Path::new(&config_path)) {
                    Ok(config) => {
                        apply(&config, &service).await;
                        metrics.record_config_reload("success");
                        info!(
                            config_path = %config_path,
                            max_sets = config.ipset.max_sets,
                            "configuration reloaded"
                        );
                    }
                    Err(e) => {
                        metrics.record_config_reload("failure");
                        warn!(
                            config_path = %config_path,
                            "config reload failed, keeping running configuration: {e}"
                        );
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = (config_path, service, metrics);
            cancel.cancelled().await;
        }
    })
}

/// Push the reloadable fields into the running service.
pub(crate) async fn apply(config: &AgentConfig, service: &RwLock<IpSetAppService>) {
    service.write().await.set_max_sets(config.ipset.max_sets);
}
