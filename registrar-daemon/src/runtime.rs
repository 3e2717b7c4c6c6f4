use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;

use registrar_core::{ContainerState, Observable};
use registrar_policy::Policy;
use registrar_sync::{KvStore, WriterFactory};

use crate::configuration::{ConfigState, Configuration};
use crate::docker::ContainerRuntime;
use crate::error::{io_err, DaemonError};
use crate::manager::Manager;
use crate::settings::Settings;
use crate::watcher::Watcher;

/// Process entry point: load settings from `settings_path` (defaults when
/// missing), install tracing, then run the selected policies on a fresh
/// multi-threaded runtime until `signal` resolves.
///
/// A binary passes something like
/// `async { let _ = tokio::signal::ctrl_c().await; }` as the signal.
pub fn start_blocking<S>(
    settings_path: &Path,
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn KvStore>,
    signal: S,
) -> Result<(), DaemonError>
where
    S: Future<Output = ()> + Send + 'static,
{
    let settings = Settings::load_at(settings_path)?;
    init_tracing(settings.log_json);
    let policies = settings.select_policies()?;
    let tokio = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    tokio.block_on(run_until(settings, policies, runtime, store, signal))
}

/// Run until `signal` resolves or a task fails.
///
/// Only an unreachable store at startup is fatal; everything after that is
/// logged and retried.
pub async fn run_until<S>(
    settings: Settings,
    policies: Vec<Arc<Policy>>,
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn KvStore>,
    signal: S,
) -> Result<(), DaemonError>
where
    S: Future<Output = ()> + Send + 'static,
{
    let version = store.version().await?;
    tracing::info!(store = %version, policies = policies.len(), ttl = ?settings.ttl(), "starting registrar");

    let containers = Arc::new(Observable::<ContainerState>::new());
    let configs = Arc::new(Observable::<ConfigState>::new());
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        let containers = containers.clone();
        let restart_delay = settings.watcher_restart_delay();
        tokio::spawn(async move {
            loop {
                let watcher = Watcher::new(runtime.clone(), containers.clone());
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    result = watcher.run() => {
                        match result {
                            Ok(()) => break,
                            Err(err) => tracing::error!(error = %err, "container watcher failed, restarting"),
                        }
                    }
                }
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(restart_delay) => {}
                }
            }
            containers.close();
            Ok::<(), DaemonError>(())
        })
    };

    let configuration_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let configuration = Configuration::new(
            policies,
            settings.static_config_dir.clone(),
            store.clone(),
            settings.store_retry_delay(),
            configs.clone(),
        );
        tokio::spawn(async move {
            let result = configuration.run(shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let manager_handle = {
        let shutdown = shutdown_tx.clone();
        let manager = Manager::new(
            containers.clone(),
            WriterFactory::new(store.clone(), settings.ttl()),
        );
        let configs = configs.clone();
        tokio::spawn(async move {
            let stats = manager.run(configs).await;
            tracing::info!(
                created = stats.created,
                removed = stats.removed,
                restarted = stats.restarted,
                failed = stats.failed,
                "manager finished",
            );
            let _ = shutdown.send(());
            Ok::<(), DaemonError>(())
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => {}
                _ = signal => {
                    let _ = shutdown.send(());
                }
            }
            Ok::<(), DaemonError>(())
        })
    };

    let (watcher_result, configuration_result, manager_result, signal_result) = tokio::join!(
        watcher_handle,
        configuration_handle,
        manager_handle,
        signal_handle
    );

    handle_join("watcher", watcher_result)?;
    handle_join("configuration", configuration_result)?;
    handle_join("manager", manager_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Join {
            task,
            message: err.to_string(),
        }),
    }
}

/// Install the global subscriber: `RUST_LOG` or `info`, optionally as JSON
/// lines. Later calls are no-ops.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
