//! `taskgate serve` and `taskgate check`.

use std::path::Path;
use std::sync::Arc;

use prometheus_client::registry::Registry;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use taskgate_core::TaskService;
use taskgate_core::config::{Config, load_and_validate};
use taskgate_core::executor::OperationCatalog;
use taskgate_core::telemetry::TaskgateMetrics;

use crate::admin::{AdminServer, AdminState};
use crate::cli::{CheckArgs, ServeArgs};
use crate::error::ServeError;
use crate::server::{self, dispatch::Dispatcher};

/// Runs the stdio server until the client closes its input or the process
/// is interrupted, then shuts the task service down.
///
/// # Errors
///
/// Fails on invalid configuration, an unusable durable store, an admin
/// port that cannot be bound, or a stdin read error.
pub async fn run_serve(args: ServeArgs) -> Result<(), ServeError> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(port) = args.admin_port {
        config.admin.port = Some(port);
    }

    let mut prom_registry = Registry::default();
    let metrics = Arc::new(TaskgateMetrics::new(&mut prom_registry));
    let prom_registry = Arc::new(prom_registry);

    let (service, restored) =
        TaskService::from_config(&config, OperationCatalog::with_builtins(), Some(metrics))
            .await?;
    info!(
        backend = config.persistence.backend.as_str(),
        restored = restored.restored,
        interrupted = restored.interrupted,
        operations = ?service.catalog().names(),
        "Task service ready"
    );

    let shutdown = CancellationToken::new();
    let maintenance = service.spawn_maintenance();

    let admin = match config.admin.port {
        Some(port) => {
            let state = AdminState {
                service: Arc::clone(&service),
                prom_registry,
            };
            let server = AdminServer::bind(&config.admin.bind, port, state).await?;
            Some(tokio::spawn(server.run(shutdown.clone())))
        }
        None => None,
    };

    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            interrupt.cancel();
        }
    });

    let result = server::run_stdio(
        Dispatcher::new(Arc::clone(&service)),
        tokio::io::stdin(),
        tokio::io::stdout(),
        shutdown.clone(),
    )
    .await;

    shutdown.cancel();
    service.shutdown().await;
    if let Err(e) = maintenance.await {
        warn!(error = %e, "Maintenance task failed");
    }
    if let Some(admin) = admin {
        match admin.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Admin server failed"),
            Err(e) => warn!(error = %e, "Admin server task failed"),
        }
    }
    result
}

/// Validates configuration and prints a one-line summary.
///
/// # Errors
///
/// Returns the configuration error, if any.
pub fn run_check(args: CheckArgs) -> Result<(), ServeError> {
    let (config, path, validation) = load_and_validate(args.config.as_deref())?;
    for warning in &validation.warnings {
        eprintln!("warning: {warning}");
    }
    let source = path
        .as_deref()
        .map_or_else(|| "built-in defaults".to_string(), |p| p.display().to_string());
    println!(
        "Configuration OK ({source}): max_active_tasks={}, retention={}, persistence={}",
        config.registry.max_active_tasks,
        humantime::format_duration(config.registry.retention),
        config.persistence.backend.as_str(),
    );
    Ok(())
}

fn load_config(explicit: Option<&Path>) -> Result<Config, ServeError> {
    let (config, path, validation) = load_and_validate(explicit)?;
    match path {
        Some(path) => info!(path = %path.display(), "Loaded configuration"),
        None => info!("No configuration file found, using defaults"),
    }
    for warning in &validation.warnings {
        warn!(warning = %warning, "Configuration warning");
    }
    Ok(config)
}
