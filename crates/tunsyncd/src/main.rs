// # tunsyncd - Tunnel Sync Daemon
//
// This daemon is a THIN integration layer. All reconciliation logic lives
// in tunsync-core; this binary only wires concrete components together.
//
// The tunsyncd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Provisioning the tunnel (fatal on failure)
// 3. Upserting the dashboard record and running the startup pass
// 4. Running the engine's trigger loop
// 5. Supervising the `cloudflared` process until it exits or a signal arrives
//
// ## Configuration
//
// ### Required
// - `CLOUDFLARE_API_TOKEN`: API token (Zone:DNS:Edit, Account:Cloudflare Tunnel:Edit)
// - `ACCOUNT_ID`: Cloudflare account owning the tunnel
// - `ZONE_ID`: Zone holding the managed records
// - `DISCOPANEL_HOST_DATA_PATH`: Host data directory; `<path>/servers` is watched
// - `DOMAIN`: Domain every managed hostname lives under
// - `DASHBOARD_SUBDOMAIN`: Subdomain of the dashboard hostname
// - `TUNNEL_NAME`: Tunnel to reuse or create
// - `MC_SERVER_RECORD_COMMENT`: Tag marking per-server records
// - `MC_DASHBOARD_RECORD_COMMENT`: Tag marking the dashboard record
//
// ### Optional
// - `INVENTORY_URL`: Server inventory endpoint (default http://discopanel:8080/api/v1/servers)
// - `DASHBOARD_SERVICE`: Dashboard origin (default http://discopanel:8080)
// - `CONTAINER_PREFIX`: Server container name prefix (default discopanel-server-)
// - `CLOUDFLARED_BIN`: Connector binary (default cloudflared)
// - `TUNSYNC_WATCH_INTERVAL_SECS`: Server directory poll interval (default 2)
// - `TUNSYNC_RESYNC_INTERVAL_SECS`: Periodic resync, 0 = off (default 0)
// - `TUNSYNC_MODE`: live | dry-run (default live)
// - `TUNSYNC_LOG_LEVEL`: trace | debug | info | warn | error (default info)
//
// ## Example
//
// ```bash
// export CLOUDFLARE_API_TOKEN=your_token
// export ACCOUNT_ID=... ZONE_ID=...
// export DISCOPANEL_HOST_DATA_PATH=/srv/discopanel
// export DOMAIN=example.com DASHBOARD_SUBDOMAIN=panel TUNNEL_NAME=mc
// export MC_SERVER_RECORD_COMMENT=mc-server MC_DASHBOARD_RECORD_COMMENT=mc-dashboard
//
// tunsyncd
// ```

mod config;
mod tunnel;

use anyhow::Result;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::time::ChronoUtc;

use tunsync_cloudflare::CloudflareClient;
use tunsync_core::traits::{ChangeTrigger, RecordStore};
use tunsync_core::{EngineEvent, IntervalTrigger, SyncEngine, merge_triggers};
use tunsync_source_http::HttpBackendSource;
use tunsync_trigger_dir::ServersDirTrigger;

use crate::config::{Config, Mode};
use crate::tunnel::TunnelProcess;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Time `cloudflared` gets to drain its connections on shutdown
const TUNNEL_STOP_GRACE: Duration = Duration::from_secs(10);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or provisioning error
/// - 2: Runtime error (tunnel process failed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TunsyncExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or tunnel provisioning failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<TunsyncExitCode> for ExitCode {
    fn from(code: TunsyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Map a daemon error to its exit code
fn exit_code_for(err: &anyhow::Error) -> TunsyncExitCode {
    match err.downcast_ref::<tunsync_core::Error>() {
        Some(e) if e.is_fatal() => TunsyncExitCode::ConfigError,
        _ => TunsyncExitCode::RuntimeError,
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return TunsyncExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return TunsyncExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_timer(ChronoUtc::new("%Y-%m-%dT%H:%M:%SZ".to_string()))
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return TunsyncExitCode::ConfigError.into();
    }

    info!("Starting tunsyncd daemon");
    debug!("Configuration: {:?}", config);

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return TunsyncExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run_daemon(config).await {
            Ok(code) => code,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                exit_code_for(&e)
            }
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<TunsyncExitCode> {
    let client = CloudflareClient::new(
        &config.api_token,
        &config.account_id,
        &config.zone_id,
        config.mode == Mode::DryRun,
    )?;

    // Without a tunnel nothing can be reconciled
    let tunnel = client.get_or_create_tunnel(&config.tunnel_name).await?;
    info!("Using tunnel {} ({})", config.tunnel_name, tunnel.id);

    let source = HttpBackendSource::new(&config.inventory_url)?;
    let (engine, events) = SyncEngine::new(
        Box::new(client),
        Box::new(source),
        tunnel.clone(),
        config.sync_config(),
    )?;
    let engine = Arc::new(engine);

    tokio::spawn(log_events(events));

    if let Err(e) = engine.ensure_dashboard_record().await {
        warn!("Dashboard record upsert failed: {}", e);
    }

    // Baseline before the startup pass, so servers added during it still trigger
    let servers_trigger =
        ServersDirTrigger::with_interval(config.servers_path(), config.watch_interval());
    match servers_trigger.capture_baseline().await {
        Ok(count) => debug!("Server directory baseline: {} backend(s)", count),
        Err(e) => warn!(
            "Failed to read {}: {}",
            servers_trigger.servers_path().display(),
            e
        ),
    }

    // Startup pass; failures are retried by the next trigger
    match engine.sync_once().await {
        Ok(report) => info!(
            "Startup pass done: {} backend(s), {} failure(s)",
            report.desired_backends,
            report.failures.len()
        ),
        Err(e) => warn!("Startup pass skipped: {}", e),
    }

    let mut triggers: Vec<Box<dyn ChangeTrigger>> = vec![Box::new(servers_trigger)];
    if config.resync_interval_secs > 0 {
        triggers.push(Box::new(IntervalTrigger::new(Duration::from_secs(
            config.resync_interval_secs,
        ))));
    }
    let trigger_stream = merge_triggers(&triggers);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let engine_task = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run(trigger_stream, shutdown_rx).await }
    });

    let code = if config.mode == Mode::DryRun {
        info!("Dry-run mode: not starting the tunnel process");
        let signal = wait_for_shutdown().await?;
        info!("Received shutdown signal: {}", signal);
        TunsyncExitCode::CleanShutdown
    } else {
        supervise_tunnel(&config.cloudflared_bin, &tunnel).await?
    };

    info!("Shutting down daemon");
    let _ = shutdown_tx.send(());
    match engine_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Engine loop ended with error: {}", e),
        Err(e) => warn!("Engine task failed: {}", e),
    }

    Ok(code)
}

/// Run the tunnel process until it exits or a shutdown signal arrives
async fn supervise_tunnel(
    bin: &str,
    tunnel: &tunsync_core::TunnelIdentity,
) -> Result<TunsyncExitCode> {
    let mut process = match TunnelProcess::spawn(bin, tunnel) {
        Ok(process) => process,
        Err(e) => {
            error!("{:#}", e);
            return Ok(TunsyncExitCode::RuntimeError);
        }
    };

    tokio::select! {
        status = process.wait() => {
            let status = status?;
            if status.success() {
                info!("Tunnel process exited");
                Ok(TunsyncExitCode::CleanShutdown)
            } else {
                error!("Tunnel process exited with {}", status);
                Ok(TunsyncExitCode::RuntimeError)
            }
        }
        signal = wait_for_shutdown() => {
            info!("Received shutdown signal: {}", signal?);
            process.terminate(TUNNEL_STOP_GRACE).await?;
            Ok(TunsyncExitCode::CleanShutdown)
        }
    }
}

/// Forward engine events to the debug log
///
/// The engine already logs every mutation and pass summary itself.
async fn log_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        debug!("Engine event: {:?}", event);
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    // Set up signal handlers for SIGTERM and SIGINT
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
