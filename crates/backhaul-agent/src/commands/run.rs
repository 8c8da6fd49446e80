//! Run command - the long-lived agent.
//!
//! ```text
//!   scheduler ──interval──► Registry::collect (blocking pool)
//!                               │
//!   ReverseConnection ◄─ flush ─┘ ◄── broker commands
//!        ▲
//!   signals: INT/TERM stop, HUP reloads the broker target
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use backhaul_collector::Registry;
use backhaul_config::{BackhaulConfig, ReverseConfig};
use backhaul_reverse::{BrokerTarget, ReverseConnection};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ConfigArgs;
use crate::settings::{build_registry, reverse_settings};

/// Upper bound on waiting for the reverse connection to wind down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub fn run(args: &ConfigArgs, config: BackhaulConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("backhaul-worker")
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(serve(args, config))
}

async fn serve(args: &ConfigArgs, config: BackhaulConfig) -> Result<()> {
    let registry = Arc::new(build_registry(&config.collectors)?);
    info!(collectors = ?registry.ids(), listen = %config.agent.listen, "agent starting");

    let shutdown = CancellationToken::new();
    let scheduler = tokio::spawn(schedule_collection(
        Arc::clone(&registry),
        Duration::from_secs(config.agent.collection_interval_secs),
        shutdown.clone(),
    ));

    let reverse = Arc::new(
        ReverseConnection::new(&reverse_settings(&config), Arc::clone(&registry))
            .context("Invalid reverse connection settings")?,
    );
    let reverse_task = tokio::spawn({
        let reverse = Arc::clone(&reverse);
        async move { reverse.start().await }
    });

    wait_for_shutdown(args, &config.reverse, &reverse).await?;

    reverse.stop();
    shutdown.cancel();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, reverse_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(error = %e, "reverse connection ended with an error"),
        Ok(Err(e)) => error!(error = %e, "reverse connection task failed"),
        Err(_) => warn!("reverse connection did not stop in time"),
    }
    if let Err(e) = scheduler.await {
        error!(error = %e, "collection scheduler failed");
    }

    info!("agent stopped");
    Ok(())
}

/// Collects on a fixed cadence until cancelled. The first cycle runs
/// immediately.
async fn schedule_collection(registry: Arc<Registry>, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let registry = Arc::clone(&registry);
        match tokio::task::spawn_blocking(move || registry.collect()).await {
            Ok(snapshot) => debug!(seq = snapshot.seq(), "collection cycle done"),
            Err(e) => error!(error = %e, "collection cycle panicked"),
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(
    args: &ConfigArgs,
    running: &ReverseConfig,
    reverse: &ReverseConnection,
) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("interrupt received, shutting down");
                return Ok(());
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down");
                return Ok(());
            }
            _ = sighup.recv() => {
                info!("SIGHUP received, reloading configuration");
                reload(args, running, reverse);
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(
    _args: &ConfigArgs,
    _running: &ReverseConfig,
    _reverse: &ReverseConnection,
) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("interrupt received, shutting down");
    Ok(())
}

/// Re-reads the configuration and points the next dial at the new broker.
///
/// Only the broker target is reloaded; everything else needs a restart.
/// A bad configuration is logged and the current target kept.
#[cfg_attr(not(unix), allow(dead_code))]
fn reload(args: &ConfigArgs, running: &ReverseConfig, reverse: &ReverseConnection) {
    let config = match args.load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %format!("{e:#}"), "configuration reload failed, keeping current broker");
            return;
        }
    };

    let ignored = restart_only_changes(running, &config.reverse);
    if !ignored.is_empty() {
        warn!(fields = ?ignored, "these settings changed but only take effect after a restart");
    }

    let settings = reverse_settings(&config);
    if !settings.enabled {
        warn!("reverse connection cannot be disabled without a restart");
        return;
    }

    match BrokerTarget::from_settings(&settings) {
        Ok(target) => reverse.reconfigure(target),
        Err(e) => warn!(error = %e, "new broker settings rejected, keeping current broker"),
    }
}

/// Names of `[reverse]` settings that differ but are fixed for the life of
/// the process.
#[cfg_attr(not(unix), allow(dead_code))]
fn restart_only_changes(running: &ReverseConfig, next: &ReverseConfig) -> Vec<&'static str> {
    [
        ("check_id", running.check_id != next.check_id),
        ("dial_timeout_secs", running.dial_timeout_secs != next.dial_timeout_secs),
        ("comm_timeout_secs", running.comm_timeout_secs != next.comm_timeout_secs),
        ("command_timeout_secs", running.command_timeout_secs != next.command_timeout_secs),
        ("grace_secs", running.grace_secs != next.grace_secs),
        ("initial_backoff_ms", running.initial_backoff_ms != next.initial_backoff_ms),
        ("max_backoff_secs", running.max_backoff_secs != next.max_backoff_secs),
        (
            "backoff_multiplier",
            running.backoff_multiplier.to_bits() != next.backoff_multiplier.to_bits(),
        ),
        (
            "jitter_factor",
            running.jitter_factor.to_bits() != next.jitter_factor.to_bits(),
        ),
        ("queue_capacity", running.queue_capacity != next.queue_capacity),
        ("max_payload", running.max_payload != next.max_payload),
    ]
    .into_iter()
    .filter_map(|(field, changed)| changed.then_some(field))
    .collect()
}
