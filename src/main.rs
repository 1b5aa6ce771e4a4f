//! APIPA Watchdog: power-cycle network adapters that fall back to a
//! self-assigned address, go down, or lose their gateway and DNS peers.

mod adapter;
mod admin;
mod config;
mod event;
mod inventory;
mod monitor;
mod notify;
mod ping;
mod platform;
mod probe;
mod recovery;
mod service;
#[cfg(test)]
mod testing;

use std::path::PathBuf;

use clap::Parser;

use config::{ServiceArgs, ServiceConfig};
use monitor::Monitor;
use ping::SystemPinger;
use platform::SystemBackend;
use service::ServiceHandle;

#[derive(Parser, Debug)]
#[command(
    name = "apipa-watchdog",
    about = "Reset network adapters stuck on a self-assigned address or without upstream connectivity",
    long_about = "Polls the host's network adapters. An adapter that is down, holds a 169.254.x.x address, \
or repeatedly fails to reach its DNS servers and default gateway is disabled and re-enabled.\n\n\
Service arguments follow `--`: -i MS (poll), -g SECS (connectivity test), -t MS (ping timeout), \
-l N (failed rounds before logging), -f N (failed probes before reset), -h SECS (holdoff), \
-m HOST|URL (notification endpoint), -s K1,K2 (skip-list), -d (debug)."
)]
struct Cli {
    /// Run once: evaluate every adapter, connectivity test included, then exit (no loop)
    #[arg(long, short = '1', alias = "single")]
    pub once: bool,

    /// File holding the persisted service arguments, applied before the command line ones
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Service arguments, e.g. -- -i 10000 -g 30 -h 60 -d
    #[arg(last = true, allow_hyphen_values = true)]
    pub service_args: Vec<String>,
}

impl Cli {
    fn service_config(&self) -> Result<(ServiceConfig, ServiceArgs), config::ConfigError> {
        let persisted = self
            .config
            .as_deref()
            .map(ServiceArgs::load)
            .transpose()?;
        let start = ServiceArgs::parse_tokens(&self.service_args)?;
        ServiceConfig::resolve(persisted, start)
    }
}

fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, args) = match cli.service_config() {
        Ok(resolved) => resolved,
        Err(e) => {
            init_tracing(false);
            tracing::error!(event_code = event::ARGUMENTS_INVALID, "Error processing arguments: {}", e);
            return Err(e.into());
        }
    };
    init_tracing(config.debug);

    tracing::info!(
        event_code = event::SERVICE_STARTED,
        "APIPA Watchdog started - version {}, mode: {}",
        env!("CARGO_PKG_VERSION"),
        if cli.once { "single run" } else { "service" }
    );
    tracing::info!(event_code = event::ARGUMENTS, "Arguments: {}", args.to_tokens().join(" "));
    tracing::debug!("Resolved configuration: {:?}", config);

    admin::ensure_admin()?;

    let mut monitor = Monitor::start(SystemBackend::default(), SystemPinger, config).await;

    if cli.once {
        let outcome = monitor.run_once().await;
        tracing::info!("Single pass finished: {:?}", outcome);
        return Ok(());
    }

    let (handle, control) = ServiceHandle::new();
    tokio::spawn(async move {
        if let Err(e) = forward_signals(handle).await {
            tracing::warn!("Signal handling unavailable: {}", e);
        }
    });
    service::run(&mut monitor, control).await;
    Ok(())
}

/// Ctrl-C / SIGTERM stop the service; on Unix SIGUSR1 pauses and SIGUSR2 resumes.
#[cfg(unix)]
async fn forward_signals(handle: ServiceHandle) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = term.recv() => break,
            _ = usr1.recv() => handle.pause(),
            _ = usr2.recv() => handle.resume(),
        }
    }
    tracing::info!("Shutdown requested");
    handle.stop();
    Ok(())
}

#[cfg(not(unix))]
async fn forward_signals(handle: ServiceHandle) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    handle.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_arguments_follow_double_dash() {
        let cli = Cli::try_parse_from(["apipa-watchdog", "--once", "--", "-i", "2000", "-h", "5", "-d"])
            .unwrap();
        assert!(cli.once);
        let (config, _) = cli.service_config().unwrap();
        assert_eq!(config.poll_interval, std::time::Duration::from_millis(2000));
        assert_eq!(config.holdoff, std::time::Duration::from_secs(5));
        assert!(config.debug);
    }

    #[test]
    fn bad_service_arguments_are_fatal() {
        let cli = Cli::try_parse_from(["apipa-watchdog", "--", "-i", "fast"]).unwrap();
        assert!(cli.service_config().is_err());
    }

    #[test]
    fn missing_persisted_file_is_fatal() {
        let cli = Cli::try_parse_from([
            "apipa-watchdog",
            "--config",
            "/nonexistent/apipa-watchdog.args",
        ])
        .unwrap();
        assert!(matches!(
            cli.service_config(),
            Err(config::ConfigError::Persisted { .. })
        ));
    }
}
