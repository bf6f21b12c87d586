//! Meridian GeoDNS Server
//!
//! Authoritative DNS with Geo-aware answer selection, a REST control
//! plane, and master-slave replication.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use meridian_cache::{spawn_invalidation_listener, ResponseCache, ZoneCache, ZoneEvents};
use meridian_config::Config;
use meridian_geo::{MmdbProvider, NoopProvider, Provider};
use meridian_rest::AppState;
use meridian_server::{AuthorityHandler, Forwarder, TcpServer, UdpServer};
use meridian_store::{SoaPolicy, Store};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

mod replication;

/// Meridian GeoDNS server - authoritative DNS with geographic answer selection
#[derive(Parser, Debug)]
#[command(name = "meridian")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, value_name = "FILE", env = "MERIDIAN_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server (default)
    Run,

    /// Validate the configuration file and exit
    Validate,

    /// Show version information
    Version,
}

fn find_config_file(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path);
    }
    let search_paths = [
        PathBuf::from("./config.yaml"),
        PathBuf::from("./meridian.yaml"),
        PathBuf::from("/etc/meridian/config.yaml"),
    ];
    search_paths.into_iter().find(|p| p.exists())
}

fn init_logging(config: &Config, cli_level: Option<&str>, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let level = if quiet {
        "error".to_string()
    } else {
        cli_level
            .map(str::to_string)
            .unwrap_or_else(|| config.log.level.clone())
    };
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.log.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn print_banner(config: &Config, quiet: bool) {
    if quiet {
        return;
    }
    let version = env!("CARGO_PKG_VERSION");

    println!();
    println!(
        "  {} {}",
        style("Meridian GeoDNS").cyan().bold(),
        style(format!("v{}", version)).dim()
    );
    println!();
    println!("  {} {}", style("DNS:").green(), config.listen);
    println!(
        "  {} {}{}",
        style("REST:").green(),
        config.rest_listen,
        if config.is_tls_enabled() { " (TLS)" } else { "" }
    );
    if !config.forwarder.is_empty() {
        println!("  {} {}", style("Forwarder:").green(), config.forwarder);
    }

    let mut features = Vec::new();
    if config.geoip.enabled {
        features.push("GeoDNS");
    }
    if config.performance.cache_size > 0 {
        features.push("Cache");
    }
    if config.soa.auto_on_missing {
        features.push("AutoSOA");
    }
    match config.replication.mode.as_str() {
        "master" => features.push("Replication(master)"),
        "slave" => features.push("Replication(slave)"),
        _ => {}
    }
    if !features.is_empty() {
        println!("  {} {}", style("Features:").green(), features.join(", "));
    }
    println!();
}

/// Builds the GeoIP provider. A failed open disables GeoDNS rather than
/// refusing to start, matching the documented degradation. The concrete
/// MMDB handle is returned alongside so the reload and download workers
/// act on the instance the pipeline actually serves from.
async fn build_geo_provider(config: &Config) -> (Arc<dyn Provider>, Option<Arc<MmdbProvider>>) {
    if !config.geoip.enabled || config.geoip.mmdb_path.is_empty() {
        return (Arc::new(NoopProvider), None);
    }

    let path = PathBuf::from(&config.geoip.mmdb_path);

    // When auto-download is configured, make sure the directory exists
    // and fetch anything missing before the first open.
    if !config.geoip.download_urls.is_empty() && config.geoip.download_interval_sec > 0 {
        if let Err(e) = std::fs::create_dir_all(&path) {
            warn!(path = %path.display(), error = %e, "cannot create MMDB directory");
        }
        meridian_geo::mmdb::fetch_missing(&path, &config.geoip.download_urls).await;
    }

    match MmdbProvider::open(&path) {
        Ok(provider) => {
            let provider = Arc::new(provider);
            (provider.clone(), Some(provider))
        }
        Err(e) => {
            warn!(error = %e, "GeoIP disabled: {}", e);
            (Arc::new(NoopProvider), None)
        }
    }
}

async fn run_server(config: Config, quiet: bool) -> Result<()> {
    print_banner(&config, quiet);
    let config = Arc::new(config);

    // Store
    let store = Store::connect(&config.db.driver, &config.db.dsn)
        .await
        .context("open store")?;
    store.migrate().await.context("migrate store")?;

    // Ensure every zone has a SOA when synthesis is enabled.
    if config.soa.auto_on_missing {
        let policy = SoaPolicy {
            auto_on_missing: true,
            primary: config.soa.primary.clone(),
            hostmaster: config.soa.hostmaster.clone(),
        };
        for zone in store.list_zones().await? {
            if let Err(e) = store.bump_soa_serial_auto(&zone, &policy).await {
                warn!(zone = %zone.name, error = %e, "SOA ensure failed");
            }
        }
    }

    // Shutdown signal shared by every task.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Caches and the invalidation contract.
    let response_cache = Arc::new(ResponseCache::new(
        config.performance.cache_size.max(0) as usize,
    ));
    let zone_cache = Arc::new(ZoneCache::default());
    let events = ZoneEvents::new();
    spawn_invalidation_listener(
        zone_cache.clone(),
        response_cache.clone(),
        events.subscribe(),
    );

    // GeoIP provider and its periodic workers.
    let (geo, mmdb) = build_geo_provider(&config).await;
    if let Some(provider) = &mmdb {
        if config.geoip.reload_sec > 0 {
            provider.spawn_reload_task(
                Duration::from_secs(config.geoip.reload_sec),
                shutdown_tx.subscribe(),
            );
        }
        if !config.geoip.download_urls.is_empty() && config.geoip.download_interval_sec > 0 {
            provider.spawn_download_task(
                config.geoip.download_urls.clone(),
                Duration::from_secs(config.geoip.download_interval_sec),
                shutdown_tx.subscribe(),
            );
        }
    }

    // Forwarder.
    let forwarder = Forwarder::new(
        &config.forwarder,
        Duration::from_secs(config.performance.forwarder_timeout_sec),
    );

    // The DNS pipeline, bounded by the per-query timeout.
    let authority = Arc::new(AuthorityHandler::new(
        store.clone(),
        response_cache.clone(),
        zone_cache.clone(),
        geo,
        forwarder,
        meridian_server::authority::AuthorityConfig {
            use_ecs: config.geoip.use_ecs,
            verbose: config.log.dns_verbose,
        },
    ));
    let handler = Arc::new(meridian_server::TimeoutHandler::new(
        authority,
        Duration::from_secs(config.performance.dns_timeout_sec),
    ));

    let dns_addr = config.dns_addr().context("resolve DNS listen address")?;
    let udp = UdpServer::bind(dns_addr, handler.clone())
        .await
        .context("bind UDP listener")?;
    let tcp = TcpServer::bind(dns_addr, handler.clone())
        .await
        .context("bind TCP listener")?;

    let mut tasks = Vec::new();
    {
        let shutdown = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = udp.run(shutdown).await {
                error!(error = %e, "UDP server error");
            }
        }));
    }
    {
        let shutdown = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = tcp.run(shutdown).await {
                error!(error = %e, "TCP server error");
            }
        }));
    }

    // REST control plane.
    let rest_state = Arc::new(AppState {
        store: store.clone(),
        config: config.clone(),
        events: events.clone(),
    });
    {
        let shutdown = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = meridian_rest::serve(rest_state, shutdown).await {
                error!(error = %e, "REST server error");
            }
        }));
    }

    // Replication worker, slave mode only.
    match config.replication.mode.as_str() {
        "slave" => {
            let worker =
                replication::SyncWorker::new(&config.replication, store.clone(), events.clone());
            let shutdown = shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                // Give the listeners a moment before the first poll.
                tokio::time::sleep(Duration::from_secs(2)).await;
                worker.run(shutdown).await;
            }));
            info!(
                master = %config.replication.master_url,
                interval_sec = config.replication.sync_interval_sec,
                "slave mode enabled"
            );
        }
        "master" => {
            info!("master mode enabled: serving replication data");
        }
        _ => {}
    }

    info!("meridian started");

    // Wait for SIGINT/SIGTERM.
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("register SIGTERM handler")?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .context("register SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }

    let _ = shutdown_tx.send(());

    // REST drains within five seconds; DNS listeners stop within two.
    let drain = async {
        for task in tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(5), drain).await.is_err() {
        warn!("shutdown deadline exceeded, exiting");
    }

    info!("meridian stopped");
    Ok(())
}

fn validate_config(path: Option<PathBuf>) -> Result<()> {
    let config_path = find_config_file(path).context("no configuration file found")?;
    println!("Validating configuration: {}", config_path.display());
    Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    println!("{}", style("Configuration is valid!").green().bold());
    Ok(())
}

fn print_version() {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
}

#[tokio::main]
async fn main() -> Result<()> {
    // Both the HTTPS listener and the replication client speak rustls;
    // pick the process-wide crypto provider once.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Version) => {
            print_version();
            return Ok(());
        }
        Some(Commands::Validate) => {
            return validate_config(cli.config);
        }
        _ => {}
    }

    let config_path =
        find_config_file(cli.config.clone()).context("no configuration file found")?;
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    init_logging(&config, cli.log_level.as_deref(), cli.quiet);
    run_server(config, cli.quiet).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["meridian"]).unwrap();
        assert!(cli.config.is_none());
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["meridian", "-c", "/etc/meridian/config.yaml"]).unwrap();
        assert_eq!(
            cli.config,
            Some(PathBuf::from("/etc/meridian/config.yaml"))
        );

        let cli = Cli::try_parse_from(["meridian", "validate"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Validate)));
    }

    #[test]
    fn test_find_config_prefers_explicit() {
        let explicit = Some(PathBuf::from("/tmp/custom.yaml"));
        assert_eq!(
            find_config_file(explicit.clone()),
            Some(PathBuf::from("/tmp/custom.yaml"))
        );
    }
}
