//! Prometheus exporter for Kea DHCP and DDNS statistics.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kea_control::{ControlClient, Endpoint, TlsIdentity};
use tokio::sync::watch;
use tracing::{error, info, warn};

use kea_exporter::{
    ExporterConfig, FamilyRegistry, HttpServer, MappingTable, ScrapeCollector, ScrapeSettings,
    StatsMapper,
};

/// Prometheus exporter for Kea DHCP and DDNS statistics.
///
/// Every option except `--config`, `--listen` and `--log-level` can also be
/// set through the environment variable named next to it.
#[derive(Parser, Debug)]
#[command(name = "kea-exporter")]
#[command(about = "Export Kea DHCP and DDNS statistics as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Kea endpoints: Control Agent URLs or control socket paths (override config).
    #[arg(env = "TARGETS", value_delimiter = ' ')]
    targets: Vec<String>,

    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen socket address; takes precedence over --address and --port.
    #[arg(long)]
    listen: Option<String>,

    /// Address to listen on (replaces the host part of the listen address).
    #[arg(short, long, env = "ADDRESS")]
    address: Option<IpAddr>,

    /// Port to listen on (replaces the port of the listen address).
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Minimum seconds between two scrapes of Kea; sooner requests reuse the last page.
    #[arg(short, long, env = "INTERVAL")]
    interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Request timeout in seconds (overrides config).
    #[arg(long, env = "TIMEOUT")]
    timeout: Option<u64>,

    /// PEM client certificate for HTTPS endpoints.
    #[arg(long, env = "CLIENT_CERT", requires = "client_key")]
    client_cert: Option<PathBuf>,

    /// PEM private key for the client certificate.
    #[arg(long, env = "CLIENT_KEY", requires = "client_cert")]
    client_key: Option<PathBuf>,
}

impl Args {
    /// Apply command line and environment overrides to a loaded config.
    fn apply(self, config: &mut ExporterConfig) -> anyhow::Result<()> {
        if let Some(listen) = self.listen_override(&config.prometheus.listen)? {
            config.prometheus.listen = listen;
        }
        if !self.targets.is_empty() {
            config.targets = self.targets;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(interval) = self.interval {
            config.min_scrape_interval_secs = interval;
        }
        if self.client_cert.is_some() {
            config.tls.client_cert = self.client_cert;
            config.tls.client_key = self.client_key;
        }
        Ok(())
    }

    fn listen_override(&self, current: &str) -> anyhow::Result<Option<String>> {
        if let Some(listen) = &self.listen {
            return Ok(Some(listen.clone()));
        }
        if self.address.is_none() && self.port.is_none() {
            return Ok(None);
        }

        let current: SocketAddr = current
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address '{}': {}", current, e))?;
        let addr = SocketAddr::new(
            self.address.unwrap_or(current.ip()),
            self.port.unwrap_or(current.port()),
        );
        Ok(Some(addr.to_string()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    args.apply(&mut config)?;
    config.validate()?;
    config.require_targets()?;

    kea_common::init_tracing(&config.logging)?;

    info!("Starting Kea Prometheus Exporter");

    let tls = match (&config.tls.client_cert, &config.tls.client_key) {
        (Some(cert), Some(key)) => Some(TlsIdentity::load(cert, key)?),
        _ => None,
    };

    // Build endpoints; a broken target is skipped rather than fatal
    let mut clients = Vec::with_capacity(config.targets.len());
    for target in &config.targets {
        let client = Endpoint::parse(target, config.timeout())
            .and_then(|endpoint| ControlClient::from_endpoint(&endpoint, tls.as_ref()));
        match client {
            Ok(client) => clients.push(client),
            Err(e) => error!(error = %e, "Skipping endpoint"),
        }
    }
    if clients.is_empty() {
        anyhow::bail!("No usable Kea endpoint configured");
    }

    // Mapping table defects are fatal here, before any scrape
    let mapper = StatsMapper::new(MappingTable::kea(), Arc::new(FamilyRegistry::new()))
        .map_err(|e| anyhow::anyhow!("Invalid metric mapping: {}", e))?
        .with_exclusions(config.filters.exclude_patterns()?);

    let collector = Arc::new(ScrapeCollector::new(
        clients,
        Arc::new(mapper),
        ScrapeSettings::from_config(&config),
        config.prometheus.prefix.clone(),
    )?);
    info!(endpoints = collector.endpoint_count(), "Endpoints configured");

    // Parse listen address
    let listen_addr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_server = HttpServer::new(
        collector.clone(),
        listen_addr,
        config.prometheus.path.clone(),
    );
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(shutdown_rx).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    // Print final stats
    let stats = collector.stats();
    info!(
        scrapes = stats.scrapes,
        endpoint_failures = stats.endpoint_failures,
        deadlines_exceeded = stats.deadlines_exceeded,
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("kea-exporter").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_short_options_override_config() {
        let mut config = ExporterConfig::default();
        parse(&[
            "-a",
            "127.0.0.1",
            "-p",
            "9100",
            "-i",
            "5",
            "--timeout",
            "3",
            "/run/kea/kea4-ctrl-socket",
            "http://ca:8000",
        ])
        .apply(&mut config)
        .unwrap();

        assert_eq!(config.prometheus.listen, "127.0.0.1:9100");
        assert_eq!(config.min_scrape_interval_secs, 5);
        assert_eq!(config.timeout_secs, 3);
        assert_eq!(config.targets, vec!["/run/kea/kea4-ctrl-socket", "http://ca:8000"]);
    }

    #[test]
    fn test_address_and_port_merge_with_listen() {
        let mut args = parse(&["--port", "9100", "/run/kea/a"]);
        args.address = None;
        assert_eq!(
            args.listen_override("10.0.0.1:9547").unwrap().as_deref(),
            Some("10.0.0.1:9100")
        );

        let mut args = parse(&["--address", "::1", "/run/kea/a"]);
        args.port = None;
        assert_eq!(
            args.listen_override("0.0.0.0:9547").unwrap().as_deref(),
            Some("[::1]:9547")
        );

        let args = parse(&["--listen", "127.0.0.1:1", "-a", "10.0.0.1", "/run/kea/a"]);
        assert_eq!(
            args.listen_override("0.0.0.0:9547").unwrap().as_deref(),
            Some("127.0.0.1:1")
        );
    }

    #[test]
    fn test_environment_variable_names() {
        let command = Args::command();
        let env_of = |id: &str| {
            command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_env())
                .and_then(|env| env.to_str())
                .map(String::from)
        };

        for (id, env) in [
            ("targets", "TARGETS"),
            ("address", "ADDRESS"),
            ("port", "PORT"),
            ("interval", "INTERVAL"),
            ("timeout", "TIMEOUT"),
            ("client_cert", "CLIENT_CERT"),
            ("client_key", "CLIENT_KEY"),
        ] {
            assert_eq!(env_of(id).as_deref(), Some(env), "{id}");
        }
        assert_eq!(env_of("listen"), None);
    }
}
