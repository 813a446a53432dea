//! onedari binary entry point.

use clap::{Args, Parser, Subcommand, ValueEnum};
use onedari::config::StoreBackend;
use onedari::announce::parse_labels;
use onedari::registry::build_store;
use onedari::{node, telemetry, Announcer, Config, DnsServer, RegistryServer};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Minimal service discovery: an HTTP registry exposed as a DNS zone.
#[derive(Parser, Debug)]
#[command(name = "onedari")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML). Missing files are ignored.
    #[arg(short, long, global = true, default_value = "onedari.toml")]
    config: PathBuf,

    /// Log level filter, overriding the config file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the registry HTTP API.
    Server(ServerArgs),
    /// Run the DNS server.
    Dns(DnsArgs),
    /// Periodically announce a local app to the registry.
    Announce(AnnounceArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StoreArg {
    Etcd,
    Memory,
}

impl From<StoreArg> for StoreBackend {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::Etcd => StoreBackend::Etcd,
            StoreArg::Memory => StoreBackend::Memory,
        }
    }
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// HTTP listen address.
    #[arg(long)]
    address: Option<SocketAddr>,

    /// Store backend.
    #[arg(long, value_enum)]
    store: Option<StoreArg>,

    /// etcd endpoints, comma separated.
    #[arg(long, value_delimiter = ',')]
    etcd: Option<Vec<String>>,

    /// Key prefix.
    #[arg(long)]
    prefix: Option<String>,

    /// Node name. Default is the short hostname.
    #[arg(long)]
    name: Option<String>,

    /// Node IP. Default is detected.
    #[arg(long)]
    ip: Option<Ipv4Addr>,
}

#[derive(Args, Debug)]
struct DnsArgs {
    /// Registry API endpoint.
    #[arg(short, long)]
    api: Option<String>,

    /// DNS listen address.
    #[arg(long)]
    address: Option<SocketAddr>,

    /// Zone to serve.
    #[arg(long)]
    domain: Option<String>,

    /// TTL of every answer, in seconds.
    #[arg(long)]
    ttl: Option<u32>,
}

#[derive(Args, Debug)]
struct AnnounceArgs {
    /// Application name.
    app: String,

    /// Instance labels as key=value.
    labels: Vec<String>,

    /// Registry API endpoint.
    #[arg(short, long)]
    api: Option<String>,

    /// Shell command that must exit 0 before each announce.
    #[arg(long)]
    check: Option<String>,

    /// Seconds between announces.
    #[arg(short, long)]
    interval: Option<u64>,

    /// Seconds a registration lives without a refresh.
    #[arg(short, long)]
    ttl: Option<u64>,

    /// Instance port.
    #[arg(long)]
    port: Option<u16>,

    /// SRV weight.
    #[arg(short, long)]
    weight: Option<u16>,

    /// SRV priority.
    #[arg(short, long)]
    priority: Option<u16>,

    /// Instance IP. Default is detected.
    #[arg(long)]
    ip: Option<Ipv4Addr>,
}

fn load_config(path: &Path) -> Result<Config, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix("ONEDARI")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

async fn shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                futures::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
    cancel.cancel();
}

async fn run_server(mut config: Config, args: ServerArgs, cancel: CancellationToken) -> Result<(), onedari::Error> {
    let settings = &mut config.registry;
    if let Some(address) = args.address {
        settings.listen_addr = address;
    }
    if let Some(store) = args.store {
        settings.store = store.into();
    }
    if let Some(etcd) = args.etcd {
        settings.etcd_endpoints = etcd;
    }
    if let Some(prefix) = args.prefix {
        settings.prefix = prefix;
    }
    if args.name.is_some() {
        settings.node_name = args.name;
    }
    if args.ip.is_some() {
        settings.node_ip = args.ip;
    }
    settings.validate()?;

    let node = node::resolve(settings)?;
    let store = build_store(settings)?;
    info!(
        listen_addr = %settings.listen_addr,
        store = ?settings.store,
        node = %node.id,
        "Starting registry"
    );
    RegistryServer::new(settings, store, node).run(cancel).await
}

async fn run_dns(mut config: Config, args: DnsArgs, cancel: CancellationToken) -> Result<(), onedari::Error> {
    let settings = &mut config.dns;
    if let Some(api) = args.api {
        settings.api_endpoint = api;
    }
    if let Some(address) = args.address {
        settings.listen_addr = address;
    }
    if let Some(domain) = args.domain {
        settings.zone = domain;
    }
    if let Some(ttl) = args.ttl {
        settings.ttl = ttl;
    }
    DnsServer::new(config.dns)?.run(cancel).await
}

async fn run_announce(
    mut config: Config,
    args: AnnounceArgs,
    cancel: CancellationToken,
) -> Result<(), onedari::Error> {
    let settings = &mut config.announce;
    settings.app = args.app;
    settings.labels.extend(parse_labels(&args.labels));
    if let Some(api) = args.api {
        settings.api_endpoint = api;
    }
    if args.check.is_some() {
        settings.check = args.check;
    }
    if let Some(interval) = args.interval {
        settings.interval_secs = interval;
    }
    if let Some(ttl) = args.ttl {
        settings.ttl_secs = ttl;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(weight) = args.weight {
        settings.weight = weight;
    }
    if let Some(priority) = args.priority {
        settings.priority = priority;
    }
    if args.ip.is_some() {
        settings.ip = args.ip;
    }
    Announcer::new(config.announce)?.run(cancel).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = load_config(&cli.config)?;
    if let Some(level) = cli.log_level {
        config.telemetry.log_level = level;
    }

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(config_file = %cli.config.display(), "Starting onedari");

    // Setup graceful shutdown
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let result = match cli.command {
        Command::Server(args) => run_server(config, args, cancel).await,
        Command::Dns(args) => run_dns(config, args, cancel).await,
        Command::Announce(args) => run_announce(config, args, cancel).await,
    };

    // Shutdown telemetry
    telemetry::shutdown();

    if let Err(e) = result {
        error!("onedari error: {}", e);
        return Err(e.into());
    }

    info!("onedari shutdown complete");
    Ok(())
}
