//! neromon - the marketplace DHT daemon.
//!
//! Owns the overlay identity, the routing table and the content store.
//! Peers reach it over the overlay transport; local clients speak
//! newline-delimited JSON over a Unix socket.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UnixListener;
use tokio::select;
use tokio::signal;
use tokio::time::interval;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use nero_core::{NodeId, RecordKey, EXPIRY_SWEEP_SECS};
use nero_dht::{ContentStore, ContentStoreConfig, Engine, EngineConfig, MappingSink, RecordMirror};
use nero_net::{StreamTransport, Transport, TransportError};
use nero_proto::{Record, RecordTag};
use nero_store::{DataLayout, MappingsIndex, RecordBlobs, StoreError};

mod bridge;

use bridge::BridgeServer;

/// Exit code for configuration errors.
const EXIT_CONFIG: u8 = 1;
/// Exit code when the listen endpoint cannot be bound.
const EXIT_PORT_IN_USE: u8 = 2;
/// Exit code for fatal storage failures.
const EXIT_STORAGE: u8 = 3;

/// Marketplace DHT daemon.
#[derive(Parser)]
#[command(name = "neromon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overlay endpoint to listen on
    #[arg(long)]
    listen: Option<String>,

    /// Data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Bootstrap endpoint; may be given multiple times
    #[arg(long = "bootstrap")]
    bootstrap: Vec<String>,
}

/// Daemon configuration, from the TOML file with CLI overrides.
#[derive(Debug, Clone)]
struct DaemonConfig {
    listen: String,
    public_endpoint: Option<String>,
    bootstrap: Vec<String>,
    data_dir: PathBuf,
    maintenance_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("neromon");
        Self {
            listen: "0.0.0.0:38081".to_string(),
            public_endpoint: None,
            bootstrap: Vec::new(),
            data_dir,
            maintenance_secs: EXPIRY_SWEEP_SECS,
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<DaemonConfig> {
    let mut config = DaemonConfig::default();
    let Some(path) = path else {
        return Ok(config);
    };

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let toml: toml::Value = content.parse().context("failed to parse config file")?;

    if let Some(network) = toml.get("network") {
        if let Some(listen) = network.get("listen").and_then(|v| v.as_str()) {
            config.listen = listen.to_string();
        }
        if let Some(public) = network.get("public_endpoint").and_then(|v| v.as_str()) {
            config.public_endpoint = Some(public.to_string());
        }
        if let Some(bootstrap) = network.get("bootstrap").and_then(|v| v.as_array()) {
            config.bootstrap = bootstrap
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect();
        }
    }

    if let Some(storage) = toml.get("storage") {
        if let Some(data_dir) = storage.get("data_dir").and_then(|v| v.as_str()) {
            config.data_dir = PathBuf::from(data_dir);
        }
    }

    if let Some(daemon) = toml.get("daemon") {
        if let Some(secs) = daemon.get("maintenance_secs").and_then(|v| v.as_integer()) {
            config.maintenance_secs = secs.max(1) as u64;
        }
    }

    Ok(config)
}

/// Mirrors accepted records into the blob directory.
struct BlobMirror {
    blobs: RecordBlobs,
}

impl RecordMirror for BlobMirror {
    fn persist(&self, record: &Record) {
        if let Err(e) = self.blobs.save(record) {
            warn!(key = %record.key, error = %e, "failed to mirror record");
        }
    }

    fn purge(&self, key: &RecordKey) {
        self.blobs.delete(key);
    }
}

/// Feeds inbound MAP hints into the local index after light checks.
struct IndexSink {
    mappings: Arc<MappingsIndex>,
}

impl MappingSink for IndexSink {
    fn add(&self, search_term: &str, key: &RecordKey, content: &str) -> bool {
        // Hints are advisory; anything out of shape is silently ignored.
        if search_term.is_empty() || search_term.len() > 120 {
            return false;
        }
        if content.parse::<RecordTag>().is_err() {
            return false;
        }
        self.mappings.add(search_term, key, content).unwrap_or(false)
    }
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set up logging")
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if init_logging(cli.verbose).is_err() {
        return ExitCode::from(EXIT_CONFIG);
    }

    let mut config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    config.bootstrap.extend(cli.bootstrap);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

async fn run(config: DaemonConfig) -> Result<(), u8> {
    let layout = DataLayout::new(&config.data_dir);
    if let Err(e) = layout.create_dirs() {
        error!(error = %e, dir = %config.data_dir.display(), "cannot create data directory");
        return Err(EXIT_STORAGE);
    }

    // Local persistent state: fatal when unusable.
    let mappings = match MappingsIndex::open(&layout.db_path()) {
        Ok(index) => Arc::new(index),
        Err(e) => {
            error!(error = %e, "cannot open mappings index");
            return Err(EXIT_STORAGE);
        }
    };
    let blobs = match RecordBlobs::open(layout.records_dir()) {
        Ok(blobs) => blobs,
        Err(e) => {
            error!(error = %e, "cannot open record store");
            return Err(EXIT_STORAGE);
        }
    };
    // A transient read error gets one retry; corruption is fatal.
    let seed_records = match blobs.load_all() {
        Ok(records) => records,
        Err(StoreError::Io(e)) => {
            warn!(error = %e, "record store read failed, retrying");
            match blobs.load_all() {
                Ok(records) => records,
                Err(e) => {
                    error!(error = %e, "record store unreadable");
                    return Err(EXIT_STORAGE);
                }
            }
        }
        Err(e) => {
            error!(error = %e, "record store corrupt");
            return Err(EXIT_STORAGE);
        }
    };

    // Bind the overlay listener before wiring anything else; a taken
    // port is its own exit code.
    let transport: Arc<dyn Transport> = Arc::new(StreamTransport::new());
    let listener = match transport.listen(&config.listen).await {
        Ok(listener) => listener,
        Err(TransportError::InvalidEndpoint(endpoint)) => {
            error!(endpoint = %endpoint, "invalid listen endpoint");
            return Err(EXIT_CONFIG);
        }
        Err(e) => {
            error!(error = %e, endpoint = %config.listen, "cannot bind listener");
            return Err(EXIT_PORT_IN_USE);
        }
    };

    let advertised = config
        .public_endpoint
        .clone()
        .unwrap_or_else(|| listener.local_endpoint());
    let self_id = NodeId::from_identity(&advertised);
    info!(node_id = %self_id.to_hex(), endpoint = %advertised, "overlay identity derived");

    // The wallet owns the RSA keypair; the core only looks for it.
    // Without one, records are validated structurally and signature
    // verification stays with the publisher's peers.
    let address = advertised.split(':').next().unwrap_or(&advertised);
    match nero_store::read_keypair(&layout.keys_dir(), address) {
        Ok(Some(_)) => info!(address, "wallet keypair found"),
        Ok(None) => debug!(address, "no wallet keypair"),
        Err(e) => warn!(error = %e, "failed to read wallet keypair"),
    }

    let store = ContentStore::new(ContentStoreConfig::default());
    for record in seed_records {
        if let Err(e) = store.put(record) {
            warn!(error = %e, "dropping stale record from previous run");
        }
    }

    let engine = Arc::new(
        Engine::new(EngineConfig::new(self_id, advertised.clone()), store, transport)
            .with_mirror(Arc::new(BlobMirror { blobs }))
            .with_mapping_sink(Arc::new(IndexSink {
                mappings: mappings.clone(),
            })),
    );

    let peer_loop = tokio::spawn(engine.clone().serve(listener));

    // Client bridge on the local socket.
    let socket_path = layout.bridge_socket();
    let _ = std::fs::remove_file(&socket_path);
    let bridge_listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, path = %socket_path.display(), "cannot bind bridge socket");
            return Err(EXIT_STORAGE);
        }
    };
    let bridge = Arc::new(BridgeServer::new(engine.clone(), mappings));
    let bridge_loop = tokio::spawn(bridge.serve(bridge_listener));

    if !config.bootstrap.is_empty() {
        let reached = engine.bootstrap(&config.bootstrap).await;
        info!(
            reached,
            total = config.bootstrap.len(),
            "bootstrap finished"
        );
    }

    info!(
        listen = %config.listen,
        data_dir = %config.data_dir.display(),
        records = engine.store().len(),
        "neromon running"
    );

    let mut maintenance = interval(Duration::from_secs(config.maintenance_secs));
    maintenance.tick().await; // first tick fires immediately

    loop {
        select! {
            _ = maintenance.tick() => {
                engine.maintenance_tick().await;
            }
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "signal handler failed");
                }
                info!("shutting down");
                break;
            }
        }
    }

    peer_loop.abort();
    bridge_loop.abort();
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.listen, "0.0.0.0:38081");
        assert!(config.bootstrap.is_empty());
        assert_eq!(config.maintenance_secs, EXPIRY_SWEEP_SECS);
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[network]
listen = "127.0.0.1:40000"
public_endpoint = "market3xkwpd7a.onion:38081"
bootstrap = ["seed1.onion:38081", "seed2.onion:38081"]

[storage]
data_dir = "/tmp/neromon-test"

[daemon]
maintenance_secs = 5
"#
        )
        .unwrap();

        let config = load_config(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.listen, "127.0.0.1:40000");
        assert_eq!(
            config.public_endpoint.as_deref(),
            Some("market3xkwpd7a.onion:38081")
        );
        assert_eq!(config.bootstrap.len(), 2);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/neromon-test"));
        assert_eq!(config.maintenance_secs, 5);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let path = PathBuf::from("/nonexistent/neromon.toml");
        assert!(load_config(Some(&path)).is_err());
    }
}
