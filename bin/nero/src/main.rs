//! nero - command-line client for the neromon daemon.
//!
//! Speaks the bridge protocol: one JSON request per line over the
//! daemon's local socket, one response line back, correlated by id.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use nero_core::RecordKey;
use nero_proto::{BridgeRequest, BridgeResponse};

/// Marketplace DHT client.
#[derive(Parser)]
#[command(name = "nero")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path of the daemon's bridge socket
    #[arg(long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a record; the key is derived from the value
    Put {
        /// Record value (a JSON document with a metadata tag)
        value: String,

        /// Time to live in seconds
        #[arg(long, default_value = "3600")]
        ttl: u64,

        /// Image file to fingerprint into the record; may be given
        /// multiple times
        #[arg(long = "image")]
        images: Vec<PathBuf>,
    },

    /// Fetch a record by key
    Get {
        /// Record key hex
        key: String,
    },

    /// Drop a key from the local store and search index
    Remove {
        /// Record key hex
        key: String,
    },

    /// Add a search mapping
    Map {
        /// Search term
        search_term: String,

        /// Record key hex
        key: String,

        /// Content tag of the record
        content: String,
    },

    /// Query the local search index
    Search {
        /// Search term
        term: String,
    },

    /// Show daemon status
    Status,

    /// Truncate the daemon's record store (debug)
    Clear,
}

fn default_socket() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("neromon")
        .join("neromon.sock")
}

/// Fingerprints image files into the record's `images` array.
///
/// Each entry carries the piece size and the ordered piece hashes, so
/// buyers can fetch and verify the payload out of band. An unreadable
/// file is skipped with a warning; the record is still published.
fn attach_image_fingerprints(value: &str, images: &[PathBuf]) -> Result<String> {
    let mut doc: Value =
        serde_json::from_str(value).context("record value must be JSON to carry images")?;
    if !doc.is_object() {
        bail!("record value must be a JSON object to carry images");
    }

    let mut fingerprints = Vec::new();
    for path in images {
        match nero_pieces::hash_file(path) {
            Ok(set) => {
                let pieces: Vec<String> = set.pieces.iter().map(|p| p.hash_hex()).collect();
                fingerprints.push(json!({
                    "file": path.file_name().map(|n| n.to_string_lossy().into_owned()),
                    "length": set.source_len,
                    "piece_size": set.piece_size,
                    "pieces": pieces,
                }));
            }
            Err(e) => {
                eprintln!("warning: skipping image {}: {e}", path.display());
            }
        }
    }

    if !fingerprints.is_empty() {
        doc["images"] = Value::Array(fingerprints);
    }
    Ok(doc.to_string())
}

#[cfg(unix)]
async fn exchange(socket: &PathBuf, request: &BridgeRequest) -> Result<BridgeResponse> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;

    let stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("cannot reach daemon at {}", socket.display()))?;
    let (reader, mut writer) = stream.into_split();

    let mut line = serde_json::to_vec(request)?;
    line.push(b'\n');
    writer.write_all(&line).await?;

    let mut lines = BufReader::new(reader).lines();
    let response = lines
        .next_line()
        .await?
        .context("daemon closed the connection")?;
    Ok(serde_json::from_str(&response)?)
}

#[cfg(not(unix))]
async fn exchange(_socket: &PathBuf, _request: &BridgeRequest) -> Result<BridgeResponse> {
    bail!("the bridge socket is only available on POSIX systems");
}

async fn call(socket: &PathBuf, method: &str, params: Value) -> Result<Value> {
    let request = BridgeRequest {
        id: 1,
        method: method.to_string(),
        params,
    };
    let response = exchange(socket, &request).await?;

    if response.id != request.id {
        bail!("daemon answered with mismatched id {}", response.id);
    }
    if let Some(error) = response.error {
        bail!("{:?}: {}", error.code, error.message);
    }
    response.response.context("daemon sent an empty response")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set up logging")?;

    let socket = cli.socket.unwrap_or_else(default_socket);

    match cli.command {
        Commands::Put { value, ttl, images } => {
            let value = if images.is_empty() {
                value
            } else {
                attach_image_fingerprints(&value, &images)?
            };

            let key = RecordKey::from_value(value.as_bytes());
            let params = json!({ "key": key.to_hex(), "value": value, "ttl": ttl });
            let result = call(&socket, "put", params).await?;
            println!("{}", key.to_hex());
            eprintln!("stored at {} nodes", result["stored"]);
        }

        Commands::Get { key } => {
            let result = call(&socket, "get", json!({ "key": key })).await?;
            match result["value"].as_str() {
                Some(value) => println!("{value}"),
                None => bail!("daemon response carried no value"),
            }
        }

        Commands::Remove { key } => {
            let result = call(&socket, "remove", json!({ "key": key })).await?;
            eprintln!(
                "removed: {}, mappings purged: {}",
                result["removed"], result["purged"]
            );
        }

        Commands::Map {
            search_term,
            key,
            content,
        } => {
            let params = json!({ "search_term": search_term, "key": key, "content": content });
            let result = call(&socket, "map", params).await?;
            eprintln!("mapped: {}", result["mapped"]);
        }

        Commands::Search { term } => {
            let result = call(&socket, "search", json!({ "term": term })).await?;
            let empty = Vec::new();
            let rows = result["results"].as_array().unwrap_or(&empty);
            for row in rows {
                println!(
                    "{}  {}  {}",
                    row["key"].as_str().unwrap_or(""),
                    row["content"].as_str().unwrap_or(""),
                    row["search_term"].as_str().unwrap_or("")
                );
            }
        }

        Commands::Status => {
            let status = call(&socket, "status", Value::Null).await?;
            println!("host:            {}", status["host"].as_str().unwrap_or("?"));
            println!("connected peers: {}", status["connected_peers"]);
            println!("active peers:    {}", status["active_peers"]);
            println!("idle peers:      {}", status["idle_peers"]);
            println!("records:         {}", status["data_count"]);
            println!("record bytes:    {}", status["data_ram_usage"]);
            let empty = Vec::new();
            for peer in status["peers"].as_array().unwrap_or(&empty) {
                println!(
                    "  {}  {}  status={} distance={}",
                    peer["id"].as_str().unwrap_or(""),
                    peer["endpoint"].as_str().unwrap_or(""),
                    peer["status"],
                    peer["distance"]
                );
            }
        }

        Commands::Clear => {
            let result = call(&socket, "clear", Value::Null).await?;
            eprintln!("cleared {} records", result["cleared"]);
        }
    }

    Ok(())
}
