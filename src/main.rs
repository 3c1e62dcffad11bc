//! Shardstore
//!
//! Runs either a storage node or one coordinator operation.
//!
//! # Usage
//!
//! ```text
//! shardstore --config cluster.yaml node --index 0
//! shardstore --config cluster.yaml store --file cat.png --mode erasure_coding_rs --max-erasures 1
//! shardstore --config cluster.yaml retrieve --id <file-id> --out cat.png
//! shardstore --config cluster.yaml repair --mode erasure_coding_rs
//! shardstore --config cluster.yaml list
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shardstore::adapters::JsonFileRepository;
use shardstore::config::ClusterConfig;
use shardstore::coordinator::Coordinator;
use shardstore::domain::{CodingParams, FileId, FileRepository, StorageMode};
use shardstore::node::StorageNode;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Shardstore - erasure-coded distributed object store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cluster configuration file (YAML); a local four-node layout when omitted
    #[arg(long, env = "SHARDSTORE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// File metadata document used by coordinator commands
    #[arg(
        long,
        env = "SHARDSTORE_METADATA",
        default_value = "./metadata.json",
        global = true
    )]
    metadata: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a storage node until interrupted
    Node {
        /// Index of this node in the registry
        #[arg(long, env = "NODE_INDEX")]
        index: usize,

        /// Override the configured data directory
        #[arg(long, env = "DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Metrics server bind address
        #[arg(long, env = "METRICS_ADDR")]
        metrics_addr: Option<String>,
    },

    /// Store a file and record it in the metadata document
    Store {
        #[arg(long)]
        file: PathBuf,

        #[arg(long, default_value = "erasure_coding_rs")]
        mode: StorageMode,

        /// Fragments that may be lost (ignored by raid1)
        #[arg(long, default_value = "1")]
        max_erasures: usize,

        /// Coded subfragments per node (erasure_coding_rlnc only)
        #[arg(long, default_value = "1")]
        subfragments_per_node: usize,

        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
    },

    /// Rebuild a stored file
    Retrieve {
        #[arg(long)]
        id: String,

        #[arg(long)]
        out: PathBuf,
    },

    /// Regenerate lost fragments
    Repair {
        /// Only files stored with this mode
        #[arg(long)]
        mode: Option<StorageMode>,
    },

    /// List recorded files
    List,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = match &args.config {
        Some(path) => ClusterConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClusterConfig::default(),
    };

    match args.command {
        Command::Node {
            index,
            data_dir,
            metrics_addr,
        } => run_node(config, index, data_dir, metrics_addr).await,
        Command::Store {
            file,
            mode,
            max_erasures,
            subfragments_per_node,
            content_type,
        } => {
            let params = CodingParams {
                mode,
                max_erasures,
                subfragments_per_node,
            };
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());

            let repository = JsonFileRepository::new(&args.metadata);
            let mut coordinator = connect(config).await?;
            let id = coordinator
                .put_file(&repository, &file_name, &content_type, &data, &params)
                .await
                .context("store failed")?;
            println!("{}", id);
            Ok(())
        }
        Command::Retrieve { id, out } => {
            let repository = JsonFileRepository::new(&args.metadata);
            let mut coordinator = connect(config).await?;
            let (record, data) = coordinator
                .get_file(&repository, &FileId::from(id.as_str()))
                .await
                .context("retrieve failed")?;
            tokio::fs::write(&out, &data)
                .await
                .with_context(|| format!("writing {}", out.display()))?;
            info!(file = %record.id, name = %record.file_name, bytes = data.len(), "File retrieved");
            Ok(())
        }
        Command::Repair { mode } => {
            let repository = JsonFileRepository::new(&args.metadata);
            let mut coordinator = connect(config).await?;
            let report = match mode {
                Some(mode) => coordinator.repair_mode(&repository, mode).await,
                None => coordinator.repair_all(&repository).await,
            }
            .context("repair failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::List => {
            let repository = JsonFileRepository::new(&args.metadata);
            for record in repository.list().await? {
                println!(
                    "{}\t{}\t{}\t{} bytes",
                    record.id, record.storage_mode, record.file_name, record.size
                );
            }
            Ok(())
        }
    }
}

/// Bind the coordinator and wait until every node has connected.
async fn connect(config: ClusterConfig) -> Result<Coordinator> {
    let coordinator = Coordinator::bind(Arc::new(config))
        .await
        .context("binding coordinator channels")?;
    coordinator
        .wait_for_cluster()
        .await
        .context("waiting for storage nodes")?;
    Ok(coordinator)
}

async fn run_node(
    mut config: ClusterConfig,
    index: usize,
    data_dir: Option<PathBuf>,
    metrics_addr: Option<String>,
) -> Result<()> {
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }

    info!("Starting storage node {}", index);
    info!("  Data directory: {}", config.node_dir(index).display());
    info!("  Peer address: {}", config.peer_address(index)?);

    if let Some(addr) = metrics_addr {
        tokio::spawn(async move {
            if let Err(e) = shardstore::metrics::serve(&addr).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let node = StorageNode::open(Arc::new(config), index)
        .await
        .context("opening storage node")?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
        }
        trigger.cancel();
    });

    node.run(shutdown).await?;
    info!("Storage node shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "hyper_util=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
