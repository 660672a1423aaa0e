use clap::{Args, Parser, Subcommand};
use shadowy_core::Wallet;
use shared::AddressKind;
use std::path::PathBuf;
use tracing::Level;

mod config;
mod consensus;
mod farming;
mod network;
mod node;
mod plots;
mod sync;

use config::NodeConfig;
use plots::{PlotCollection, DEFAULT_PLOT_CELLS};

#[derive(Parser)]
#[command(name = "shadowy")]
#[command(about = "Shadowy - Post-Quantum Proof-of-Space Blockchain Node")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a full node
    Start(StartArgs),
    /// Wallet keystore management
    Wallet(WalletArgs),
    /// Plot file management
    Plot(PlotArgs),
}

#[derive(Args)]
struct StartArgs {
    /// Peer listen port
    #[arg(long, default_value = "9000")]
    p2p_port: u16,

    /// Query surface port
    #[arg(long, default_value = "8080")]
    api_port: u16,

    /// Plot directories (repeatable)
    #[arg(long = "dir")]
    dirs: Vec<String>,

    /// Bootstrap peers as nodeid@host[:port] (repeatable)
    #[arg(long = "seed")]
    seeds: Vec<String>,

    /// Mempool entry age before eviction, in blocks
    #[arg(long, default_value = "2048")]
    mempool_tx_expiry_blocks: u64,

    /// Mempool byte cap, in MiB
    #[arg(long, default_value = "300")]
    mempool_max_size_mb: usize,

    /// Bearer key for mutating queries
    #[arg(long)]
    api_key: Option<String>,

    /// Data directory (chain DB + wallet keystore)
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Wallet keystore passphrase
    #[arg(long)]
    passphrase: Option<String>,

    /// Development mode: 10s blocks and a synthetic plot fallback
    #[arg(long)]
    dev: bool,
}

#[derive(Args)]
struct WalletArgs {
    #[command(subcommand)]
    action: WalletAction,
}

#[derive(Subcommand)]
enum WalletAction {
    /// Generate a new keystore
    New {
        /// Keystore path
        #[arg(long, default_value = "./data/wallet.json")]
        path: PathBuf,
        /// Encrypt the keystore with this passphrase
        #[arg(long)]
        passphrase: Option<String>,
    },
    /// Show the address of an existing keystore
    Show {
        /// Keystore path
        #[arg(long, default_value = "./data/wallet.json")]
        path: PathBuf,
        /// Keystore passphrase, when encrypted
        #[arg(long)]
        passphrase: Option<String>,
    },
}

#[derive(Args)]
struct PlotArgs {
    #[command(subcommand)]
    action: PlotAction,
}

#[derive(Subcommand)]
enum PlotAction {
    /// Generate plot files
    Init {
        /// Target directory
        #[arg(long, default_value = "./plots")]
        dir: PathBuf,
        /// Number of plot files
        #[arg(long, default_value = "1")]
        count: usize,
        /// Cells per plot
        #[arg(long, default_value_t = DEFAULT_PLOT_CELLS)]
        cells: u64,
    },
}

#[tokio::main]
async fn main() -> shared::Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Start(args) => {
            let config = NodeConfig {
                p2p_port: args.p2p_port,
                api_port: args.api_port,
                dirs: if args.dirs.is_empty() {
                    vec!["./plots".to_string()]
                } else {
                    args.dirs
                },
                seeds: args.seeds,
                mempool_tx_expiry_blocks: args.mempool_tx_expiry_blocks,
                mempool_max_size_mb: args.mempool_max_size_mb,
                api_key: args.api_key,
                data_dir: args.data_dir,
                wallet_passphrase: args.passphrase,
                dev: args.dev,
            };
            node::run(config).await
        }
        Commands::Wallet(args) => match args.action {
            WalletAction::New { path, passphrase } => {
                let wallet = Wallet::create(&path, passphrase.as_deref())?;
                println!("keystore: {}", path.display());
                println!("address:  {}", wallet.address());
                Ok(())
            }
            WalletAction::Show { path, passphrase } => {
                let wallet = Wallet::load(&path, passphrase.as_deref())?;
                println!("address:      {}", wallet.address());
                println!(
                    "node address: {}",
                    wallet.address().encode(AddressKind::Node)
                );
                Ok(())
            }
        },
        Commands::Plot(args) => match args.action {
            PlotAction::Init { dir, count, cells } => {
                for _ in 0..count {
                    let path = PlotCollection::generate(&dir, cells)?;
                    println!("plot: {}", path.display());
                }
                Ok(())
            }
        },
    }
}
