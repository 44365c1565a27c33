//! # Memory Gateway CLI (`memgate`)
//!
//! ```bash
//! memgate --config ./config/memgate.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `memgate serve` | Start the HTTP gateway |
//! | `memgate stats` | Print live on-chain audit-log totals |
//! | `memgate extract [FILE]` | Run metadata extraction on a file or stdin |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use memory_gateway::config::GatewayConfig;
use memory_gateway::metadata;
use memory_gateway::monad::{ChainLog, MonadLogger};
use memory_gateway::server;

/// Memory Gateway — semantic storage on the Internet Computer with an
/// on-chain audit trail on Monad.
#[derive(Parser)]
#[command(
    name = "memgate",
    about = "Memory agent gateway: Kinic vector storage with a Monad audit trail",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/memgate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway.
    ///
    /// Binds to `[server].bind`, starts the background cache refresh loop,
    /// and serves the public API until terminated.
    Serve,

    /// Print on-chain audit-log totals.
    ///
    /// Performs live reads against the configured contract; useful for
    /// verifying chain access without starting the server.
    Stats,

    /// Run metadata extraction on a file (or stdin) and print the result.
    ///
    /// Debugging aid: shows exactly the title, summary, tags, and
    /// fingerprint an `/insert` of this content would log on chain.
    Extract {
        /// Input file; reads stdin when omitted.
        file: Option<PathBuf>,

        /// Optional comma-separated user tags to merge.
        #[arg(long)]
        tags: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = GatewayConfig::load(&cli.config)?;

    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve => {
            server::run_server(config).await?;
        }
        Commands::Stats => {
            let chain = MonadLogger::new(&config.chain)?;
            let total = chain.total().await.map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("Memory Gateway — Chain Stats");
            println!("============================");
            println!();
            println!("  Contract:  {}", chain.contract_address());
            println!("  Signer:    {}", chain.signer_address());
            println!("  Records:   {}", total);
        }
        Commands::Extract { file, tags } => {
            let content = match file {
                Some(path) => std::fs::read_to_string(&path)?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let meta = metadata::extract(&content, tags.as_deref())
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("Title:       {}", meta.title);
            println!("Summary:     {}", meta.summary);
            println!("Tags:        {}", meta.tags);
            println!("Fingerprint: {}", meta.fingerprint);
        }
    }

    Ok(())
}
