use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use nanovault::cli::{self, Cli, Commands, SeedCommands};
use nanovault::config::VaultConfig;
use nanovault::error::Result;
use nanovault::node::VaultNode;
use nanovault::wallet::WalletManager;

/// `RUST_LOG` wins over the configured level.
fn init_tracing(config: &VaultConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Seed {
            cmd: SeedCommands::Generate,
        } => {
            println!("{}", WalletManager::generate_seed());
            Ok(())
        }
        Commands::Server { in_memory } => {
            let config = VaultConfig::load_or_default(&cli.config);
            init_tracing(&config);
            cli::node::run_server(config, in_memory).await
        }
        Commands::Wallet { cmd } => {
            let config = VaultConfig::load_or_default(&cli.config);
            init_tracing(&config);
            let node = VaultNode::open(config, false)?;
            cli::wallet::handle_wallet_command(&node, cmd).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
