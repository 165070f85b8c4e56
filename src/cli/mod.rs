pub mod node;
pub mod wallet;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nanovault")]
#[command(about = "Custodial Nano/Banano wallet server", long_about = None)]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true, default_value = "nanovault.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the wallet gateway
    Server {
        /// Keep everything in memory instead of the configured sled store
        #[arg(long, default_value = "false")]
        in_memory: bool,
    },
    /// Wallet management against the local store
    Wallet {
        #[command(subcommand)]
        cmd: wallet::WalletCommands,
    },
    /// Seed utilities
    Seed {
        #[command(subcommand)]
        cmd: SeedCommands,
    },
}

#[derive(Subcommand)]
pub enum SeedCommands {
    /// Print a fresh random seed
    Generate,
}
