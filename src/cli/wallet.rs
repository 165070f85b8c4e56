use clap::Subcommand;
use uuid::Uuid;

use crate::error::{Result, WalletError};
use crate::node::VaultNode;

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Create a wallet, optionally from an existing seed
    Create {
        #[arg(long)]
        seed: Option<String>,
    },
    /// List the wallet's accounts
    ListAccounts {
        #[arg(long)]
        wallet: String,
    },
    /// Derive the next account, or `count` of them
    AccountCreate {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        count: Option<u32>,
    },
    /// Encrypt the wallet secrets with a password (empty disables)
    Encrypt {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        password: String,
    },
    /// Check a password against an encrypted wallet
    Unlock {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        password: String,
    },
    /// Drop any cached plaintext for the wallet
    Lock {
        #[arg(long)]
        wallet: String,
    },
}

fn parse_wallet(wallet: &str) -> Result<Uuid> {
    Uuid::parse_str(wallet).map_err(|_| WalletError::WalletNotFound)
}

pub async fn handle_wallet_command(node: &VaultNode, cmd: WalletCommands) -> Result<()> {
    match cmd {
        WalletCommands::Create { seed } => {
            let wallet = node.wallets.create(seed.as_deref())?;
            println!("Wallet created: {}", wallet.id);
            if let Some(first) = node.ledger.list(&wallet.id, 1)?.first() {
                println!("Account 0: {}", first.address);
            }
        }
        WalletCommands::ListAccounts { wallet } => {
            let id = parse_wallet(&wallet)?;
            for account in node.ledger.list(&id, 0)? {
                match account.index {
                    Some(index) => println!("{:>6}  {}", index, account.address),
                    None => println!("{:>6}  {}", "adhoc", account.address),
                }
            }
        }
        WalletCommands::AccountCreate { wallet, count } => {
            let id = parse_wallet(&wallet)?;
            let accounts = match count {
                Some(count) => node.ledger.create_batch(&id, count).await?,
                None => vec![node.ledger.create_next(&id).await?],
            };
            for account in accounts {
                println!("{}", account.address);
            }
        }
        WalletCommands::Encrypt { wallet, password } => {
            let id = parse_wallet(&wallet)?;
            node.vault.set_password(&id, &password).await?;
            if password.is_empty() {
                println!("Encryption disabled for {}", id);
            } else {
                println!("Wallet {} encrypted", id);
            }
        }
        WalletCommands::Unlock { wallet, password } => {
            let id = parse_wallet(&wallet)?;
            node.vault.unlock(&id, &password).await?;
            println!("Password valid for {}", id);
        }
        WalletCommands::Lock { wallet } => {
            let id = parse_wallet(&wallet)?;
            node.vault.lock(&id).await?;
            println!("Wallet {} locked", id);
        }
    }
    Ok(())
}
