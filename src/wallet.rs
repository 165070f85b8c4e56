use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::account::Account;
use crate::crypto::{generate_seed, parse_seed, KeyPair};
use crate::encoding::{is_valid_address, Network};
use crate::error::{Result, WalletError};
use crate::lock::{acquire, wallet_lock_name, ALLOCATION_TTL};
use crate::vault::{SecretStore, SEED_FIELD};

/// A custodial wallet: one seed, many accounts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    pub id: Uuid,
    /// Hex seed, plaintext or AES-GCM ciphertext depending on `encrypted`.
    pub seed: String,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub representative: Option<String>,
    #[serde(default = "default_work_enabled")]
    pub work_enabled: bool,
    pub created_at: i64,
}

fn default_work_enabled() -> bool {
    true
}

impl Wallet {
    pub fn new(seed: String) -> Self {
        Wallet {
            id: Uuid::new_v4(),
            seed,
            encrypted: false,
            representative: None,
            work_enabled: true,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Wallet lifecycle on top of the secret store.
pub struct WalletManager {
    vault: Arc<SecretStore>,
    network: Network,
}

impl WalletManager {
    pub fn new(vault: Arc<SecretStore>, network: Network) -> Self {
        WalletManager { vault, network }
    }

    pub fn generate_seed() -> String {
        generate_seed()
    }

    /// Creates a wallet from `seed` (or a fresh one) together with account 0.
    pub fn create(&self, seed: Option<&str>) -> Result<Wallet> {
        let seed = match seed {
            Some(s) => s.to_uppercase(),
            None => generate_seed(),
        };
        let raw = parse_seed(&seed)?;
        let wallet = Wallet::new(seed);
        let first = Account::sequential(wallet.id, 0, KeyPair::from_seed(&raw, 0).address(self.network));
        self.vault.store().insert_wallet(&wallet, &[first])?;
        info!("Created wallet {}", wallet.id);
        Ok(wallet)
    }

    pub fn get(&self, id: &str) -> Result<Wallet> {
        let id = Uuid::parse_str(id).map_err(|_| WalletError::WalletNotFound)?;
        self.vault.wallet(&id)
    }

    /// Deletes the wallet, its accounts and block records. The secret must be readable.
    pub async fn destroy(&self, id: &Uuid) -> Result<()> {
        let wallet = self.vault.wallet(id)?;
        let name = wallet_lock_name(&wallet.id);
        let lease = acquire(self.vault.locks().as_ref(), &name, ALLOCATION_TTL, self.vault.retry()).await?;
        let result = self
            .vault
            .read_secret(&wallet, SEED_FIELD)
            .and_then(|_| self.vault.store().delete_wallet(&wallet.id));
        self.vault.locks().release(&lease).await?;
        result?;
        self.vault.forget(&wallet.id);
        info!("Destroyed wallet {}", wallet.id);
        Ok(())
    }

    pub async fn set_representative(&self, wallet_id: &Uuid, representative: &str) -> Result<()> {
        if !is_valid_address(representative, self.network) {
            return Err(WalletError::InvalidAddress(representative.to_string()));
        }
        let name = wallet_lock_name(wallet_id);
        let lease = acquire(self.vault.locks().as_ref(), &name, ALLOCATION_TTL, self.vault.retry()).await?;
        // re-read under the lock so a concurrent re-encrypt is not overwritten
        let result = self.vault.wallet(wallet_id).and_then(|mut wallet| {
            wallet.representative = Some(representative.to_string());
            self.vault.store().update_wallet(&wallet)
        });
        self.vault.locks().release(&lease).await?;
        result
    }

    pub fn representative(&self, id: &Uuid) -> Result<Option<String>> {
        Ok(self.vault.wallet(id)?.representative)
    }
}
