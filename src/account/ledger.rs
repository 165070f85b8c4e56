//! Concurrency-safe account allocation.
//!
//! Every write takes the `wallet:{id}` lease so that concurrent allocators
//! (in this process or another engine sharing the provider) see each other's
//! highest index.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use super::types::Account;
use crate::crypto::{parse_seed, KeyPair};
use crate::encoding::Network;
use crate::error::{Result, WalletError};
use crate::lock::{acquire, wallet_lock_name, ALLOCATION_TTL};
use crate::vault::{SecretStore, SEED_FIELD};
use crate::wallet::Wallet;

/// Upper bound on indices skipped because an ad-hoc import already owns the address.
pub const MAX_ALLOCATION_ATTEMPTS: u32 = 64;

/// Largest `count` a single `create_batch` call accepts.
pub const MAX_BATCH: u32 = 1000;

/// Account counts reported by `wallet_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountSummary {
    pub accounts: usize,
    pub adhoc: usize,
    pub deterministic: usize,
    /// Highest sequential index, 0 when there is none.
    pub deterministic_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedChange {
    /// Address at the highest restored index.
    pub last_restored_account: String,
    pub restored_count: usize,
}

pub struct AccountLedger {
    vault: Arc<SecretStore>,
    network: Network,
}

impl AccountLedger {
    pub fn new(vault: Arc<SecretStore>, network: Network) -> Self {
        AccountLedger { vault, network }
    }

    async fn with_wallet_lock<T, F>(&self, wallet_id: &Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&Wallet) -> Result<T>,
    {
        let name = wallet_lock_name(wallet_id);
        let lease = acquire(self.vault.locks().as_ref(), &name, ALLOCATION_TTL, self.vault.retry()).await?;
        let result = self.vault.wallet(wallet_id).and_then(|wallet| f(&wallet));
        self.vault.locks().release(&lease).await?;
        result
    }

    /// Derives the account after the wallet's highest index, skipping taken addresses.
    pub async fn create_next(&self, wallet_id: &Uuid) -> Result<Account> {
        self.with_wallet_lock(wallet_id, |wallet| {
            let seed = self.vault.seed(wallet)?;
            let store = self.vault.store();
            let mut index = store.max_index(&wallet.id)?.unwrap_or(0);

            for _ in 0..MAX_ALLOCATION_ATTEMPTS {
                index = index
                    .checked_add(1)
                    .ok_or(WalletError::AllocationExhausted(MAX_ALLOCATION_ATTEMPTS))?;
                let address = KeyPair::from_seed(&seed, index).address(self.network);
                if store.get_account(&wallet.id, &address)?.is_some() {
                    debug!("Index {} of wallet {} collides with {}", index, wallet.id, address);
                    continue;
                }
                let account = Account::sequential(wallet.id, index, address);
                store.insert_accounts(std::slice::from_ref(&account))?;
                info!("Allocated {} at index {} for wallet {}", account.address, index, wallet.id);
                return Ok(account);
            }
            Err(WalletError::AllocationExhausted(MAX_ALLOCATION_ATTEMPTS))
        })
        .await
    }

    pub async fn create_at(&self, wallet_id: &Uuid, index: u32) -> Result<Account> {
        self.with_wallet_lock(wallet_id, |wallet| {
            let seed = self.vault.seed(wallet)?;
            let address = KeyPair::from_seed(&seed, index).address(self.network);
            let store = self.vault.store();
            if store.get_account(&wallet.id, &address)?.is_some() {
                return Err(WalletError::AccountExists(address));
            }
            let account = Account::sequential(wallet.id, index, address);
            store.insert_accounts(std::slice::from_ref(&account))?;
            Ok(account)
        })
        .await
    }

    /// Allocates `count` accounts above the current maximum in one transaction.
    pub async fn create_batch(&self, wallet_id: &Uuid, count: u32) -> Result<Vec<Account>> {
        if !(1..=MAX_BATCH).contains(&count) {
            return Err(WalletError::InvalidCount);
        }
        self.with_wallet_lock(wallet_id, |wallet| {
            let seed = self.vault.seed(wallet)?;
            let store = self.vault.store();
            let mut index = store.max_index(&wallet.id)?.unwrap_or(0);
            let mut skipped = 0;
            let mut accounts = Vec::new();

            while accounts.len() < count as usize {
                index = index
                    .checked_add(1)
                    .ok_or(WalletError::AllocationExhausted(MAX_ALLOCATION_ATTEMPTS))?;
                let address = KeyPair::from_seed(&seed, index).address(self.network);
                if store.get_account(&wallet.id, &address)?.is_some() {
                    skipped += 1;
                    if skipped >= MAX_ALLOCATION_ATTEMPTS {
                        return Err(WalletError::AllocationExhausted(MAX_ALLOCATION_ATTEMPTS));
                    }
                    continue;
                }
                accounts.push(Account::sequential(wallet.id, index, address));
            }

            store.insert_accounts(&accounts)?;
            info!("Allocated {} accounts for wallet {}", accounts.len(), wallet.id);
            Ok(accounts)
        })
        .await
    }

    /// Imports a private key. Importing an address the wallet already owns returns
    /// the existing account unchanged.
    pub async fn import_adhoc(&self, wallet_id: &Uuid, private_key: &str) -> Result<Account> {
        let pair = KeyPair::from_hex(private_key)?;
        let address = pair.address(self.network);
        self.with_wallet_lock(wallet_id, |wallet| {
            let store = self.vault.store();
            if let Some(existing) = store.get_account(&wallet.id, &address)? {
                return Ok(existing);
            }
            let sealed = self.vault.seal_adhoc_key(wallet, &address, &pair.secret_hex())?;
            let account = Account::adhoc(wallet.id, address.clone(), sealed);
            store.insert_accounts(std::slice::from_ref(&account))?;
            info!("Imported {} into wallet {}", address, wallet.id);
            Ok(account)
        })
        .await
    }

    /// Replaces the wallet seed and re-derives every sequential index the wallet
    /// held (index 0 when it held none). Ad-hoc accounts are kept, and a derived
    /// address one of them already owns is skipped.
    pub async fn change_seed(&self, wallet_id: &Uuid, seed: &str) -> Result<SeedChange> {
        let seed = seed.to_uppercase();
        let raw = parse_seed(&seed)?;
        self.with_wallet_lock(wallet_id, |wallet| {
            self.ensure_initialized(wallet)?;
            let store = self.vault.store();
            let mut indices: Vec<u32> = store
                .list_accounts(&wallet.id, 0)?
                .iter()
                .filter_map(|a| a.index)
                .collect();
            if indices.is_empty() {
                indices.push(0);
            }

            let mut accounts = Vec::with_capacity(indices.len());
            for index in indices {
                let address = KeyPair::from_seed(&raw, index).address(self.network);
                if store
                    .get_account(&wallet.id, &address)?
                    .is_some_and(|a| a.is_adhoc())
                {
                    debug!("Index {} of wallet {} already imported as {}", index, wallet.id, address);
                    continue;
                }
                accounts.push(Account::sequential(wallet.id, index, address));
            }

            let mut updated = wallet.clone();
            updated.seed = self.vault.seal_seed(wallet, &seed)?;
            store.replace_sequential_accounts(&updated, &accounts)?;
            self.vault.remember_seed(wallet, &seed);

            let last_restored_account = accounts.last().map(|a| a.address.clone()).unwrap_or_default();
            info!("Changed seed of wallet {}, restored {} accounts", wallet.id, accounts.len());
            Ok(SeedChange {
                last_restored_account,
                restored_count: accounts.len(),
            })
        })
        .await
    }

    pub fn summary(&self, wallet_id: &Uuid) -> Result<AccountSummary> {
        let accounts = self.list(wallet_id, 0)?;
        let adhoc = accounts.iter().filter(|a| a.is_adhoc()).count();
        Ok(AccountSummary {
            accounts: accounts.len(),
            adhoc,
            deterministic: accounts.len() - adhoc,
            deterministic_index: accounts.iter().filter_map(|a| a.index).max().unwrap_or(0),
        })
    }

    // accounts are only visible while the seed is readable
    fn ensure_initialized(&self, wallet: &Wallet) -> Result<()> {
        self.vault.read_secret(wallet, SEED_FIELD).map(|_| ())
    }

    pub fn list(&self, wallet_id: &Uuid, limit: usize) -> Result<Vec<Account>> {
        let wallet = self.vault.wallet(wallet_id)?;
        self.ensure_initialized(&wallet)?;
        self.vault.store().list_accounts(wallet_id, limit)
    }

    pub fn exists(&self, wallet_id: &Uuid, address: &str) -> Result<bool> {
        let wallet = self.vault.wallet(wallet_id)?;
        self.ensure_initialized(&wallet)?;
        Ok(self.vault.store().get_account(wallet_id, address)?.is_some())
    }

    pub fn get(&self, wallet_id: &Uuid, address: &str) -> Result<Account> {
        let wallet = self.vault.wallet(wallet_id)?;
        self.ensure_initialized(&wallet)?;
        self.vault
            .store()
            .get_account(wallet_id, address)?
            .ok_or(WalletError::AccountNotFound)
    }
}
