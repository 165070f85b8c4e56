//! Secret lifecycle for wallets: plaintext, encrypted-locked and encrypted-unlocked.
//!
//! Durable rows hold either plaintext or ciphertext, never both. While an
//! encrypted wallet is unlocked its plaintext lives only in the [`SecretCache`].

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::account::Account;
use crate::cache::SecretCache;
use crate::crypto::{parse_seed, KeyPair, SecretCipher};
use crate::error::{Result, WalletError};
use crate::lock::{acquire, wallet_lock_name, LockProvider, RetryStrategy, ALLOCATION_TTL};
use crate::storage::Store;
use crate::wallet::Wallet;

pub const SEED_FIELD: &str = "seed";
pub const CIPHER_KEY_FIELD: &str = "cipher_key";

pub struct SecretStore {
    store: Arc<dyn Store>,
    cache: Arc<dyn SecretCache>,
    locks: Arc<dyn LockProvider>,
    retry: RetryStrategy,
}

impl SecretStore {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn SecretCache>,
        locks: Arc<dyn LockProvider>,
        retry: RetryStrategy,
    ) -> Self {
        SecretStore {
            store,
            cache,
            locks,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn locks(&self) -> &Arc<dyn LockProvider> {
        &self.locks
    }

    pub fn retry(&self) -> RetryStrategy {
        self.retry
    }

    pub fn wallet(&self, id: &Uuid) -> Result<Wallet> {
        self.store.get_wallet(id)?.ok_or(WalletError::WalletNotFound)
    }

    /// Enables, changes or (with an empty password) disables encryption.
    pub async fn set_password(&self, wallet_id: &Uuid, password: &str) -> Result<()> {
        let name = wallet_lock_name(wallet_id);
        let lease = acquire(self.locks.as_ref(), &name, ALLOCATION_TTL, self.retry).await?;
        let result = self.set_password_locked(wallet_id, password);
        self.locks.release(&lease).await?;
        result
    }

    fn set_password_locked(&self, wallet_id: &Uuid, password: &str) -> Result<()> {
        let mut wallet = self.wallet(wallet_id)?;
        if password.is_empty() && !wallet.encrypted {
            return Err(WalletError::BadPassword);
        }

        let seed = self.read_secret(&wallet, SEED_FIELD)?;
        let mut adhoc = self.adhoc_accounts(wallet_id)?;
        let mut plain_keys = Vec::with_capacity(adhoc.len());
        for account in &adhoc {
            plain_keys.push(self.read_secret(&wallet, &account.address)?);
        }

        if password.is_empty() {
            wallet.seed = seed;
            for (account, key) in adhoc.iter_mut().zip(plain_keys) {
                account.private_key = Some(key);
            }
            wallet.encrypted = false;
        } else {
            let cipher = SecretCipher::from_password(password);
            wallet.seed = cipher.encrypt(&seed)?;
            for (account, key) in adhoc.iter_mut().zip(plain_keys) {
                account.private_key = Some(cipher.encrypt(&key)?);
            }
            wallet.encrypted = true;
        }

        self.store.update_wallet_secrets(&wallet, &adhoc)?;
        self.cache.delete(wallet_id);
        info!(
            "Wallet {} encryption {}",
            wallet_id,
            if wallet.encrypted { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub async fn lock(&self, wallet_id: &Uuid) -> Result<()> {
        let name = wallet_lock_name(wallet_id);
        let lease = acquire(self.locks.as_ref(), &name, ALLOCATION_TTL, self.retry).await?;
        let result = self.wallet(wallet_id).and_then(|wallet| {
            if !wallet.encrypted {
                return Err(WalletError::WalletNotLocked);
            }
            self.cache.delete(wallet_id);
            Ok(())
        });
        self.locks.release(&lease).await?;
        result
    }

    pub async fn unlock(&self, wallet_id: &Uuid, password: &str) -> Result<()> {
        let name = wallet_lock_name(wallet_id);
        let lease = acquire(self.locks.as_ref(), &name, ALLOCATION_TTL, self.retry).await?;
        let result = self.unlock_locked(wallet_id, password);
        self.locks.release(&lease).await?;
        result
    }

    fn unlock_locked(&self, wallet_id: &Uuid, password: &str) -> Result<()> {
        let wallet = self.wallet(wallet_id)?;
        if !wallet.encrypted {
            return Err(WalletError::WalletNotLocked);
        }
        let cipher = SecretCipher::from_password(password);
        let seed = cipher.decrypt(&wallet.seed).map_err(|e| match e {
            WalletError::DecryptionFailed => WalletError::BadPassword,
            other => other,
        })?;

        let mut keys = Vec::new();
        for account in self.adhoc_accounts(wallet_id)? {
            let sealed = account.private_key.as_deref().unwrap_or_default();
            match cipher.decrypt(sealed) {
                Ok(key) => keys.push((account.address, key)),
                Err(_) => {
                    warn!("Ad-hoc key for {} did not decrypt", account.address);
                    return Err(WalletError::BadPassword);
                }
            }
        }

        self.cache.set(wallet_id, SEED_FIELD, seed);
        for (address, key) in keys {
            self.cache.set(wallet_id, &address, key);
        }
        self.cache.set(wallet_id, CIPHER_KEY_FIELD, cipher.key_hex());
        Ok(())
    }

    /// `seed` or an ad-hoc address, in plaintext.
    pub fn read_secret(&self, wallet: &Wallet, field: &str) -> Result<String> {
        if wallet.encrypted {
            return self.cache.get(&wallet.id, field).ok_or(WalletError::WalletLocked);
        }
        if field == SEED_FIELD {
            return Ok(wallet.seed.clone());
        }
        self.store
            .get_account(&wallet.id, field)?
            .and_then(|account| account.private_key)
            .ok_or(WalletError::AccountNotFound)
    }

    pub fn seed(&self, wallet: &Wallet) -> Result<[u8; 32]> {
        parse_seed(&self.read_secret(wallet, SEED_FIELD)?)
    }

    pub fn is_locked(&self, wallet: &Wallet) -> bool {
        wallet.encrypted && self.cache.get(&wallet.id, SEED_FIELD).is_none()
    }

    /// Value to persist for a freshly imported ad-hoc key.
    pub fn seal_adhoc_key(&self, wallet: &Wallet, address: &str, key: &str) -> Result<String> {
        if !wallet.encrypted {
            return Ok(key.to_string());
        }
        let cipher_key = self
            .cache
            .get(&wallet.id, CIPHER_KEY_FIELD)
            .ok_or(WalletError::WalletLocked)?;
        let sealed = SecretCipher::from_key_hex(&cipher_key)?.encrypt(key)?;
        self.cache.set(&wallet.id, address, key.to_string());
        Ok(sealed)
    }

    /// Value to persist for a replacement seed. Encrypted wallets must be unlocked.
    pub fn seal_seed(&self, wallet: &Wallet, seed: &str) -> Result<String> {
        if !wallet.encrypted {
            return Ok(seed.to_string());
        }
        let cipher_key = self
            .cache
            .get(&wallet.id, CIPHER_KEY_FIELD)
            .ok_or(WalletError::WalletLocked)?;
        SecretCipher::from_key_hex(&cipher_key)?.encrypt(seed)
    }

    /// Points an unlocked encrypted wallet at a seed that was just persisted.
    pub fn remember_seed(&self, wallet: &Wallet, seed: &str) {
        if wallet.encrypted {
            self.cache.set(&wallet.id, SEED_FIELD, seed.to_string());
        }
    }

    pub fn signing_key(&self, wallet: &Wallet, account: &Account) -> Result<KeyPair> {
        match account.index {
            Some(index) => Ok(KeyPair::from_seed(&self.seed(wallet)?, index)),
            None => KeyPair::from_hex(&self.read_secret(wallet, &account.address)?),
        }
    }

    /// Drops cached plaintext for a wallet that no longer exists.
    pub fn forget(&self, wallet_id: &Uuid) {
        self.cache.delete(wallet_id);
    }

    fn adhoc_accounts(&self, wallet_id: &Uuid) -> Result<Vec<Account>> {
        Ok(self
            .store
            .list_accounts(wallet_id, 0)?
            .into_iter()
            .filter(Account::is_adhoc)
            .collect())
    }
}
