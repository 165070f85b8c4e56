//! Lease-based named locks.
//!
//! Wallet-scoped operations (allocation, encryption transitions, block
//! construction) serialize on `wallet:{id}`. A lease expires after its TTL so a
//! crashed holder cannot wedge a wallet forever.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::config::LockConfig;
use crate::error::{Result, WalletError};

pub const ALLOCATION_TTL: Duration = Duration::from_secs(10);
/// Covers one block build. Work generation can outlast it, so the block engine
/// renews the lease before every publish and aborts if it was lost.
pub const BLOCK_TTL: Duration = Duration::from_secs(30);
pub const RECEIVE_ALL_TTL: Duration = Duration::from_secs(300);

pub fn wallet_lock_name(wallet_id: &Uuid) -> String {
    format!("wallet:{}", wallet_id)
}

/// Proof of holding a named lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub name: String,
    pub token: u64,
    pub ttl: Duration,
}

#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Single non-blocking attempt. `Ok(None)` when someone else holds a live lease.
    async fn obtain(&self, name: &str, ttl: Duration) -> Result<Option<Lease>>;

    /// Pushes the expiry `lease.ttl` past now. `Ok(false)` when another holder
    /// took the lock over after this lease expired.
    async fn renew(&self, lease: &Lease) -> Result<bool>;

    /// Releasing a lease that already expired (or was taken over) is a no-op.
    async fn release(&self, lease: &Lease) -> Result<()>;
}

/// In-process provider. Engines sharing one instance serialize on it.
#[derive(Default)]
pub struct MemoryLockProvider {
    leases: Mutex<HashMap<String, (u64, Instant)>>,
    next_token: AtomicU64,
}

impl MemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockProvider for MemoryLockProvider {
    async fn obtain(&self, name: &str, ttl: Duration) -> Result<Option<Lease>> {
        let now = Instant::now();
        let mut leases = self.leases.lock();
        if let Some((_, expires)) = leases.get(name) {
            if *expires > now {
                return Ok(None);
            }
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        leases.insert(name.to_string(), (token, now + ttl));
        Ok(Some(Lease {
            name: name.to_string(),
            token,
            ttl,
        }))
    }

    async fn renew(&self, lease: &Lease) -> Result<bool> {
        let mut leases = self.leases.lock();
        match leases.get_mut(&lease.name) {
            Some((token, expires)) if *token == lease.token => {
                *expires = Instant::now() + lease.ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let mut leases = self.leases.lock();
        if matches!(leases.get(&lease.name), Some((token, _)) if *token == lease.token) {
            leases.remove(&lease.name);
        }
        Ok(())
    }
}

/// Fixed-interval retry policy for lock acquisition.
#[derive(Debug, Clone, Copy)]
pub struct RetryStrategy {
    pub interval: Duration,
    pub max_retries: u32,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::from(&LockConfig::default())
    }
}

impl From<&LockConfig> for RetryStrategy {
    fn from(config: &LockConfig) -> Self {
        RetryStrategy {
            interval: Duration::from_millis(config.retry_interval_ms),
            max_retries: config.max_retries,
        }
    }
}

/// Tries once plus `max_retries` more times, sleeping `interval` in between.
pub async fn acquire(
    provider: &dyn LockProvider,
    name: &str,
    ttl: Duration,
    strategy: RetryStrategy,
) -> Result<Lease> {
    for attempt in 0..=strategy.max_retries {
        if let Some(lease) = provider.obtain(name, ttl).await? {
            return Ok(lease);
        }
        if attempt < strategy.max_retries {
            debug!("Lock {} busy, retry {}/{}", name, attempt + 1, strategy.max_retries);
            tokio::time::sleep(strategy.interval).await;
        }
    }
    Err(WalletError::LockNotObtained(name.to_string()))
}
