//! Builds, signs, works and publishes state blocks for wallet accounts.
//!
//! Sends carrying a caller supplied id are idempotent: the published block is
//! remembered under `(account, id)` and a repeated request republishes it
//! instead of building a new one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::account::{Account, AccountLedger, AccountSummary, BlockRecord};
use crate::block::{StateBlock, Subtype};
use crate::client::{AccountBalance, AccountInfo, NodeRpc};
use crate::config::VaultConfig;
use crate::encoding::{decode_address, is_valid_address, parse_block_hash, Network};
use crate::error::{Result, WalletError};
use crate::lock::{acquire, wallet_lock_name, Lease, BLOCK_TTL, RECEIVE_ALL_TTL};
use crate::vault::SecretStore;
use crate::wallet::{Wallet, WalletManager};
use crate::work::{WorkProvider, WorkRequest};

/// Per-request work options.
#[derive(Debug, Clone, Default)]
pub struct BlockOptions {
    /// Precomputed work; skips generation (and is not validated).
    pub work: Option<String>,
    /// Delegated work key overriding the configured one.
    pub delegated_key: Option<String>,
}

impl BlockOptions {
    pub fn with_delegated_key(delegated_key: Option<String>) -> Self {
        BlockOptions {
            work: None,
            delegated_key,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    pub received: usize,
    /// `(account, error)` for every account whose receive failed.
    pub failures: Vec<(String, String)>,
}

/// Wallet totals in raw plus the ledger's account counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletInfo {
    pub balance: u128,
    pub receivable: u128,
    pub accounts: AccountSummary,
}

fn parse_raw(value: &str) -> Result<u128> {
    value
        .parse::<u128>()
        .map_err(|_| WalletError::Upstream(format!("Unable to parse balance {}", value)))
}

pub struct BlockEngine {
    vault: Arc<SecretStore>,
    ledger: Arc<AccountLedger>,
    wallets: Arc<WalletManager>,
    node: Arc<dyn NodeRpc>,
    work: Arc<dyn WorkProvider>,
    config: VaultConfig,
}

impl BlockEngine {
    pub fn new(
        vault: Arc<SecretStore>,
        ledger: Arc<AccountLedger>,
        wallets: Arc<WalletManager>,
        node: Arc<dyn NodeRpc>,
        work: Arc<dyn WorkProvider>,
        config: VaultConfig,
    ) -> Self {
        BlockEngine {
            vault,
            ledger,
            wallets,
            node,
            work,
            config,
        }
    }

    fn network(&self) -> Network {
        self.config.network()
    }

    async fn lock_wallet(&self, wallet_id: &Uuid, ttl: Duration) -> Result<Lease> {
        acquire(
            self.vault.locks().as_ref(),
            &wallet_lock_name(wallet_id),
            ttl,
            self.vault.retry(),
        )
        .await
    }

    async fn unlock_wallet(&self, lease: Lease) {
        if let Err(e) = self.vault.locks().release(&lease).await {
            warn!("Failed to release {}: {}", lease.name, e);
        }
    }

    pub async fn send(
        &self,
        wallet_id: &Uuid,
        source: &str,
        destination: &str,
        amount: &str,
        id: Option<&str>,
        options: &BlockOptions,
    ) -> Result<String> {
        let amount_raw = amount
            .parse::<u128>()
            .map_err(|_| WalletError::InvalidAmount(amount.to_string()))?;
        let link = decode_address(destination, self.network())?;
        let wallet = self.vault.wallet(wallet_id)?;
        let account = self.ledger.get(wallet_id, source)?;

        let lease = self.lock_wallet(wallet_id, BLOCK_TTL).await?;
        let result = self
            .send_locked(&lease, &wallet, &account, amount_raw, &link, id, options)
            .await;
        self.unlock_wallet(lease).await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_locked(
        &self,
        lease: &Lease,
        wallet: &Wallet,
        account: &Account,
        amount: u128,
        link: &[u8; 32],
        id: Option<&str>,
        options: &BlockOptions,
    ) -> Result<String> {
        let store = self.vault.store();
        if let Some(id) = id {
            if let Some(record) = store.get_block(&account.address, id)? {
                debug!("Send {} for {} already published, republishing", id, account.address);
                if let Err(e) = self.node.process(&record.block, Subtype::Send).await {
                    debug!("Republish of {} rejected: {}", record.hash, e);
                }
                return Ok(record.block.hash.to_uppercase());
            }
        }

        let block = self.build_send(lease, wallet, account, amount, link, options).await?;
        let hash = self.publish(lease, &block, Subtype::Send).await?;

        if let Some(id) = id {
            store.insert_block(&BlockRecord {
                account: account.address.clone(),
                send_id: id.to_string(),
                hash: hash.clone(),
                subtype: Subtype::Send,
                block,
                created_at: chrono::Utc::now().timestamp(),
            })?;
        }
        info!("Sent {} raw from {} in {}", amount, account.address, hash);
        Ok(hash)
    }

    async fn build_send(
        &self,
        lease: &Lease,
        wallet: &Wallet,
        account: &Account,
        amount: u128,
        link: &[u8; 32],
        options: &BlockOptions,
    ) -> Result<StateBlock> {
        let key = self.vault.signing_key(wallet, account)?;
        let auto_receive = self.config.wallet.auto_receive_on_send;

        let mut info = match self.node.account_info(&account.address).await {
            Ok(info) => info,
            Err(WalletError::UnopenedAccount(_)) => {
                if !auto_receive {
                    return Err(WalletError::InsufficientBalance);
                }
                let pending = self.node.account_balance(&account.address).await?;
                if pending.receivable_raw() < amount {
                    return Err(WalletError::InsufficientBalance);
                }
                match self.receive_pending(lease, wallet, account, options).await {
                    (0, Some(e)) => return Err(e),
                    (0, None) => return Err(WalletError::InsufficientBalance),
                    (_, Some(e)) => debug!("Auto-receive for {} stopped early: {}", account.address, e),
                    (_, None) => {}
                }
                self.node.account_info(&account.address).await?
            }
            Err(e) => return Err(e),
        };

        let mut balance = parse_raw(&info.balance)?;
        if amount > balance {
            if !auto_receive {
                return Err(WalletError::InsufficientBalance);
            }
            let (received, failure) = self.receive_pending(lease, wallet, account, options).await;
            if let Some(e) = failure {
                debug!("Auto-receive for {} failed after {} blocks: {}", account.address, received, e);
            }
            if received == 0 {
                return Err(WalletError::InsufficientBalance);
            }
            info = self.node.account_info(&account.address).await?;
            balance = parse_raw(&info.balance)?;
        }
        let new_balance = balance
            .checked_sub(amount)
            .ok_or(WalletError::InsufficientBalance)?;

        let representative = self.default_representative(wallet)?;
        let previous = parse_block_hash(&info.frontier)?;
        let mut block = StateBlock::new(
            &account.address,
            &previous,
            &representative,
            new_balance,
            link,
            self.network(),
        );
        block.sign(&key, self.network())?;
        block.work = self
            .obtain_work(&info.frontier, self.network().send_multiplier(), options)
            .await?;
        Ok(block)
    }

    pub async fn receive(
        &self,
        wallet_id: &Uuid,
        account: &str,
        source_hash: &str,
        options: &BlockOptions,
    ) -> Result<String> {
        parse_block_hash(source_hash)?;
        let wallet = self.vault.wallet(wallet_id)?;
        let account = self.ledger.get(wallet_id, account)?;

        let lease = self.lock_wallet(wallet_id, BLOCK_TTL).await?;
        let result = async {
            let block = self.build_receive(&wallet, &account, source_hash, options).await?;
            self.publish(&lease, &block, Subtype::Receive).await
        }
        .await;
        self.unlock_wallet(lease).await;
        result
    }

    async fn build_receive(
        &self,
        wallet: &Wallet,
        account: &Account,
        source_hash: &str,
        options: &BlockOptions,
    ) -> Result<StateBlock> {
        let link = parse_block_hash(source_hash)?;
        let key = self.vault.signing_key(wallet, account)?;
        let source = self.node.block_info(source_hash).await.map_err(|e| match e {
            WalletError::Upstream(msg) if msg.to_lowercase().contains("not found") => WalletError::BlockNotFound,
            other => other,
        })?;
        let amount = parse_raw(&source.amount)?;

        let (previous, workbase, representative, balance) =
            match self.node.account_info(&account.address).await {
                Ok(info) => {
                    let balance = parse_raw(&info.balance)?
                        .checked_add(amount)
                        .ok_or_else(|| WalletError::InvalidAmount(source.amount.clone()))?;
                    let previous = parse_block_hash(&info.frontier)?;
                    (previous, info.frontier, info.representative, balance)
                }
                Err(WalletError::UnopenedAccount(_)) => {
                    let public = decode_address(&account.address, self.network())?;
                    let representative = self.default_representative(wallet)?;
                    ([0u8; 32], hex::encode_upper(public), representative, amount)
                }
                Err(e) => return Err(e),
            };

        let mut block = StateBlock::new(
            &account.address,
            &previous,
            &representative,
            balance,
            &link,
            self.network(),
        );
        block.sign(&key, self.network())?;
        block.work = self.obtain_work(&workbase, 1, options).await?;
        Ok(block)
    }

    pub async fn change(
        &self,
        wallet_id: &Uuid,
        account: &str,
        representative: &str,
        only_if_different: bool,
        options: &BlockOptions,
    ) -> Result<String> {
        if !is_valid_address(representative, self.network()) {
            return Err(WalletError::InvalidAddress(representative.to_string()));
        }
        let wallet = self.vault.wallet(wallet_id)?;
        let account = self.ledger.get(wallet_id, account)?;

        let lease = self.lock_wallet(wallet_id, BLOCK_TTL).await?;
        let result = async {
            let block = self
                .build_change(&wallet, &account, representative, only_if_different, options)
                .await?;
            self.publish(&lease, &block, Subtype::Change).await
        }
        .await;
        self.unlock_wallet(lease).await;
        result
    }

    async fn build_change(
        &self,
        wallet: &Wallet,
        account: &Account,
        representative: &str,
        only_if_different: bool,
        options: &BlockOptions,
    ) -> Result<StateBlock> {
        let key = self.vault.signing_key(wallet, account)?;
        let info: AccountInfo = self.node.account_info(&account.address).await?;
        if only_if_different && info.representative == representative {
            return Err(WalletError::SameRepresentative);
        }
        let previous = parse_block_hash(&info.frontier)?;
        let mut block = StateBlock::new(
            &account.address,
            &previous,
            representative,
            parse_raw(&info.balance)?,
            &[0u8; 32],
            self.network(),
        );
        block.sign(&key, self.network())?;
        block.work = self
            .obtain_work(&info.frontier, self.network().send_multiplier(), options)
            .await?;
        Ok(block)
    }

    /// Receives every pending block of one account. The first failure aborts.
    pub async fn receive_all_account(
        &self,
        wallet_id: &Uuid,
        account: &str,
        delegated_key: Option<String>,
    ) -> Result<usize> {
        let wallet = self.vault.wallet(wallet_id)?;
        let account = self.ledger.get(wallet_id, account)?;
        let options = BlockOptions::with_delegated_key(delegated_key);

        let lease = self.lock_wallet(wallet_id, RECEIVE_ALL_TTL).await?;
        let (received, failure) = self.receive_pending(&lease, &wallet, &account, &options).await;
        self.unlock_wallet(lease).await;
        match failure {
            Some(e) => Err(e),
            None => Ok(received),
        }
    }

    /// Publishes receives for the account's pending blocks in hash order. Returns
    /// the number published before the first failure, along with that failure.
    async fn receive_pending(
        &self,
        lease: &Lease,
        wallet: &Wallet,
        account: &Account,
        options: &BlockOptions,
    ) -> (usize, Option<WalletError>) {
        let minimum = self.config.receive_minimum();
        let blocks = match self.node.receivable(&account.address, &minimum).await {
            Ok(blocks) => blocks,
            Err(e) => return (0, Some(e)),
        };
        let mut received = 0;
        let mut failure = None;
        for hash in blocks.keys() {
            let published = match self.build_receive(wallet, account, hash, options).await {
                Ok(block) => self.publish(lease, &block, Subtype::Receive).await,
                Err(e) => Err(e),
            };
            if let Err(e) = published {
                failure = Some(e);
                break;
            }
            received += 1;
        }
        if received > 0 {
            info!("Received {} blocks for {}", received, account.address);
        }
        (received, failure)
    }

    /// Receives for every wallet account with enough receivable balance.
    /// Failures are collected per account and do not stop the scan.
    pub async fn receive_all(&self, wallet_id: &Uuid, delegated_key: Option<String>) -> Result<ReceiveReport> {
        let wallet = self.vault.wallet(wallet_id)?;
        let accounts = self.ledger.list(wallet_id, 0)?;
        if accounts.is_empty() {
            return Ok(ReceiveReport::default());
        }
        let minimum = parse_raw(&self.config.receive_minimum())?;
        let addresses: Vec<String> = accounts.iter().map(|a| a.address.clone()).collect();
        let balances = self.node.accounts_balances(&addresses).await?;
        let options = BlockOptions::with_delegated_key(delegated_key);

        let lease = self.lock_wallet(wallet_id, RECEIVE_ALL_TTL).await?;
        let mut report = ReceiveReport::default();
        for account in &accounts {
            let receivable = balances
                .get(&account.address)
                .map(AccountBalance::receivable_raw)
                .unwrap_or(0);
            if receivable == 0 || receivable < minimum {
                continue;
            }
            let (received, failure) = self.receive_pending(&lease, &wallet, account, &options).await;
            report.received += received;
            if let Some(e) = failure {
                warn!("Receive for {} failed after {} blocks: {}", account.address, received, e);
                report.failures.push((account.address.clone(), e.to_string()));
            }
        }
        self.unlock_wallet(lease).await;
        Ok(report)
    }

    /// Sets the wallet default and, when asked, moves every opened account to it.
    pub async fn set_wallet_representative(
        &self,
        wallet_id: &Uuid,
        representative: &str,
        update_existing: bool,
    ) -> Result<()> {
        self.wallets.set_representative(wallet_id, representative).await?;
        if !update_existing {
            return Ok(());
        }
        for account in self.ledger.list(wallet_id, 0)? {
            if let Err(e) = self
                .change(wallet_id, &account.address, representative, true, &BlockOptions::default())
                .await
            {
                debug!("Representative change for {} skipped: {}", account.address, e);
            }
        }
        Ok(())
    }

    pub async fn wallet_balances(&self, wallet_id: &Uuid) -> Result<BTreeMap<String, AccountBalance>> {
        let addresses = self.addresses(wallet_id)?;
        if addresses.is_empty() {
            return Ok(BTreeMap::new());
        }
        self.node.accounts_balances(&addresses).await
    }

    pub async fn wallet_frontiers(&self, wallet_id: &Uuid) -> Result<BTreeMap<String, String>> {
        let addresses = self.addresses(wallet_id)?;
        if addresses.is_empty() {
            return Ok(BTreeMap::new());
        }
        self.node.accounts_frontiers(&addresses).await
    }

    pub async fn wallet_info(&self, wallet_id: &Uuid) -> Result<WalletInfo> {
        let accounts = self.ledger.summary(wallet_id)?;
        let overflow = || WalletError::Upstream("Wallet balance overflows".to_string());
        let mut info = WalletInfo {
            accounts,
            ..WalletInfo::default()
        };
        for entry in self.wallet_balances(wallet_id).await?.values() {
            let receivable = if entry.receivable.is_empty() {
                &entry.pending
            } else {
                &entry.receivable
            };
            info.balance = info.balance.checked_add(parse_raw(&entry.balance)?).ok_or_else(overflow)?;
            info.receivable = info
                .receivable
                .checked_add(parse_raw(receivable)?)
                .ok_or_else(overflow)?;
        }
        Ok(info)
    }

    /// Receivable block hashes per account at or above `threshold`. Accounts
    /// with nothing receivable are left out.
    pub async fn wallet_receivable(
        &self,
        wallet_id: &Uuid,
        threshold: &str,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let mut out = BTreeMap::new();
        for address in self.addresses(wallet_id)? {
            let blocks = self.node.receivable(&address, threshold).await?;
            if !blocks.is_empty() {
                out.insert(address, blocks.into_keys().collect());
            }
        }
        Ok(out)
    }

    fn addresses(&self, wallet_id: &Uuid) -> Result<Vec<String>> {
        Ok(self
            .ledger
            .list(wallet_id, 0)?
            .into_iter()
            .map(|a| a.address)
            .collect())
    }

    fn default_representative(&self, wallet: &Wallet) -> Result<String> {
        match &wallet.representative {
            Some(rep) => Ok(rep.clone()),
            None => self.config.random_representative(),
        }
    }

    async fn obtain_work(&self, workbase: &str, multiplier: u64, options: &BlockOptions) -> Result<String> {
        if let Some(work) = &options.work {
            return Ok(work.clone());
        }
        let request = WorkRequest::new(workbase, multiplier).with_delegated_key(options.delegated_key.clone());
        self.work.work_generate(&request).await
    }

    /// Renews the wallet lease for its full TTL, then hands the block to the node.
    async fn publish(&self, lease: &Lease, block: &StateBlock, subtype: Subtype) -> Result<String> {
        if !self.vault.locks().renew(lease).await? {
            warn!("Lease {} lost before publishing {}", lease.name, block.hash);
            return Err(WalletError::LockNotObtained(lease.name.clone()));
        }
        let hash = self.node.process(block, subtype).await?;
        if parse_block_hash(&hash).is_err() {
            return Err(WalletError::Upstream(format!("Node returned invalid hash {}", hash)));
        }
        debug!("Published {} block {}", subtype.as_str(), hash);
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::crypto::{parse_seed, KeyPair};
    use crate::encoding::encode_address;
    use crate::lock::{LockProvider, MemoryLockProvider, RetryStrategy};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    const SEED: &str = "1A2E95A2DCF03143297572EAEC496F6913D5001D2F28A728B35CB274294D5A14";
    const FRONTIER: &str = "3F93C5CD2E314FA16702189041E68E68C07B27961BF37F0B7705145BEFBA3AA3";
    const SOURCE_BLOCK: &str = "E2FB233EF4554077A7BF1AA85851D5BF0B36965D2B0FB504B2BC778AB89917D3";
    const WORK: &str = "205452237a9b01f4";

    fn rep(index: u32) -> String {
        KeyPair::from_seed(&[7u8; 32], index).address(Network::Nano)
    }

    fn node_rep() -> String {
        rep(0)
    }

    fn wallet_rep() -> String {
        rep(1)
    }

    #[derive(Default)]
    struct NodeState {
        accounts: HashMap<String, AccountInfo>,
        sources: HashMap<String, String>,
        receivable: HashMap<String, BTreeMap<String, String>>,
        processed: Vec<(StateBlock, Subtype)>,
        seen: Vec<String>,
    }

    #[derive(Default)]
    struct MockNode {
        state: Mutex<NodeState>,
    }

    impl MockNode {
        fn open(&self, account: &str, balance: u128) {
            self.state.lock().accounts.insert(
                account.to_string(),
                AccountInfo {
                    frontier: FRONTIER.to_string(),
                    balance: balance.to_string(),
                    representative: node_rep(),
                    ..AccountInfo::default()
                },
            );
        }

        fn pend(&self, account: &str, hash: &str, amount: u128) {
            let mut state = self.state.lock();
            state.sources.insert(hash.to_string(), amount.to_string());
            state
                .receivable
                .entry(account.to_string())
                .or_default()
                .insert(hash.to_string(), amount.to_string());
        }

        fn processed(&self) -> Vec<(StateBlock, Subtype)> {
            self.state.lock().processed.clone()
        }
    }

    #[async_trait]
    impl NodeRpc for MockNode {
        async fn account_info(&self, account: &str) -> Result<AccountInfo> {
            self.state
                .lock()
                .accounts
                .get(account)
                .cloned()
                .ok_or_else(|| WalletError::UnopenedAccount(account.to_string()))
        }

        async fn block_info(&self, hash: &str) -> Result<crate::client::BlockInfo> {
            let state = self.state.lock();
            let amount = state
                .sources
                .get(hash)
                .cloned()
                .ok_or_else(|| WalletError::Upstream("Block not found".to_string()))?;
            Ok(crate::client::BlockInfo {
                amount,
                ..Default::default()
            })
        }

        async fn process(&self, block: &StateBlock, subtype: Subtype) -> Result<String> {
            let mut state = self.state.lock();
            state.processed.push((block.clone(), subtype));
            let hash = block.hash.to_uppercase();
            if state.seen.contains(&hash) {
                return Err(WalletError::Upstream("Old block".to_string()));
            }
            state.seen.push(hash.clone());
            if subtype == Subtype::Receive {
                if let Some(pending) = state.receivable.get_mut(&block.account) {
                    pending.remove(&block.link);
                }
            }
            state.accounts.insert(
                block.account.clone(),
                AccountInfo {
                    frontier: hash.clone(),
                    balance: block.balance.clone(),
                    representative: block.representative.clone(),
                    ..AccountInfo::default()
                },
            );
            Ok(hash)
        }

        async fn accounts_balances(&self, accounts: &[String]) -> Result<BTreeMap<String, AccountBalance>> {
            let mut out = BTreeMap::new();
            for account in accounts {
                let balance = self.account_balance(account).await?;
                out.insert(account.clone(), balance);
            }
            Ok(out)
        }

        async fn accounts_frontiers(&self, accounts: &[String]) -> Result<BTreeMap<String, String>> {
            let state = self.state.lock();
            Ok(accounts
                .iter()
                .filter_map(|a| state.accounts.get(a).map(|i| (a.clone(), i.frontier.clone())))
                .collect())
        }

        async fn account_balance(&self, account: &str) -> Result<AccountBalance> {
            let state = self.state.lock();
            let balance = state
                .accounts
                .get(account)
                .map(|i| i.balance.clone())
                .unwrap_or_else(|| "0".to_string());
            let receivable: u128 = state
                .receivable
                .get(account)
                .map(|m| m.values().filter_map(|v| v.parse::<u128>().ok()).sum())
                .unwrap_or(0);
            Ok(AccountBalance {
                balance,
                pending: receivable.to_string(),
                receivable: receivable.to_string(),
            })
        }

        async fn receivable(&self, account: &str, threshold: &str) -> Result<BTreeMap<String, String>> {
            let threshold: u128 = threshold.parse().unwrap_or(0);
            let state = self.state.lock();
            Ok(state
                .receivable
                .get(account)
                .map(|m| {
                    m.iter()
                        .filter(|(_, v)| v.parse::<u128>().unwrap_or(0) >= threshold)
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn forward(&self, _request: &serde_json::Value) -> Result<serde_json::Value> {
            Err(WalletError::Upstream("not forwarded".to_string()))
        }
    }

    #[derive(Default)]
    struct StubWork {
        requests: Mutex<Vec<WorkRequest>>,
    }

    #[async_trait]
    impl WorkProvider for StubWork {
        async fn work_generate(&self, request: &WorkRequest) -> Result<String> {
            self.requests.lock().push(request.clone());
            Ok(WORK.to_string())
        }
    }

    struct Harness {
        engine: Arc<BlockEngine>,
        node: Arc<MockNode>,
        work: Arc<StubWork>,
        vault: Arc<SecretStore>,
        ledger: Arc<AccountLedger>,
        wallet: Uuid,
        first: String,
        second: String,
    }

    fn harness_with(config: VaultConfig) -> Harness {
        harness_with_locks(config, Arc::new(MemoryLockProvider::new()))
    }

    fn harness_with_locks(mut config: VaultConfig, locks: Arc<dyn LockProvider>) -> Harness {
        config.wallet.preconfigured_representatives_nano = vec![rep(2), rep(3)];
        let vault = Arc::new(SecretStore::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryCache::new()),
            locks,
            RetryStrategy {
                interval: Duration::from_millis(5),
                max_retries: 400,
            },
        ));
        let wallets = Arc::new(WalletManager::new(vault.clone(), Network::Nano));
        let ledger = Arc::new(AccountLedger::new(vault.clone(), Network::Nano));
        let wallet = wallets.create(Some(SEED)).unwrap().id;
        let node = Arc::new(MockNode::default());
        let work = Arc::new(StubWork::default());
        let engine = Arc::new(BlockEngine::new(
            vault.clone(),
            ledger.clone(),
            wallets,
            node.clone(),
            work.clone(),
            config,
        ));
        let seed = parse_seed(SEED).unwrap();
        Harness {
            engine,
            node,
            work,
            vault,
            ledger,
            wallet,
            first: KeyPair::from_seed(&seed, 0).address(Network::Nano),
            second: KeyPair::from_seed(&seed, 1).address(Network::Nano),
        }
    }

    fn harness() -> Harness {
        let mut config = VaultConfig::default();
        config.wallet.receive_minimum = "1".to_string();
        harness_with(config)
    }

    #[tokio::test]
    async fn test_send_builds_signed_block() {
        let h = harness();
        h.node.open(&h.first, 1_000);

        let hash = h
            .engine
            .send(&h.wallet, &h.first, &h.second, "400", None, &BlockOptions::default())
            .await
            .unwrap();

        let processed = h.node.processed();
        assert_eq!(processed.len(), 1);
        let (block, subtype) = &processed[0];
        assert_eq!(*subtype, Subtype::Send);
        assert_eq!(block.hash.to_uppercase(), hash);
        assert_eq!(block.balance, "600");
        assert_eq!(block.previous, FRONTIER);
        assert_eq!(block.link_as_account, h.second);
        assert_eq!(block.work, WORK);
        assert!(block.verify(Network::Nano).unwrap());
        assert!([rep(2), rep(3)].contains(&block.representative));

        let requests = h.work.requests.lock();
        assert_eq!(requests[0].hash, FRONTIER);
        assert_eq!(requests[0].multiplier, 64);
    }

    #[tokio::test]
    async fn test_send_validation() {
        let h = harness();
        h.node.open(&h.first, 1_000);
        let opts = BlockOptions::default();
        assert!(matches!(
            h.engine.send(&h.wallet, &h.first, &h.second, "-1", None, &opts).await,
            Err(WalletError::InvalidAmount(_))
        ));
        assert!(matches!(
            h.engine.send(&h.wallet, &h.first, "nano_bad", "1", None, &opts).await,
            Err(WalletError::InvalidAddress(_))
        ));
        assert!(matches!(
            h.engine.send(&h.wallet, &h.second, &h.first, "1", None, &opts).await,
            Err(WalletError::AccountNotFound)
        ));
    }

    #[tokio::test]
    async fn test_send_with_id_is_idempotent() {
        let h = harness();
        h.node.open(&h.first, 1_000);
        let opts = BlockOptions::default();

        let first = h
            .engine
            .send(&h.wallet, &h.first, &h.second, "100", Some("pay-1"), &opts)
            .await
            .unwrap();
        let again = h
            .engine
            .send(&h.wallet, &h.first, &h.second, "100", Some("pay-1"), &opts)
            .await
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(h.vault.store().list_blocks(&h.first).unwrap().len(), 1);
        // second call republished the cached block instead of building a new one
        assert_eq!(h.work.requests.lock().len(), 1);
        let processed = h.node.processed();
        assert_eq!(processed.len(), 2);
        assert_eq!(processed[0].0, processed[1].0);
        assert_eq!(h.node.account_balance(&h.first).await.unwrap().balance, "900");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_with_same_id() {
        let h = harness();
        h.node.open(&h.first, 1_000);
        let mut handles = Vec::new();
        for _ in 0..6 {
            let engine = h.engine.clone();
            let (wallet, from, to) = (h.wallet, h.first.clone(), h.second.clone());
            handles.push(tokio::spawn(async move {
                engine
                    .send(&wallet, &from, &to, "100", Some("same"), &BlockOptions::default())
                    .await
            }));
        }
        let mut hashes = Vec::new();
        for handle in handles {
            hashes.push(handle.await.unwrap().unwrap());
        }
        hashes.dedup();
        assert_eq!(hashes.len(), 1);
        assert_eq!(h.vault.store().list_blocks(&h.first).unwrap().len(), 1);
        assert_eq!(h.node.account_balance(&h.first).await.unwrap().balance, "900");
    }

    #[tokio::test]
    async fn test_insufficient_balance_without_auto_receive() {
        let mut config = VaultConfig::default();
        config.wallet.auto_receive_on_send = false;
        let h = harness_with(config);
        h.node.open(&h.first, 10);
        h.node.pend(&h.first, SOURCE_BLOCK, 1_000);
        assert!(matches!(
            h.engine
                .send(&h.wallet, &h.first, &h.second, "100", None, &BlockOptions::default())
                .await,
            Err(WalletError::InsufficientBalance)
        ));
        assert!(h.node.processed().is_empty());
    }

    #[tokio::test]
    async fn test_short_balance_receives_first() {
        let h = harness();
        h.node.open(&h.first, 10);
        h.node.pend(&h.first, SOURCE_BLOCK, 1_000);

        h.engine
            .send(&h.wallet, &h.first, &h.second, "500", None, &BlockOptions::default())
            .await
            .unwrap();
        let processed = h.node.processed();
        let subtypes: Vec<Subtype> = processed.iter().map(|(_, s)| *s).collect();
        assert_eq!(subtypes, vec![Subtype::Receive, Subtype::Send]);
        assert_eq!(processed[0].0.balance, "1010");
        assert_eq!(processed[1].0.balance, "510");
        assert_eq!(processed[1].0.previous, processed[0].0.hash.to_uppercase());
    }

    #[tokio::test]
    async fn test_unopened_sender_opens_then_sends() {
        let h = harness();
        h.node.pend(&h.first, SOURCE_BLOCK, 1_000);
        h.engine
            .send(&h.wallet, &h.first, &h.second, "250", None, &BlockOptions::default())
            .await
            .unwrap();
        let processed = h.node.processed();
        assert_eq!(processed.len(), 2);
        assert_eq!(processed[0].0.previous, crate::block::ZERO_HASH);
        assert_eq!(processed[1].0.balance, "750");

        // too little receivable to cover the send
        let h = harness();
        h.node.pend(&h.first, SOURCE_BLOCK, 10);
        assert!(matches!(
            h.engine
                .send(&h.wallet, &h.first, &h.second, "250", None, &BlockOptions::default())
                .await,
            Err(WalletError::InsufficientBalance)
        ));
    }

    #[tokio::test]
    async fn test_receive_open_block() {
        let h = harness();
        h.vault
            .store()
            .update_wallet(&Wallet {
                representative: Some(wallet_rep()),
                ..h.vault.wallet(&h.wallet).unwrap()
            })
            .unwrap();
        h.node.pend(&h.first, SOURCE_BLOCK, 777);

        h.engine
            .receive(&h.wallet, &h.first, SOURCE_BLOCK, &BlockOptions::default())
            .await
            .unwrap();
        let (block, subtype) = h.node.processed().remove(0);
        assert_eq!(subtype, Subtype::Receive);
        assert_eq!(block.previous, crate::block::ZERO_HASH);
        assert_eq!(block.balance, "777");
        assert_eq!(block.link, SOURCE_BLOCK);
        assert_eq!(block.representative, wallet_rep());
        assert!(block.verify(Network::Nano).unwrap());

        let requests = h.work.requests.lock();
        let public = decode_address(&h.first, Network::Nano).unwrap();
        assert_eq!(requests[0].hash, hex::encode_upper(public));
        assert_eq!(requests[0].multiplier, 1);
    }

    #[tokio::test]
    async fn test_receive_keeps_representative_and_uses_precomputed_work() {
        let h = harness();
        h.node.open(&h.first, 5);
        h.node.pend(&h.first, SOURCE_BLOCK, 5);
        let opts = BlockOptions {
            work: Some("0000000000000001".to_string()),
            delegated_key: None,
        };
        h.engine.receive(&h.wallet, &h.first, SOURCE_BLOCK, &opts).await.unwrap();
        let (block, _) = h.node.processed().remove(0);
        assert_eq!(block.representative, node_rep());
        assert_eq!(block.balance, "10");
        assert_eq!(block.previous, FRONTIER);
        assert_eq!(block.work, "0000000000000001");
        assert!(h.work.requests.lock().is_empty());

        assert!(matches!(
            h.engine
                .receive(&h.wallet, &h.first, &"AB".repeat(32), &BlockOptions::default())
                .await,
            Err(WalletError::BlockNotFound)
        ));
    }

    #[tokio::test]
    async fn test_change_representative() {
        let h = harness();
        h.node.open(&h.first, 42);
        let opts = BlockOptions::default();
        assert!(matches!(
            h.engine.change(&h.wallet, &h.first, &node_rep(), true, &opts).await,
            Err(WalletError::SameRepresentative)
        ));

        h.engine.change(&h.wallet, &h.first, &wallet_rep(), true, &opts).await.unwrap();
        let (block, subtype) = h.node.processed().remove(0);
        assert_eq!(subtype, Subtype::Change);
        assert_eq!(block.balance, "42");
        assert_eq!(block.link, crate::block::ZERO_HASH);
        assert_eq!(block.representative, wallet_rep());
    }

    #[tokio::test]
    async fn test_locked_wallet_cannot_sign() {
        let h = harness();
        h.node.open(&h.first, 1_000);
        h.ledger.create_next(&h.wallet).await.unwrap();
        h.vault.set_password(&h.wallet, "pw").await.unwrap();
        assert!(matches!(
            h.engine
                .send(&h.wallet, &h.first, &h.second, "1", None, &BlockOptions::default())
                .await,
            Err(WalletError::WalletLocked)
        ));
        h.vault.unlock(&h.wallet, "pw").await.unwrap();
        assert!(h
            .engine
            .send(&h.wallet, &h.first, &h.second, "1", None, &BlockOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_receive_all_collects_failures() {
        let h = harness();
        h.ledger.create_next(&h.wallet).await.unwrap();
        h.node.pend(&h.first, SOURCE_BLOCK, 100);
        h.node.pend(&h.first, &"CD".repeat(32), 50);
        // receivable without a resolvable source block
        h.node
            .state
            .lock()
            .receivable
            .entry(h.second.clone())
            .or_default()
            .insert("EF".repeat(32), "10".to_string());

        let report = h.engine.receive_all(&h.wallet, None).await.unwrap();
        assert_eq!(report.received, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, h.second);
        assert_eq!(h.node.account_balance(&h.first).await.unwrap().balance, "150");

        assert!(h.engine.receive_all_account(&h.wallet, &h.second, None).await.is_err());
        assert_eq!(h.engine.receive_all_account(&h.wallet, &h.first, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_receive_all_counts_blocks_before_failure() {
        let h = harness();
        h.node.pend(&h.first, &"AA".repeat(32), 100);
        // sorts after the resolvable block and has no source
        h.node
            .state
            .lock()
            .receivable
            .entry(h.first.clone())
            .or_default()
            .insert("FF".repeat(32), "10".to_string());

        let report = h.engine.receive_all(&h.wallet, None).await.unwrap();
        assert_eq!(report.received, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, h.first);
        assert_eq!(h.node.account_info(&h.first).await.unwrap().balance, "100");
        assert_eq!(h.node.processed().len(), 1);
    }

    /// Grants and releases normally but reports every lease as taken over.
    #[derive(Default)]
    struct LapsedLocks {
        inner: MemoryLockProvider,
        renewals: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LockProvider for LapsedLocks {
        async fn obtain(&self, name: &str, ttl: Duration) -> Result<Option<Lease>> {
            self.inner.obtain(name, ttl).await
        }

        async fn renew(&self, lease: &Lease) -> Result<bool> {
            self.renewals.lock().push(lease.name.clone());
            Ok(false)
        }

        async fn release(&self, lease: &Lease) -> Result<()> {
            self.inner.release(lease).await
        }
    }

    #[tokio::test]
    async fn test_lost_lease_blocks_publish() {
        let locks = Arc::new(LapsedLocks::default());
        let mut config = VaultConfig::default();
        config.wallet.receive_minimum = "1".to_string();
        let h = harness_with_locks(config, locks.clone());
        h.node.open(&h.first, 1_000);

        let err = h
            .engine
            .send(&h.wallet, &h.first, &h.second, "1", Some("tx"), &BlockOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::LockNotObtained(ref n) if *n == wallet_lock_name(&h.wallet)));
        assert_eq!(h.work.requests.lock().len(), 1);
        assert!(h.node.processed().is_empty());
        assert_eq!(*locks.renewals.lock(), vec![wallet_lock_name(&h.wallet)]);
        assert!(h.vault.store().get_block(&h.first, "tx").unwrap().is_none());

        // the lease was still released
        assert!(locks
            .obtain(&wallet_lock_name(&h.wallet), BLOCK_TTL)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_receive_all_honours_minimum() {
        let mut config = VaultConfig::default();
        config.wallet.receive_minimum = "100".to_string();
        let h = harness_with(config);
        h.node.pend(&h.first, SOURCE_BLOCK, 99);
        let report = h.engine.receive_all(&h.wallet, None).await.unwrap();
        assert_eq!(report, ReceiveReport::default());
    }

    #[tokio::test]
    async fn test_wallet_representative_update_existing() {
        let h = harness();
        h.ledger.create_next(&h.wallet).await.unwrap();
        h.node.open(&h.first, 5);

        h.engine
            .set_wallet_representative(&h.wallet, &wallet_rep(), true)
            .await
            .unwrap();
        assert_eq!(
            h.vault.wallet(&h.wallet).unwrap().representative.as_deref(),
            Some(wallet_rep().as_str())
        );
        // only the opened account gets a change block
        let processed = h.node.processed();
        assert_eq!(processed.len(), 1);
        assert_eq!(processed[0].0.account, h.first);
        assert_eq!(processed[0].1, Subtype::Change);
    }

    #[tokio::test]
    async fn test_balances_and_frontiers() {
        let h = harness();
        h.node.open(&h.first, 5);
        h.node.pend(&h.first, SOURCE_BLOCK, 7);
        let balances = h.engine.wallet_balances(&h.wallet).await.unwrap();
        assert_eq!(balances[&h.first].balance, "5");
        assert_eq!(balances[&h.first].receivable, "7");

        let info = h.engine.wallet_info(&h.wallet).await.unwrap();
        assert_eq!((info.balance, info.receivable), (5, 7));
        assert_eq!(info.accounts.accounts, 1);

        let receivable = h.engine.wallet_receivable(&h.wallet, "0").await.unwrap();
        assert_eq!(receivable.len(), 1);
        assert_eq!(receivable[&h.first], vec![SOURCE_BLOCK.to_string()]);
        assert!(h.engine.wallet_receivable(&h.wallet, "8").await.unwrap().is_empty());

        let frontiers = h.engine.wallet_frontiers(&h.wallet).await.unwrap();
        assert_eq!(frontiers[&h.first], FRONTIER);
        assert_eq!(encode_address(&decode_address(&h.first, Network::Nano).unwrap(), Network::Nano), h.first);
    }
}
