use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sled::transaction::{abort, ConflictableTransactionResult, TransactionError, TransactionalTree};
use uuid::Uuid;

use crate::account::{Account, BlockRecord};
use crate::error::{Result, WalletError};
use crate::wallet::Wallet;

/// Durable wallet, account and block storage.
///
/// Multi-row writes are atomic: either every row lands or none does. Account
/// inserts enforce unique `(wallet, address)` and `(wallet, index)`, block inserts
/// enforce unique `(account, send_id)`.
pub trait Store: Send + Sync {
    /// Creates the wallet together with its initial accounts.
    fn insert_wallet(&self, wallet: &Wallet, accounts: &[Account]) -> Result<()>;
    fn get_wallet(&self, id: &Uuid) -> Result<Option<Wallet>>;
    fn update_wallet(&self, wallet: &Wallet) -> Result<()>;
    /// Rewrites the wallet row and the given ad-hoc account rows in one transaction.
    fn update_wallet_secrets(&self, wallet: &Wallet, accounts: &[Account]) -> Result<()>;
    fn delete_wallet(&self, id: &Uuid) -> Result<()>;

    fn get_account(&self, wallet_id: &Uuid, address: &str) -> Result<Option<Account>>;
    /// Highest sequential index, `None` when the wallet has no sequential accounts.
    fn max_index(&self, wallet_id: &Uuid) -> Result<Option<u32>>;
    fn insert_accounts(&self, accounts: &[Account]) -> Result<()>;
    /// Rewrites the wallet row and swaps every sequential account for `accounts`
    /// in one transaction. Ad-hoc accounts are kept.
    fn replace_sequential_accounts(&self, wallet: &Wallet, accounts: &[Account]) -> Result<()>;
    /// Sequential accounts by index, then ad-hoc accounts. `limit == 0` is unlimited.
    fn list_accounts(&self, wallet_id: &Uuid, limit: usize) -> Result<Vec<Account>>;

    fn get_block(&self, account: &str, send_id: &str) -> Result<Option<BlockRecord>>;
    fn insert_block(&self, record: &BlockRecord) -> Result<()>;
    fn list_blocks(&self, account: &str) -> Result<Vec<BlockRecord>>;
}

fn wallet_key(id: &Uuid) -> String {
    format!("wallet:{}", id)
}

fn account_key(wallet_id: &Uuid, address: &str) -> String {
    format!("account:{}:{}", wallet_id, address)
}

// zero padded so lexical order is numeric order
fn index_key(wallet_id: &Uuid, index: u32) -> String {
    format!("index:{}:{:010}", wallet_id, index)
}

fn block_key(account: &str, send_id: &str) -> String {
    format!("block:{}:{}", account, send_id)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: for<'a> Deserialize<'a>>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

struct AccountRow {
    address: String,
    key: String,
    value: Vec<u8>,
    index_key: Option<String>,
}

fn account_rows(accounts: &[Account]) -> Result<Vec<AccountRow>> {
    accounts
        .iter()
        .map(|a| {
            Ok(AccountRow {
                address: a.address.clone(),
                key: account_key(&a.wallet_id, &a.address),
                value: encode(a)?,
                index_key: a.index.map(|i| index_key(&a.wallet_id, i)),
            })
        })
        .collect()
}

fn insert_account_rows(
    tx: &TransactionalTree,
    rows: &[AccountRow],
) -> ConflictableTransactionResult<(), WalletError> {
    for row in rows {
        if tx.get(row.key.as_bytes())?.is_some() {
            return abort(WalletError::AccountExists(row.address.clone()));
        }
        if let Some(index_key) = &row.index_key {
            if tx.get(index_key.as_bytes())?.is_some() {
                return abort(WalletError::AccountExists(row.address.clone()));
            }
            tx.insert(index_key.as_bytes(), row.address.as_bytes())?;
        }
        tx.insert(row.key.as_bytes(), row.value.as_slice())?;
    }
    Ok(())
}

fn flatten_tx_error(err: TransactionError<WalletError>) -> WalletError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => e.into(),
    }
}

/// sled-backed store: a single tree with prefixed string keys and bincode values.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(SledStore { db })
    }
}

impl Store for SledStore {
    fn insert_wallet(&self, wallet: &Wallet, accounts: &[Account]) -> Result<()> {
        let key = wallet_key(&wallet.id);
        let value = encode(wallet)?;
        let rows = account_rows(accounts)?;
        self.db
            .transaction(|tx| {
                if tx.get(key.as_bytes())?.is_some() {
                    return abort(WalletError::DatabaseError(format!("wallet {} exists", wallet.id)));
                }
                tx.insert(key.as_bytes(), value.as_slice())?;
                insert_account_rows(tx, &rows)
            })
            .map_err(flatten_tx_error)
    }

    fn get_wallet(&self, id: &Uuid) -> Result<Option<Wallet>> {
        match self.db.get(wallet_key(id).as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn update_wallet(&self, wallet: &Wallet) -> Result<()> {
        self.update_wallet_secrets(wallet, &[])
    }

    fn update_wallet_secrets(&self, wallet: &Wallet, accounts: &[Account]) -> Result<()> {
        let mut batch = sled::Batch::default();
        batch.insert(wallet_key(&wallet.id).as_bytes(), encode(wallet)?);
        for account in accounts {
            batch.insert(account_key(&account.wallet_id, &account.address).as_bytes(), encode(account)?);
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    fn delete_wallet(&self, id: &Uuid) -> Result<()> {
        let mut batch = sled::Batch::default();
        batch.remove(wallet_key(id).as_bytes());
        for account in self.list_accounts(id, 0)? {
            batch.remove(account_key(id, &account.address).as_bytes());
            if let Some(index) = account.index {
                batch.remove(index_key(id, index).as_bytes());
            }
            for key in self.db.scan_prefix(block_key(&account.address, "").as_bytes()).keys() {
                batch.remove(key?);
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    fn get_account(&self, wallet_id: &Uuid, address: &str) -> Result<Option<Account>> {
        match self.db.get(account_key(wallet_id, address).as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn max_index(&self, wallet_id: &Uuid) -> Result<Option<u32>> {
        let prefix = format!("index:{}:", wallet_id);
        match self.db.scan_prefix(prefix.as_bytes()).keys().next_back() {
            Some(key) => {
                let key = key?;
                let index = std::str::from_utf8(&key[prefix.len()..])
                    .ok()
                    .and_then(|s| s.parse::<u32>().ok())
                    .ok_or_else(|| WalletError::DatabaseError("corrupt index key".to_string()))?;
                Ok(Some(index))
            }
            None => Ok(None),
        }
    }

    fn insert_accounts(&self, accounts: &[Account]) -> Result<()> {
        let rows = account_rows(accounts)?;
        self.db
            .transaction(|tx| insert_account_rows(tx, &rows))
            .map_err(flatten_tx_error)
    }

    fn replace_sequential_accounts(&self, wallet: &Wallet, accounts: &[Account]) -> Result<()> {
        let key = wallet_key(&wallet.id);
        let value = encode(wallet)?;
        let stale: Vec<(String, String)> = self
            .list_accounts(&wallet.id, 0)?
            .into_iter()
            .filter_map(|a| {
                a.index
                    .map(|i| (account_key(&wallet.id, &a.address), index_key(&wallet.id, i)))
            })
            .collect();
        let rows = account_rows(accounts)?;
        self.db
            .transaction(|tx| {
                for (account, index) in &stale {
                    tx.remove(account.as_bytes())?;
                    tx.remove(index.as_bytes())?;
                }
                tx.insert(key.as_bytes(), value.as_slice())?;
                insert_account_rows(tx, &rows)
            })
            .map_err(flatten_tx_error)
    }

    fn list_accounts(&self, wallet_id: &Uuid, limit: usize) -> Result<Vec<Account>> {
        let limit = if limit == 0 { usize::MAX } else { limit };
        let mut accounts = Vec::new();

        for entry in self.db.scan_prefix(format!("index:{}:", wallet_id).as_bytes()).values() {
            if accounts.len() >= limit {
                return Ok(accounts);
            }
            let address = String::from_utf8(entry?.to_vec())
                .map_err(|_| WalletError::DatabaseError("corrupt index row".to_string()))?;
            if let Some(account) = self.get_account(wallet_id, &address)? {
                accounts.push(account);
            }
        }
        for entry in self.db.scan_prefix(format!("account:{}:", wallet_id).as_bytes()).values() {
            if accounts.len() >= limit {
                break;
            }
            let account: Account = decode(&entry?)?;
            if account.is_adhoc() {
                accounts.push(account);
            }
        }
        Ok(accounts)
    }

    fn get_block(&self, account: &str, send_id: &str) -> Result<Option<BlockRecord>> {
        match self.db.get(block_key(account, send_id).as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn insert_block(&self, record: &BlockRecord) -> Result<()> {
        let key = block_key(&record.account, &record.send_id);
        let value = encode(record)?;
        self.db
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))?
            .map_err(|_| WalletError::DuplicateSendId(record.send_id.clone()))
    }

    fn list_blocks(&self, account: &str) -> Result<Vec<BlockRecord>> {
        self.db
            .scan_prefix(block_key(account, "").as_bytes())
            .values()
            .map(|v| decode(&v?))
            .collect()
    }
}

#[derive(Default)]
struct MemoryTables {
    wallets: HashMap<Uuid, Wallet>,
    accounts: BTreeMap<(Uuid, String), Account>,
    indices: BTreeMap<(Uuid, u32), String>,
    blocks: BTreeMap<(String, String), BlockRecord>,
}

impl MemoryTables {
    fn check_accounts(&self, accounts: &[Account]) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for a in accounts {
            let taken_index = a
                .index
                .map(|i| self.indices.contains_key(&(a.wallet_id, i)))
                .unwrap_or(false);
            if taken_index
                || self.accounts.contains_key(&(a.wallet_id, a.address.clone()))
                || !seen.insert((a.wallet_id, a.address.clone()))
            {
                return Err(WalletError::AccountExists(a.address.clone()));
            }
        }
        Ok(())
    }

    fn put_accounts(&mut self, accounts: &[Account]) {
        for a in accounts {
            if let Some(i) = a.index {
                self.indices.insert((a.wallet_id, i), a.address.clone());
            }
            self.accounts.insert((a.wallet_id, a.address.clone()), a.clone());
        }
    }
}

/// In-process store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn insert_wallet(&self, wallet: &Wallet, accounts: &[Account]) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.wallets.contains_key(&wallet.id) {
            return Err(WalletError::DatabaseError(format!("wallet {} exists", wallet.id)));
        }
        tables.check_accounts(accounts)?;
        tables.wallets.insert(wallet.id, wallet.clone());
        tables.put_accounts(accounts);
        Ok(())
    }

    fn get_wallet(&self, id: &Uuid) -> Result<Option<Wallet>> {
        Ok(self.tables.read().wallets.get(id).cloned())
    }

    fn update_wallet(&self, wallet: &Wallet) -> Result<()> {
        self.update_wallet_secrets(wallet, &[])
    }

    fn update_wallet_secrets(&self, wallet: &Wallet, accounts: &[Account]) -> Result<()> {
        let mut tables = self.tables.write();
        tables.wallets.insert(wallet.id, wallet.clone());
        for a in accounts {
            tables.accounts.insert((a.wallet_id, a.address.clone()), a.clone());
        }
        Ok(())
    }

    fn delete_wallet(&self, id: &Uuid) -> Result<()> {
        let mut tables = self.tables.write();
        tables.wallets.remove(id);
        let addresses: Vec<String> = tables
            .accounts
            .keys()
            .filter(|(w, _)| w == id)
            .map(|(_, a)| a.clone())
            .collect();
        tables.accounts.retain(|(w, _), _| w != id);
        tables.indices.retain(|(w, _), _| w != id);
        tables.blocks.retain(|(account, _), _| !addresses.contains(account));
        Ok(())
    }

    fn get_account(&self, wallet_id: &Uuid, address: &str) -> Result<Option<Account>> {
        Ok(self
            .tables
            .read()
            .accounts
            .get(&(*wallet_id, address.to_string()))
            .cloned())
    }

    fn max_index(&self, wallet_id: &Uuid) -> Result<Option<u32>> {
        Ok(self
            .tables
            .read()
            .indices
            .range((*wallet_id, 0)..=(*wallet_id, u32::MAX))
            .next_back()
            .map(|((_, i), _)| *i))
    }

    fn insert_accounts(&self, accounts: &[Account]) -> Result<()> {
        let mut tables = self.tables.write();
        tables.check_accounts(accounts)?;
        tables.put_accounts(accounts);
        Ok(())
    }

    fn replace_sequential_accounts(&self, wallet: &Wallet, accounts: &[Account]) -> Result<()> {
        let mut tables = self.tables.write();
        let stale: Vec<(u32, String)> = tables
            .indices
            .range((wallet.id, 0)..=(wallet.id, u32::MAX))
            .map(|((_, i), address)| (*i, address.clone()))
            .collect();
        let mut removed = Vec::with_capacity(stale.len());
        for (index, address) in &stale {
            tables.indices.remove(&(wallet.id, *index));
            if let Some(account) = tables.accounts.remove(&(wallet.id, address.clone())) {
                removed.push(account);
            }
        }
        if let Err(e) = tables.check_accounts(accounts) {
            tables.put_accounts(&removed);
            return Err(e);
        }
        tables.wallets.insert(wallet.id, wallet.clone());
        tables.put_accounts(accounts);
        Ok(())
    }

    fn list_accounts(&self, wallet_id: &Uuid, limit: usize) -> Result<Vec<Account>> {
        let limit = if limit == 0 { usize::MAX } else { limit };
        let tables = self.tables.read();
        let sequential = tables
            .indices
            .range((*wallet_id, 0)..=(*wallet_id, u32::MAX))
            .filter_map(|((w, _), address)| tables.accounts.get(&(*w, address.clone())));
        let adhoc = tables
            .accounts
            .iter()
            .filter(|((w, _), a)| w == wallet_id && a.is_adhoc())
            .map(|(_, a)| a);
        Ok(sequential.chain(adhoc).take(limit).cloned().collect())
    }

    fn get_block(&self, account: &str, send_id: &str) -> Result<Option<BlockRecord>> {
        Ok(self
            .tables
            .read()
            .blocks
            .get(&(account.to_string(), send_id.to_string()))
            .cloned())
    }

    fn insert_block(&self, record: &BlockRecord) -> Result<()> {
        let mut tables = self.tables.write();
        let key = (record.account.clone(), record.send_id.clone());
        if tables.blocks.contains_key(&key) {
            return Err(WalletError::DuplicateSendId(record.send_id.clone()));
        }
        tables.blocks.insert(key, record.clone());
        Ok(())
    }

    fn list_blocks(&self, account: &str) -> Result<Vec<BlockRecord>> {
        Ok(self
            .tables
            .read()
            .blocks
            .iter()
            .filter(|((a, _), _)| a == account)
            .map(|(_, r)| r.clone())
            .collect())
    }
}
