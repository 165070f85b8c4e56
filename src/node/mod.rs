// Wires stores, caches, locks, upstream clients and engines from config
use std::sync::Arc;

use tracing::info;

use crate::account::AccountLedger;
use crate::block_engine::BlockEngine;
use crate::cache::{MemoryCache, SecretCache};
use crate::client::{NodeRpc, NodeRpcClient};
use crate::config::VaultConfig;
use crate::error::Result;
use crate::lock::{LockProvider, MemoryLockProvider, RetryStrategy};
use crate::rpc::{RpcServer, RpcState};
use crate::storage::{MemoryStore, SledStore, Store};
use crate::vault::SecretStore;
use crate::wallet::WalletManager;
use crate::work::{WorkEngine, WorkProvider};

pub struct VaultNode {
    pub config: VaultConfig,
    pub vault: Arc<SecretStore>,
    pub wallets: Arc<WalletManager>,
    pub ledger: Arc<AccountLedger>,
    pub blocks: Arc<BlockEngine>,
    pub node: Arc<dyn NodeRpc>,
    pub work: Arc<dyn WorkProvider>,
}

impl VaultNode {
    /// Opens the sled store at `server.db_path`, or an in-memory one.
    pub fn open(config: VaultConfig, in_memory: bool) -> Result<Self> {
        let store: Arc<dyn Store> = if in_memory {
            info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        } else {
            info!("Opening store at {}", config.server.db_path);
            Arc::new(SledStore::open(&config.server.db_path)?)
        };
        let node: Arc<dyn NodeRpc> = Arc::new(NodeRpcClient::new(config.node_rpc_url()));
        let work: Arc<dyn WorkProvider> = Arc::new(WorkEngine::new(&config.work));
        Ok(Self::with_parts(config, store, node, work))
    }

    /// Assembles a node around caller supplied store and upstreams.
    pub fn with_parts(
        config: VaultConfig,
        store: Arc<dyn Store>,
        node: Arc<dyn NodeRpc>,
        work: Arc<dyn WorkProvider>,
    ) -> Self {
        let cache: Arc<dyn SecretCache> = Arc::new(MemoryCache::new());
        let locks: Arc<dyn LockProvider> = Arc::new(MemoryLockProvider::new());
        let vault = Arc::new(SecretStore::new(
            store,
            cache,
            locks,
            RetryStrategy::from(&config.lock),
        ));
        let network = config.network();
        let wallets = Arc::new(WalletManager::new(vault.clone(), network));
        let ledger = Arc::new(AccountLedger::new(vault.clone(), network));
        let blocks = Arc::new(BlockEngine::new(
            vault.clone(),
            ledger.clone(),
            wallets.clone(),
            node.clone(),
            work.clone(),
            config.clone(),
        ));
        VaultNode {
            config,
            vault,
            wallets,
            ledger,
            blocks,
            node,
            work,
        }
    }

    pub fn rpc_state(&self) -> RpcState {
        RpcState {
            vault: self.vault.clone(),
            wallets: self.wallets.clone(),
            ledger: self.ledger.clone(),
            blocks: self.blocks.clone(),
            node: self.node.clone(),
            work: self.work.clone(),
            network: self.config.network(),
        }
    }

    pub async fn serve(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        info!(
            "Starting nanovault on {} ({:?}, node {})",
            addr,
            self.config.network(),
            self.config.node_rpc_url()
        );
        RpcServer::new(self.rpc_state(), addr).start().await
    }
}
