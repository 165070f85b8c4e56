pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::{routing::post, Router};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::account::AccountLedger;
use crate::block_engine::BlockEngine;
use crate::client::NodeRpc;
use crate::encoding::Network;
use crate::error::{Result, WalletError};
use crate::vault::SecretStore;
use crate::wallet::WalletManager;
use crate::work::WorkProvider;

#[derive(Clone)]
pub struct RpcState {
    pub vault: Arc<SecretStore>,
    pub wallets: Arc<WalletManager>,
    pub ledger: Arc<AccountLedger>,
    pub blocks: Arc<BlockEngine>,
    pub node: Arc<dyn NodeRpc>,
    pub work: Arc<dyn WorkProvider>,
    pub network: Network,
}

pub fn router(state: RpcState) -> Router {
    Router::new()
        .route("/", post(handlers::handle_rpc_request))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub struct RpcServer {
    state: RpcState,
    bind_addr: String,
}

impl RpcServer {
    pub fn new(state: RpcState, bind_addr: String) -> Self {
        Self { state, bind_addr }
    }

    pub async fn start(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| WalletError::Internal(format!("Failed to bind {}: {}", self.bind_addr, e)))?;

        info!("Gateway listening on {}", self.bind_addr);
        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| WalletError::Internal(format!("Gateway failed: {}", e)))
    }
}
