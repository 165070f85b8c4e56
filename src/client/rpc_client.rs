// Node RPC client
use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::block::{StateBlock, Subtype};
use crate::error::{Result, WalletError};

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountInfo {
    pub frontier: String,
    pub balance: String,
    #[serde(default)]
    pub representative: String,
    #[serde(default)]
    pub pending: String,
    #[serde(default)]
    pub receivable: String,
    #[serde(default)]
    pub confirmed_frontier: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockInfo {
    #[serde(default)]
    pub block_account: String,
    pub amount: String,
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub confirmed: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountBalance {
    pub balance: String,
    #[serde(default)]
    pub pending: String,
    #[serde(default)]
    pub receivable: String,
}

impl AccountBalance {
    /// Receivable amount in raw; older nodes only report `pending`.
    pub fn receivable_raw(&self) -> u128 {
        let value = if self.receivable.is_empty() {
            &self.pending
        } else {
            &self.receivable
        };
        value.parse().unwrap_or(0)
    }
}

/// The slice of the node RPC the wallet engine consumes.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    async fn account_info(&self, account: &str) -> Result<AccountInfo>;
    async fn block_info(&self, hash: &str) -> Result<BlockInfo>;
    /// Publishes a signed block, returning the node's canonical hash.
    async fn process(&self, block: &StateBlock, subtype: Subtype) -> Result<String>;
    async fn accounts_balances(&self, accounts: &[String]) -> Result<BTreeMap<String, AccountBalance>>;
    async fn accounts_frontiers(&self, accounts: &[String]) -> Result<BTreeMap<String, String>>;
    async fn account_balance(&self, account: &str) -> Result<AccountBalance>;
    /// Confirmed receivable blocks at or above `threshold`, hash to amount.
    async fn receivable(&self, account: &str, threshold: &str) -> Result<BTreeMap<String, String>>;
    /// Passes a raw request through and returns the node's reply untouched,
    /// including `{"error": ..}` bodies.
    async fn forward(&self, request: &Value) -> Result<Value>;
}

pub struct NodeRpcClient {
    url: String,
    client: Client,
}

impl NodeRpcClient {
    pub fn new(url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { url, client }
    }

    async fn post(&self, request: &Value) -> Result<Value> {
        let action = request["action"].as_str().unwrap_or_default();
        debug!("Node RPC {}", action);

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!("Node RPC {} failed: {}", action, e);
                WalletError::Upstream(format!("RPC request failed: {}", e))
            })?;

        response
            .json()
            .await
            .map_err(|e| WalletError::Upstream(format!("Failed to parse response: {}", e)))
    }

    async fn call(&self, request: Value) -> Result<Value> {
        let json = self.post(&request).await?;
        if let Some(err) = json.get("error") {
            let message = err.as_str().unwrap_or("Unknown error").to_string();
            if message.to_lowercase().contains("account not found") {
                let account = request["account"].as_str().unwrap_or_default();
                return Err(WalletError::UnopenedAccount(account.to_string()));
            }
            return Err(WalletError::Upstream(message));
        }
        Ok(json)
    }

    fn decode<T: for<'a> Deserialize<'a>>(value: Value) -> Result<T> {
        serde_json::from_value(value).map_err(|e| WalletError::Upstream(format!("Unexpected response: {}", e)))
    }
}

#[async_trait]
impl NodeRpc for NodeRpcClient {
    async fn account_info(&self, account: &str) -> Result<AccountInfo> {
        let json = self
            .call(json!({
                "action": "account_info",
                "account": account,
                "representative": true,
                "weight": true,
                "pending": true,
                "include_confirmed": true,
            }))
            .await?;
        Self::decode(json)
    }

    async fn block_info(&self, hash: &str) -> Result<BlockInfo> {
        let json = self
            .call(json!({
                "action": "block_info",
                "hash": hash,
                "json_block": true,
            }))
            .await?;
        Self::decode(json)
    }

    async fn process(&self, block: &StateBlock, subtype: Subtype) -> Result<String> {
        let json = self
            .call(json!({
                "action": "process",
                "json_block": true,
                "subtype": subtype.as_str(),
                "block": block,
            }))
            .await?;
        json["hash"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| WalletError::Upstream("No hash or error returned".to_string()))
    }

    async fn accounts_balances(&self, accounts: &[String]) -> Result<BTreeMap<String, AccountBalance>> {
        let json = self
            .call(json!({
                "action": "accounts_balances",
                "accounts": accounts,
            }))
            .await?;
        match json.get("balances") {
            Some(balances) => Self::decode(balances.clone()),
            None => Err(WalletError::Upstream("No balances returned".to_string())),
        }
    }

    async fn accounts_frontiers(&self, accounts: &[String]) -> Result<BTreeMap<String, String>> {
        let json = self
            .call(json!({
                "action": "accounts_frontiers",
                "accounts": accounts,
            }))
            .await?;
        match json.get("frontiers") {
            // unopened accounts come back as "" or are omitted
            Some(Value::String(_)) => Ok(BTreeMap::new()),
            Some(frontiers) => Self::decode(frontiers.clone()),
            None => Err(WalletError::Upstream("No frontiers returned".to_string())),
        }
    }

    async fn account_balance(&self, account: &str) -> Result<AccountBalance> {
        let json = self
            .call(json!({
                "action": "account_balance",
                "account": account,
            }))
            .await?;
        Self::decode(json)
    }

    async fn receivable(&self, account: &str, threshold: &str) -> Result<BTreeMap<String, String>> {
        let json = self
            .call(json!({
                "action": "receivable",
                "account": account,
                "threshold": threshold,
                "include_only_confirmed": true,
            }))
            .await?;
        match json.get("blocks") {
            Some(Value::Object(blocks)) => Ok(blocks
                .iter()
                .map(|(hash, amount)| {
                    let amount = match amount {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (hash.clone(), amount)
                })
                .collect()),
            // the node answers "" when nothing is receivable
            Some(Value::String(_)) | None => Ok(BTreeMap::new()),
            Some(other) => Err(WalletError::Upstream(format!("Unexpected blocks: {}", other))),
        }
    }

    async fn forward(&self, request: &Value) -> Result<Value> {
        self.post(request).await
    }
}
