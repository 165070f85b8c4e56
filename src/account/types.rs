//! Account and idempotency record types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::block::{StateBlock, Subtype};

/// An account owned by a wallet.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub wallet_id: Uuid,
    pub address: String,

    /// Derivation index for sequential accounts, `None` for ad-hoc (imported) keys.
    pub index: Option<u32>,

    /// Ad-hoc only: plaintext or ciphertext matching the wallet's encryption state.
    pub private_key: Option<String>,

    pub created_at: i64,
}

impl Account {
    pub fn sequential(wallet_id: Uuid, index: u32, address: String) -> Self {
        Account {
            wallet_id,
            address,
            index: Some(index),
            private_key: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn adhoc(wallet_id: Uuid, address: String, private_key: String) -> Self {
        Account {
            wallet_id,
            address,
            index: None,
            private_key: Some(private_key),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_adhoc(&self) -> bool {
        self.index.is_none()
    }
}

/// A published block remembered under a caller supplied id, so retried
/// requests republish instead of creating a second block.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BlockRecord {
    pub account: String,
    pub send_id: String,
    pub hash: String,
    pub subtype: Subtype,
    pub block: StateBlock,
    pub created_at: i64,
}
