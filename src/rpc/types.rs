// Gateway request types, one variant per action
use serde::{Deserialize, Deserializer};

/// Node-style RPC sends numbers either as JSON numbers or decimal strings.
fn flexible_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Number(u32),
        Text(String),
    }

    match Option::<Flexible>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Flexible::Number(n)) => Ok(Some(n)),
        Some(Flexible::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Booleans arrive as `true` or as `"true"`.
fn flexible_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Bool(bool),
        Text(String),
    }

    match Option::<Flexible>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Flexible::Bool(b)) => Ok(Some(b)),
        Some(Flexible::Text(s)) => match s.as_str() {
            "true" | "1" => Ok(Some(true)),
            "false" | "0" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!("invalid boolean {}", other))),
        },
    }
}

/// Actions answered by the gateway itself. Anything else goes to the node.
pub const WALLET_ACTIONS: &[&str] = &[
    "wallet_create",
    "wallet_destroy",
    "account_create",
    "accounts_create",
    "account_list",
    "wallet_contains",
    "wallet_add",
    "password_change",
    "password_enter",
    "password_valid",
    "wallet_lock",
    "wallet_locked",
    "wallet_info",
    "wallet_pending",
    "wallet_receivable",
    "wallet_change_seed",
    "wallet_representative",
    "wallet_representative_set",
    "wallet_balances",
    "wallet_frontiers",
    "send",
    "receive",
    "receive_all",
    "account_representative_set",
    "work_generate",
];

/// Node wallet actions the gateway does not implement. They are refused
/// rather than relayed, so they never reach the node's own wallets.
pub const UNSUPPORTED_WALLET_ACTIONS: &[&str] = &[
    "account_move",
    "account_remove",
    "receive_minimum",
    "receive_minimum_set",
    "search_pending",
    "search_pending_all",
    "search_receivable",
    "search_receivable_all",
    "wallet_add_watch",
    "wallet_export",
    "wallet_history",
    "wallet_ledger",
    "wallet_republish",
    "wallet_work_get",
    "work_get",
    "work_set",
];

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WalletRequest {
    WalletCreate {
        #[serde(default)]
        seed: Option<String>,
    },
    WalletDestroy {
        wallet: String,
    },
    AccountCreate {
        wallet: String,
        #[serde(default, deserialize_with = "flexible_u32")]
        index: Option<u32>,
    },
    AccountsCreate {
        wallet: String,
        #[serde(default, deserialize_with = "flexible_u32")]
        count: Option<u32>,
    },
    AccountList {
        wallet: String,
        #[serde(default, deserialize_with = "flexible_u32")]
        count: Option<u32>,
    },
    WalletContains {
        wallet: String,
        account: String,
    },
    WalletAdd {
        wallet: String,
        key: String,
    },
    PasswordChange {
        wallet: String,
        password: String,
    },
    PasswordEnter {
        wallet: String,
        password: String,
    },
    PasswordValid {
        wallet: String,
    },
    WalletLock {
        wallet: String,
    },
    WalletLocked {
        wallet: String,
    },
    WalletInfo {
        wallet: String,
    },
    #[serde(alias = "wallet_pending")]
    WalletReceivable {
        wallet: String,
        #[serde(default)]
        threshold: Option<String>,
    },
    WalletChangeSeed {
        wallet: String,
        seed: String,
    },
    WalletRepresentative {
        wallet: String,
    },
    WalletRepresentativeSet {
        wallet: String,
        representative: String,
        #[serde(default, deserialize_with = "flexible_bool")]
        update_existing_accounts: Option<bool>,
    },
    WalletBalances {
        wallet: String,
    },
    WalletFrontiers {
        wallet: String,
    },
    Send {
        wallet: String,
        source: String,
        destination: String,
        amount: String,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        work: Option<String>,
        #[serde(default)]
        bpow_key: Option<String>,
    },
    Receive {
        wallet: String,
        account: String,
        block: String,
        #[serde(default)]
        work: Option<String>,
        #[serde(default)]
        bpow_key: Option<String>,
    },
    ReceiveAll {
        wallet: String,
        #[serde(default)]
        account: Option<String>,
        #[serde(default)]
        bpow_key: Option<String>,
    },
    AccountRepresentativeSet {
        wallet: String,
        account: String,
        representative: String,
        #[serde(default)]
        work: Option<String>,
        #[serde(default)]
        bpow_key: Option<String>,
        #[serde(default, deserialize_with = "flexible_bool")]
        only_if_different: Option<bool>,
    },
    WorkGenerate {
        hash: String,
        #[serde(default, deserialize_with = "flexible_u32")]
        difficulty_multiplier: Option<u32>,
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        bpow_key: Option<String>,
        #[serde(default, deserialize_with = "flexible_bool")]
        block_award: Option<bool>,
    },
}

impl WalletRequest {
    pub fn handles(action: &str) -> bool {
        WALLET_ACTIONS.contains(&action)
    }

    pub fn action(&self) -> &'static str {
        match self {
            WalletRequest::WalletCreate { .. } => "wallet_create",
            WalletRequest::WalletDestroy { .. } => "wallet_destroy",
            WalletRequest::AccountCreate { .. } => "account_create",
            WalletRequest::AccountsCreate { .. } => "accounts_create",
            WalletRequest::AccountList { .. } => "account_list",
            WalletRequest::WalletContains { .. } => "wallet_contains",
            WalletRequest::WalletAdd { .. } => "wallet_add",
            WalletRequest::PasswordChange { .. } => "password_change",
            WalletRequest::PasswordEnter { .. } => "password_enter",
            WalletRequest::PasswordValid { .. } => "password_valid",
            WalletRequest::WalletLock { .. } => "wallet_lock",
            WalletRequest::WalletLocked { .. } => "wallet_locked",
            WalletRequest::WalletInfo { .. } => "wallet_info",
            WalletRequest::WalletReceivable { .. } => "wallet_receivable",
            WalletRequest::WalletChangeSeed { .. } => "wallet_change_seed",
            WalletRequest::WalletRepresentative { .. } => "wallet_representative",
            WalletRequest::WalletRepresentativeSet { .. } => "wallet_representative_set",
            WalletRequest::WalletBalances { .. } => "wallet_balances",
            WalletRequest::WalletFrontiers { .. } => "wallet_frontiers",
            WalletRequest::Send { .. } => "send",
            WalletRequest::Receive { .. } => "receive",
            WalletRequest::ReceiveAll { .. } => "receive_all",
            WalletRequest::AccountRepresentativeSet { .. } => "account_representative_set",
            WalletRequest::WorkGenerate { .. } => "work_generate",
        }
    }
}
