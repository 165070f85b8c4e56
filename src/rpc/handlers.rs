use super::types::{WalletRequest, UNSUPPORTED_WALLET_ACTIONS};
use crate::block_engine::BlockOptions;
use crate::encoding::{parse_block_hash, Network};
use crate::error::{ErrorKind, Result, WalletError};
use crate::rpc::RpcState;
use crate::work::WorkRequest;
use axum::{extract::State, http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::{json, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Single POST endpoint. Wallet actions are decoded and dispatched, every
/// other action except the unsupported wallet ones is relayed to the node as is.
pub async fn handle_rpc_request(State(state): State<RpcState>, Json(body): Json<Value>) -> Response {
    let Some(action) = body.get("action").and_then(Value::as_str) else {
        return error_response(StatusCode::BAD_REQUEST, "Unable to parse json: missing action");
    };
    if UNSUPPORTED_WALLET_ACTIONS.contains(&action) {
        debug!("Refused unsupported wallet action {}", action);
        return error_response(StatusCode::BAD_REQUEST, "not_implemented");
    }
    if !WalletRequest::handles(action) {
        return forward(&state, action.to_string(), &body).await;
    }

    let request: WalletRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            debug!("Rejected request: {}", e);
            return error_response(StatusCode::BAD_REQUEST, &format!("Unable to parse json: {}", e));
        }
    };
    let action = request.action();
    debug!("Gateway request: action={}", action);

    match dispatch(&state, request).await {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) => {
            let status = status_for(&e);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                error!("{} failed: {}", action, e);
            } else {
                warn!("{} rejected: {}", action, e);
            }
            error_response(status, &e.to_string())
        }
    }
}

async fn forward(state: &RpcState, action: String, body: &Value) -> Response {
    debug!("Forwarding {} to node", action);
    match state.node.forward(body).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(e) => {
            error!("Forwarding {} failed: {}", action, e);
            error_response(status_for(&e), &e.to_string())
        }
    }
}

fn status_for(err: &WalletError) -> StatusCode {
    match err.kind() {
        ErrorKind::UpstreamFailure | ErrorKind::WorkGenerationFailed | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::BAD_REQUEST,
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn wallet_id(wallet: &str) -> Result<Uuid> {
    Uuid::parse_str(wallet).map_err(|_| WalletError::WalletNotFound)
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

async fn dispatch(state: &RpcState, request: WalletRequest) -> Result<Value> {
    match request {
        WalletRequest::WalletCreate { seed } => {
            let wallet = state.wallets.create(seed.as_deref())?;
            Ok(json!({ "wallet": wallet.id.to_string() }))
        }
        WalletRequest::WalletDestroy { wallet } => {
            state.wallets.destroy(&wallet_id(&wallet)?).await?;
            Ok(json!({ "destroyed": "1" }))
        }
        WalletRequest::AccountCreate { wallet, index } => {
            let id = wallet_id(&wallet)?;
            let account = match index {
                Some(index) => state.ledger.create_at(&id, index).await?,
                None => state.ledger.create_next(&id).await?,
            };
            Ok(json!({ "account": account.address }))
        }
        WalletRequest::AccountsCreate { wallet, count } => {
            let id = wallet_id(&wallet)?;
            let count = count.ok_or(WalletError::InvalidCount)?;
            let accounts = state.ledger.create_batch(&id, count).await?;
            let addresses: Vec<String> = accounts.into_iter().map(|a| a.address).collect();
            Ok(json!({ "accounts": addresses }))
        }
        WalletRequest::AccountList { wallet, count } => {
            let id = wallet_id(&wallet)?;
            let limit = count.unwrap_or(0) as usize;
            let addresses: Vec<String> = state
                .ledger
                .list(&id, limit)?
                .into_iter()
                .map(|a| a.address)
                .collect();
            Ok(json!({ "accounts": addresses }))
        }
        WalletRequest::WalletContains { wallet, account } => {
            let exists = state.ledger.exists(&wallet_id(&wallet)?, &account)?;
            Ok(json!({ "exists": flag(exists) }))
        }
        WalletRequest::WalletAdd { wallet, key } => {
            let account = state.ledger.import_adhoc(&wallet_id(&wallet)?, &key).await?;
            Ok(json!({ "account": account.address }))
        }
        WalletRequest::PasswordChange { wallet, password } => {
            state.vault.set_password(&wallet_id(&wallet)?, &password).await?;
            Ok(json!({ "changed": "1" }))
        }
        WalletRequest::PasswordEnter { wallet, password } => {
            let id = wallet_id(&wallet)?;
            match state.vault.unlock(&id, &password).await {
                Ok(()) => Ok(json!({ "valid": "1" })),
                Err(e @ (WalletError::WalletNotLocked | WalletError::WalletNotFound)) => Err(e),
                Err(e) => {
                    debug!("Unlock of {} failed: {}", id, e);
                    Ok(json!({ "valid": "0" }))
                }
            }
        }
        WalletRequest::PasswordValid { wallet } => {
            let wallet = state.vault.wallet(&wallet_id(&wallet)?)?;
            Ok(json!({ "valid": flag(!state.vault.is_locked(&wallet)) }))
        }
        WalletRequest::WalletInfo { wallet } => {
            let info = state.blocks.wallet_info(&wallet_id(&wallet)?).await?;
            Ok(json!({
                "balance": info.balance.to_string(),
                "pending": info.receivable.to_string(),
                "receivable": info.receivable.to_string(),
                "accounts_count": info.accounts.accounts,
                "adhoc_count": info.accounts.adhoc,
                "deterministic_count": info.accounts.deterministic,
                "deterministic_index": info.accounts.deterministic_index,
            }))
        }
        WalletRequest::WalletReceivable { wallet, threshold } => {
            let threshold = threshold.unwrap_or_else(|| "0".to_string());
            if threshold.parse::<u128>().is_err() {
                return Err(WalletError::InvalidAmount(threshold));
            }
            let blocks = state
                .blocks
                .wallet_receivable(&wallet_id(&wallet)?, &threshold)
                .await?;
            Ok(json!({ "blocks": blocks }))
        }
        WalletRequest::WalletChangeSeed { wallet, seed } => {
            let change = state.ledger.change_seed(&wallet_id(&wallet)?, &seed).await?;
            Ok(json!({
                "success": "",
                "last_restored_account": change.last_restored_account,
                "restored_count": change.restored_count,
            }))
        }
        WalletRequest::WalletLock { wallet } => {
            state.vault.lock(&wallet_id(&wallet)?).await?;
            Ok(json!({ "locked": "1" }))
        }
        WalletRequest::WalletLocked { wallet } => {
            let wallet = state.vault.wallet(&wallet_id(&wallet)?)?;
            Ok(json!({ "locked": flag(state.vault.is_locked(&wallet)) }))
        }
        WalletRequest::WalletRepresentative { wallet } => {
            let representative = state.wallets.representative(&wallet_id(&wallet)?)?;
            Ok(json!({ "representative": representative.unwrap_or_default() }))
        }
        WalletRequest::WalletRepresentativeSet {
            wallet,
            representative,
            update_existing_accounts,
        } => {
            state
                .blocks
                .set_wallet_representative(
                    &wallet_id(&wallet)?,
                    &representative,
                    update_existing_accounts.unwrap_or(false),
                )
                .await?;
            Ok(json!({ "set": "1" }))
        }
        WalletRequest::WalletBalances { wallet } => {
            let balances = state.blocks.wallet_balances(&wallet_id(&wallet)?).await?;
            Ok(json!({ "balances": balances }))
        }
        WalletRequest::WalletFrontiers { wallet } => {
            let frontiers = state.blocks.wallet_frontiers(&wallet_id(&wallet)?).await?;
            Ok(json!({ "frontiers": frontiers }))
        }
        WalletRequest::Send {
            wallet,
            source,
            destination,
            amount,
            id,
            work,
            bpow_key,
        } => {
            let options = BlockOptions {
                work,
                delegated_key: bpow_key,
            };
            let hash = state
                .blocks
                .send(&wallet_id(&wallet)?, &source, &destination, &amount, id.as_deref(), &options)
                .await?;
            Ok(json!({ "block": hash }))
        }
        WalletRequest::Receive {
            wallet,
            account,
            block,
            work,
            bpow_key,
        } => {
            let options = BlockOptions {
                work,
                delegated_key: bpow_key,
            };
            let hash = state
                .blocks
                .receive(&wallet_id(&wallet)?, &account, &block, &options)
                .await?;
            Ok(json!({ "block": hash }))
        }
        WalletRequest::ReceiveAll {
            wallet,
            account,
            bpow_key,
        } => {
            let id = wallet_id(&wallet)?;
            let received = match account {
                Some(account) => state.blocks.receive_all_account(&id, &account, bpow_key).await?,
                None => {
                    let report = state.blocks.receive_all(&id, bpow_key).await?;
                    for (account, reason) in &report.failures {
                        warn!("receive_all skipped {}: {}", account, reason);
                    }
                    report.received
                }
            };
            Ok(json!({ "received": received }))
        }
        WalletRequest::AccountRepresentativeSet {
            wallet,
            account,
            representative,
            work,
            bpow_key,
            only_if_different,
        } => {
            let options = BlockOptions {
                work,
                delegated_key: bpow_key,
            };
            let hash = state
                .blocks
                .change(
                    &wallet_id(&wallet)?,
                    &account,
                    &representative,
                    only_if_different.unwrap_or(false),
                    &options,
                )
                .await?;
            Ok(json!({ "block": hash }))
        }
        WalletRequest::WorkGenerate {
            hash,
            difficulty_multiplier,
            subtype,
            bpow_key,
            block_award,
        } => {
            parse_block_hash(&hash)?;
            let multiplier = match (state.network, difficulty_multiplier, subtype.as_deref()) {
                (Network::Banano, _, _) => 1,
                (_, Some(m), _) => u64::from(m.max(1)),
                (_, None, Some("receive")) => 1,
                (network, None, _) => network.send_multiplier(),
            };
            let mut request = WorkRequest::new(hash, multiplier).with_delegated_key(bpow_key);
            request.block_award = block_award.unwrap_or(true);
            let work = state.work.work_generate(&request).await?;
            Ok(json!({ "work": work }))
        }
    }
}
