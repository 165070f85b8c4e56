//! Account allocation for wallets.
//!
//! - Sequential accounts derived from the wallet seed by index
//! - Ad-hoc accounts imported by private key
//! - Idempotency records for published blocks

pub mod ledger;
pub mod types;

pub use ledger::{AccountLedger, AccountSummary, SeedChange};
pub use types::{Account, BlockRecord};
