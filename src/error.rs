use thiserror::Error;

/// Coarse classification used by callers deciding how to surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    LockedState,
    AuthFailure,
    UpstreamFailure,
    WorkGenerationFailed,
    Internal,
}

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Invalid seed")]
    InvalidSeed,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid hash: {0}")]
    InvalidHash(String),
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid count")]
    InvalidCount,
    #[error("Invalid work: {0}")]
    InvalidWork(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Wallet not found")]
    WalletNotFound,
    #[error("Account not found")]
    AccountNotFound,
    #[error("Account not opened: {0}")]
    UnopenedAccount(String),
    #[error("Block not found")]
    BlockNotFound,
    #[error("Account already exists: {0}")]
    AccountExists(String),
    #[error("Send id already used: {0}")]
    DuplicateSendId(String),
    #[error("Same representative")]
    SameRepresentative,
    #[error("Insufficient balance")]
    InsufficientBalance,
    #[error("No free account index after {0} attempts")]
    AllocationExhausted(u32),
    #[error("Wallet is locked")]
    WalletLocked,
    #[error("Wallet not locked")]
    WalletNotLocked,
    #[error("Couldn't obtain lock: {0}")]
    LockNotObtained(String),
    #[error("Bad password")]
    BadPassword,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Upstream error: {0}")]
    Upstream(String),
    #[error("Unable to generate work")]
    WorkGenerationFailed,
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        use WalletError::*;
        match self {
            InvalidSeed | InvalidAddress(_) | InvalidHash(_) | InvalidPrivateKey
            | InvalidAmount(_) | InvalidCount | InvalidWork(_) | InvalidInput(_) => {
                ErrorKind::InvalidInput
            }
            WalletNotFound | AccountNotFound | UnopenedAccount(_) | BlockNotFound => {
                ErrorKind::NotFound
            }
            AccountExists(_) | DuplicateSendId(_) | SameRepresentative | InsufficientBalance
            | AllocationExhausted(_) => ErrorKind::Conflict,
            WalletLocked | WalletNotLocked | LockNotObtained(_) => ErrorKind::LockedState,
            BadPassword => ErrorKind::AuthFailure,
            Upstream(_) => ErrorKind::UpstreamFailure,
            WorkGenerationFailed => ErrorKind::WorkGenerationFailed,
            DecryptionFailed | DatabaseError(_) | SerializationError(_) | Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Lock contention is the only failure worth retrying from the outside.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::LockNotObtained(_))
    }
}

impl From<sled::Error> for WalletError {
    fn from(err: sled::Error) -> Self {
        WalletError::DatabaseError(err.to_string())
    }
}

impl From<bincode::Error> for WalletError {
    fn from(err: bincode::Error) -> Self {
        WalletError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;
