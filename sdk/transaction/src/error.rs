use kestrel_account::Address;
use thiserror::Error;

/// Why a transaction was refused. Always recoverable: the transaction is
/// dropped and reported, the batch carries on without it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: u64, required: u64 },

    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("bad signature")]
    BadSignature,

    #[error("unknown address {0}")]
    UnknownAddress(Address),

    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),
}

impl ValidationError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        ValidationError::MalformedTransaction(reason.into())
    }
}
