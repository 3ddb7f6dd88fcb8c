use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// The batch was built on a root the contract no longer holds.
    #[error("stale root: contract holds {current}, batch starts from {submitted}")]
    StaleRoot { current: String, submitted: String },

    #[error("proof verification failed")]
    VerificationFailed,

    #[error("invalid deposit: {0}")]
    InvalidDeposit(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A batch credits a deposit the log does not hold, or one already credited.
    #[error("deposit mismatch: {0}")]
    DepositMismatch(String),
}
