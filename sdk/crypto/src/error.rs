use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid point encoding")]
    InvalidPoint,

    #[error("point ({x}, {y}) is not in the prime-order subgroup")]
    NotOnCurve { x: String, y: String },

    #[error("invalid scalar encoding")]
    InvalidScalar,

    #[error("invalid signature length: expected {expected}, got {got}")]
    InvalidSignatureLength { expected: usize, got: usize },

    #[error("plaintext is not below the decryption bound {bound}")]
    DecryptionOutOfRange { bound: u64 },

    #[error("decryption bound {bound} exceeds the supported maximum {max}")]
    DecryptionBoundTooLarge { bound: u64, max: u64 },
}
