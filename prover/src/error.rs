use thiserror::Error;

use crate::inputs::CircuitId;

/// Failure to produce a proof. The whole batch is discarded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("prover failure: {0}")]
    ProverFailure(String),

    /// The witness does not satisfy the statement. `tx_index` names the
    /// first offending transaction when one can be singled out.
    #[error("witness inconsistency at transaction {tx_index:?}: {reason}")]
    WitnessInconsistency {
        tx_index: Option<usize>,
        reason: String,
    },

    #[error("circuit mismatch: expected {expected:?}, got {got:?}")]
    CircuitMismatch { expected: CircuitId, got: CircuitId },
}

impl ProofError {
    pub fn at(tx_index: usize, reason: impl Into<String>) -> Self {
        ProofError::WitnessInconsistency {
            tx_index: Some(tx_index),
            reason: reason.into(),
        }
    }

    pub fn batch(reason: impl Into<String>) -> Self {
        ProofError::WitnessInconsistency {
            tx_index: None,
            reason: reason.into(),
        }
    }

    /// Offending transaction position, if known.
    pub fn offending_tx(&self) -> Option<usize> {
        match self {
            ProofError::WitnessInconsistency { tx_index, .. } => *tx_index,
            _ => None,
        }
    }
}
