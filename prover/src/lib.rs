//! Kestrel proof engine
//!
//! Defines the circuit boundary between what a verifier sees and what only
//! the prover knows, and the [`ProvingBackend`] capability that turns a
//! (public inputs, witness) pair into a [`Proof`].
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Batch Proof                                  │
//! │                                                                  │
//! │  Public Inputs:                                                  │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ • prev_root, new_root                                       │ │
//! │  │ • per tx: addresses, nonces, plain amounts or ciphertexts   │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! │                                                                  │
//! │  Private Witness:                                                │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ • signatures / inner well-formedness proofs                 │ │
//! │  │ • pre- and post-state of every touched leaf                 │ │
//! │  │ • Merkle sibling paths for every leaf update                │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Confidential transfers carry their own inner proof whose witness holds
//! the sender key, the plaintext amount, the remaining balance and the
//! encryption randomness.

pub mod backend;
pub mod circuit;
pub mod error;
pub mod inputs;
pub mod reference;
pub mod witness;

pub use backend::{MockProver, ProofMac, ProvingBackend};
pub use error::ProofError;
pub use inputs::{
    BatchPublicInputs, CircuitId, ConfidentialStatement, Proof, PublicInputs, PublicTransaction,
};
pub use reference::ReferenceBackend;
pub use witness::{
    Authorization, BatchWitness, ConfidentialWitness, LeafChange, PrivateWitness, StepWitness,
};
