use kestrel_account::Account;
use kestrel_crypto::{MerkleProof, RollupScalar, RollupSecretKey};

/// How a transaction step is authorized inside the batch witness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// Accepted by the settlement contract; no rollup signature.
    L1Deposit,
    /// Rollup-curve signature bytes over the transfer payload.
    Signature(Vec<u8>),
    /// Inner proof bytes for the ConfidentialTransfer circuit.
    WellFormedness(Vec<u8>),
}

/// One leaf replacement. `path` is the sibling path at the moment of the
/// update: it proves `before` against the running root and yields the next
/// running root from `after`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafChange {
    pub index: u64,
    /// `None` when the slot was empty (account creation)
    pub before: Option<Account>,
    pub after: Account,
    pub path: MerkleProof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepWitness {
    pub authorization: Authorization,
    /// In `touched_addresses` order (sender first)
    pub changes: Vec<LeafChange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchWitness {
    pub steps: Vec<StepWitness>,
}

/// What the sender of a confidential transfer knows.
#[derive(Debug, Clone)]
pub struct ConfidentialWitness {
    pub sender_secret: RollupSecretKey,
    pub amount: u64,
    pub remaining_balance: u64,
    pub randomness: RollupScalar,
}

#[derive(Debug, Clone)]
pub enum PrivateWitness {
    Batch(BatchWitness),
    ConfidentialTransfer(ConfidentialWitness),
}
