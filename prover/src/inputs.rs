//! Public side of the circuit boundary.
//!
//! Nothing in this module may ever hold a private key, a plaintext amount
//! hidden by a ciphertext, or encryption randomness.

use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

use kestrel_account::{Address, BalanceKind};
use kestrel_crypto::EncryptedBalance;
use kestrel_transaction::{
    ConfidentialTransfer, DepositEvent, SignedTransfer, Transaction, TransferData,
};

use crate::error::ProofError;
use crate::witness::Authorization;

/// Which relation a proof speaks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SchemaWrite, SchemaRead)]
pub enum CircuitId {
    /// A whole batch: prev_root → new_root under the listed transactions.
    Batch,
    /// One confidential transfer is well formed and within balance.
    ConfidentialTransfer,
}

impl CircuitId {
    pub fn tag(&self) -> &'static [u8] {
        match self {
            CircuitId::Batch => b"kestrel/circuit/batch/v1",
            CircuitId::ConfidentialTransfer => b"kestrel/circuit/confidential-transfer/v1",
        }
    }
}

/// Per-transaction public fields of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaWrite, SchemaRead)]
pub enum PublicTransaction {
    Deposit {
        address: Address,
        amount: u64,
        kind: BalanceKind,
        l1_seq: u64,
    },
    Transfer {
        sender: Address,
        recipient: Address,
        amount: u64,
        nonce: u64,
    },
    Confidential {
        sender: Address,
        recipient: Address,
        sender_amount: EncryptedBalance,
        recipient_amount: EncryptedBalance,
        sender_after: EncryptedBalance,
        nonce: u64,
    },
}

impl PublicTransaction {
    /// Strip everything that is not a public field.
    pub fn from_transaction(tx: &Transaction) -> Self {
        match tx {
            Transaction::Deposit(d) => PublicTransaction::Deposit {
                address: d.address,
                amount: d.amount,
                kind: d.kind,
                l1_seq: d.l1_seq,
            },
            Transaction::Transfer(t) => PublicTransaction::Transfer {
                sender: t.data.sender,
                recipient: t.data.recipient,
                amount: t.data.amount,
                nonce: t.data.nonce,
            },
            Transaction::ConfidentialTransfer(c) => PublicTransaction::Confidential {
                sender: c.sender,
                recipient: c.recipient,
                sender_amount: c.sender_encrypted_amount,
                recipient_amount: c.recipient_encrypted_amount,
                sender_after: c.sender_encrypted_after_balance,
                nonce: c.nonce,
            },
        }
    }

    /// Rebuild the full transaction from its public fields and the private
    /// authorization that accompanies it in the witness.
    pub fn with_authorization(
        &self,
        authorization: &Authorization,
        tx_index: usize,
    ) -> Result<Transaction, ProofError> {
        let tx = match (self, authorization) {
            (
                PublicTransaction::Deposit {
                    address,
                    amount,
                    kind,
                    l1_seq,
                },
                Authorization::L1Deposit,
            ) => Transaction::Deposit(DepositEvent {
                address: *address,
                amount: *amount,
                kind: *kind,
                l1_seq: *l1_seq,
            }),
            (
                PublicTransaction::Transfer {
                    sender,
                    recipient,
                    amount,
                    nonce,
                },
                Authorization::Signature(signature),
            ) => Transaction::Transfer(SignedTransfer {
                data: TransferData {
                    sender: *sender,
                    recipient: *recipient,
                    amount: *amount,
                    nonce: *nonce,
                },
                signature: signature.clone(),
            }),
            (
                PublicTransaction::Confidential {
                    sender,
                    recipient,
                    sender_amount,
                    recipient_amount,
                    sender_after,
                    nonce,
                },
                Authorization::WellFormedness(proof),
            ) => Transaction::ConfidentialTransfer(ConfidentialTransfer {
                sender: *sender,
                recipient: *recipient,
                sender_encrypted_after_balance: *sender_after,
                sender_encrypted_amount: *sender_amount,
                recipient_encrypted_amount: *recipient_amount,
                nonce: *nonce,
                proof_of_well_formedness: proof.clone(),
            }),
            _ => return Err(ProofError::at(tx_index, "authorization does not match transaction kind")),
        };
        Ok(tx)
    }
}

/// Public inputs of the batch circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaWrite, SchemaRead)]
pub struct BatchPublicInputs {
    pub prev_root: [u8; 32],
    pub new_root: [u8; 32],
    pub transactions: Vec<PublicTransaction>,
}

/// Public inputs of the confidential-transfer circuit.
///
/// `sender_before` is the sender's ciphertext at the time the transfer is
/// applied; it is what makes "amount ≤ balance" a statement about public
/// data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SchemaWrite, SchemaRead)]
pub struct ConfidentialStatement {
    pub sender: Address,
    pub recipient: Address,
    pub sender_before: EncryptedBalance,
    pub sender_amount: EncryptedBalance,
    pub recipient_amount: EncryptedBalance,
    pub sender_after: EncryptedBalance,
    pub nonce: u64,
}

impl ConfidentialStatement {
    pub fn for_transfer(transfer: &ConfidentialTransfer, sender_before: EncryptedBalance) -> Self {
        Self {
            sender: transfer.sender,
            recipient: transfer.recipient,
            sender_before,
            sender_amount: transfer.sender_encrypted_amount,
            recipient_amount: transfer.recipient_encrypted_amount,
            sender_after: transfer.sender_encrypted_after_balance,
            nonce: transfer.nonce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaWrite, SchemaRead)]
pub enum PublicInputs {
    Batch(BatchPublicInputs),
    ConfidentialTransfer(ConfidentialStatement),
}

impl PublicInputs {
    pub fn circuit(&self) -> CircuitId {
        match self {
            PublicInputs::Batch(_) => CircuitId::Batch,
            PublicInputs::ConfidentialTransfer(_) => CircuitId::ConfidentialTransfer,
        }
    }

    /// Canonical byte encoding the proof is bound to.
    pub fn encode(&self) -> Vec<u8> {
        wincode::serialize(self).expect("Serialization failed")
    }
}

/// Opaque proof bytes together with the public inputs they were made for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaWrite, SchemaRead)]
pub struct Proof {
    pub circuit: CircuitId,
    pub public_inputs: PublicInputs,
    pub bytes: Vec<u8>,
}

impl Proof {
    pub fn bytes_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}
