use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

use kestrel_account::{Address, BalanceKind};
use kestrel_crypto::{
    EncryptedBalance, RollupSecretKey, RollupSignature, SettlementPublicKey, SettlementSecretKey,
    SettlementSignature,
};

pub mod error;
pub mod transition;

pub use error::ValidationError;
pub use transition::{apply, touched_addresses, verify_authorization};

/// Domain tag prefixed to every signed transfer payload.
const TRANSFER_DOMAIN: &[u8] = b"kestrel/transfer/v1";
/// Domain tag for settlement-layer deposit authorizations.
const DEPOSIT_DOMAIN: &[u8] = b"kestrel/deposit/v1";

/// The enum for all inputs to the rollup state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub enum Transaction {
    /// A deposit accepted by the settlement contract and bridged to the rollup.
    Deposit(DepositEvent),

    /// A plain-balance transfer signed by the sender.
    Transfer(SignedTransfer),

    /// A transfer between encrypted balances, authorized by a proof of well-formedness.
    ConfidentialTransfer(ConfidentialTransfer),
}

/// Deposit event observed on the settlement layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct DepositEvent {
    pub address: Address,
    pub amount: u64,
    /// Balance kind used if the deposit creates the account.
    pub kind: BalanceKind,
    /// Position in the settlement layer's event log.
    pub l1_seq: u64,
}

/// A deposit as requested on the settlement layer, before it is sequenced.
///
/// Signed with the depositor's settlement-curve key; `nonce` is the
/// depositor's request counter kept by the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct DepositRequest {
    pub address: Address,
    pub amount: u64,
    pub kind: BalanceKind,
    pub nonce: u64,
}

impl DepositRequest {
    pub fn signing_message(&self) -> Vec<u8> {
        let mut msg = DEPOSIT_DOMAIN.to_vec();
        msg.extend(wincode::serialize(self).expect("Serialization failed"));
        msg
    }

    pub fn sign(&self, secret_key: &SettlementSecretKey) -> Vec<u8> {
        secret_key.sign(&self.signing_message()).to_bytes()
    }

    pub fn signature_valid(&self, depositor: &SettlementPublicKey, signature: &[u8]) -> bool {
        match SettlementSignature::from_bytes(signature) {
            Ok(signature) => depositor.verify(&self.signing_message(), &signature),
            Err(_) => false,
        }
    }
}

/// The payload a user signs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct TransferData {
    pub sender: Address,
    pub recipient: Address,
    pub amount: u64,
    pub nonce: u64,
}

impl TransferData {
    /// Canonical encoding covered by the signature.
    pub fn signing_message(&self) -> Vec<u8> {
        let mut msg = TRANSFER_DOMAIN.to_vec();
        msg.extend(wincode::serialize(self).expect("Serialization failed"));
        msg
    }

    pub fn sign(self, secret_key: &RollupSecretKey) -> SignedTransfer {
        let signature = secret_key.sign(&self.signing_message()).to_bytes();
        SignedTransfer {
            data: self,
            signature,
        }
    }
}

/// The authenticated wrapper around TransferData.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct SignedTransfer {
    pub data: TransferData,
    /// Schnorr signature (rollup curve) over `data.signing_message()`.
    pub signature: Vec<u8>,
}

impl SignedTransfer {
    pub fn signature_valid(&self) -> bool {
        let Ok(public_key) = self.data.sender.public_key() else {
            return false;
        };
        let Ok(signature) = RollupSignature::from_bytes(&self.signature) else {
            return false;
        };
        public_key.verify(&self.data.signing_message(), &signature)
    }
}

/// Encrypted-balance transfer. `sender` and `recipient` are the parties'
/// public keys; every amount appears only as a ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct ConfidentialTransfer {
    pub sender: Address,
    pub recipient: Address,
    pub sender_encrypted_after_balance: EncryptedBalance,
    /// Amount encrypted under the sender key
    pub sender_encrypted_amount: EncryptedBalance,
    /// Same amount and randomness, encrypted under the recipient key
    pub recipient_encrypted_amount: EncryptedBalance,
    pub nonce: u64,
    /// Opaque proof bytes for the ConfidentialTransfer circuit
    pub proof_of_well_formedness: Vec<u8>,
}

impl Transaction {
    /// Canonical serialized form (storage and hashing).
    pub fn encode(&self) -> Vec<u8> {
        wincode::serialize(self).expect("Serialization failed")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ValidationError> {
        wincode::deserialize(bytes)
            .map_err(|e| ValidationError::MalformedTransaction(format!("decode: {e}")))
    }

    pub fn hash(&self) -> [u8; 32] {
        *blake3::hash(&self.encode()).as_bytes()
    }

    /// The account whose nonce the transaction consumes, if any.
    pub fn sender(&self) -> Option<Address> {
        match self {
            Transaction::Deposit(_) => None,
            Transaction::Transfer(t) => Some(t.data.sender),
            Transaction::ConfidentialTransfer(c) => Some(c.sender),
        }
    }

    pub fn nonce(&self) -> Option<u64> {
        match self {
            Transaction::Deposit(_) => None,
            Transaction::Transfer(t) => Some(t.data.nonce),
            Transaction::ConfidentialTransfer(c) => Some(c.nonce),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Transaction::Deposit(_) => "deposit",
            Transaction::Transfer(_) => "transfer",
            Transaction::ConfidentialTransfer(_) => "confidential_transfer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::test_rng;

    #[test]
    fn test_signed_transfer_verifies() {
        let mut rng = test_rng();
        let alice = RollupSecretKey::random(&mut rng);
        let bob = RollupSecretKey::random(&mut rng);

        let data = TransferData {
            sender: Address::from_public_key(&alice.public_key()),
            recipient: Address::from_public_key(&bob.public_key()),
            amount: 30,
            nonce: 0,
        };
        let signed = data.sign(&alice);
        assert!(signed.signature_valid());

        let mut tampered = signed.clone();
        tampered.data.amount = 31;
        assert!(!tampered.signature_valid());

        let forged = data.sign(&bob);
        assert!(!forged.signature_valid());
    }

    #[test]
    fn test_deposit_request_signature() {
        let mut rng = test_rng();
        let depositor = SettlementSecretKey::random(&mut rng);
        let rollup = RollupSecretKey::random(&mut rng);
        let request = DepositRequest {
            address: Address::from_public_key(&rollup.public_key()),
            amount: 500,
            kind: BalanceKind::Encrypted,
            nonce: 0,
        };

        let signature = request.sign(&depositor);
        assert!(request.signature_valid(&depositor.public_key(), &signature));

        let replayed = DepositRequest { nonce: 1, ..request };
        assert!(!replayed.signature_valid(&depositor.public_key(), &signature));
        let other = SettlementSecretKey::random(&mut rng).public_key();
        assert!(!request.signature_valid(&other, &signature));
        assert!(!request.signature_valid(&depositor.public_key(), &signature[..10]));
    }

    #[test]
    fn test_encode_decode_and_hash() {
        let mut rng = test_rng();
        let key = RollupSecretKey::random(&mut rng);
        let tx = Transaction::Deposit(DepositEvent {
            address: Address::from_public_key(&key.public_key()),
            amount: 50,
            kind: BalanceKind::Plain,
            l1_seq: 7,
        });

        let decoded = Transaction::decode(&tx.encode()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.hash(), tx.hash());
        assert_eq!(tx.sender(), None);
        assert!(Transaction::decode(&[0xff, 0x01]).is_err());
    }
}
