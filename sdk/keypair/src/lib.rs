use ark_ff::{PrimeField, UniformRand, Zero};
use rand::rngs::OsRng;
use rand::{CryptoRng, Rng};
use thiserror::Error;

use kestrel_account::{Address, BalanceKind};
use kestrel_crypto::{
    CryptoError, DEFAULT_DECRYPT_BOUND, EncryptedBalance, RollupPublicKey, RollupScalar,
    RollupSecretKey, SettlementPublicKey, SettlementScalar, SettlementSecretKey,
};
use kestrel_prover::{
    CircuitId, ConfidentialStatement, ConfidentialWitness, PrivateWitness, ProofError,
    ProvingBackend, PublicInputs,
};
use kestrel_transaction::{ConfidentialTransfer, DepositRequest, Transaction, TransferData};

#[derive(Debug, Error)]
pub enum WalletError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("insufficient balance: have {available}, need {required}")]
    InsufficientBalance { available: u64, required: u64 },

    #[error("confidential transfer to own address")]
    SelfTransfer,

    #[error("proof generation failed: {0}")]
    Proof(#[from] ProofError),
}

/// A user's wallet containing private keys.
/// NEVER expose this struct's internals.
pub struct Keypair {
    /// Owns the rollup address, signs transfers, decrypts balances
    rollup_key: RollupSecretKey,
    /// Authorizes deposits on the settlement layer
    settlement_key: SettlementSecretKey,
}

impl Keypair {
    /// Generates a fresh random wallet.
    pub fn new_random() -> Self {
        Self::generate(&mut OsRng)
    }

    pub fn generate<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        Self {
            rollup_key: RollupSecretKey::random(rng),
            settlement_key: SettlementSecretKey::random(rng),
        }
    }

    /// Reconstructs a wallet from raw seed bytes.
    /// seed must be 64 bytes: 32 for the rollup key + 32 for the settlement key.
    pub fn from_seed(seed: &[u8; 64]) -> Result<Self, CryptoError> {
        let rollup = RollupScalar::from_le_bytes_mod_order(&seed[..32]);
        let settlement = SettlementScalar::from_le_bytes_mod_order(&seed[32..]);
        if rollup.is_zero() || settlement.is_zero() {
            return Err(CryptoError::InvalidScalar);
        }
        Ok(Self {
            rollup_key: RollupSecretKey::from_scalar(rollup),
            settlement_key: SettlementSecretKey::from_scalar(settlement),
        })
    }

    /// Returns the public rollup address.
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.rollup_key.public_key())
    }

    pub fn rollup_public_key(&self) -> RollupPublicKey {
        self.rollup_key.public_key()
    }

    pub fn settlement_public_key(&self) -> SettlementPublicKey {
        self.settlement_key.public_key()
    }

    /// Signs a transfer payload. The sender must be this wallet.
    pub fn sign_transfer(&self, data: TransferData) -> Transaction {
        Transaction::Transfer(data.sign(&self.rollup_key))
    }

    pub fn transfer(&self, recipient: Address, amount: u64, nonce: u64) -> Transaction {
        self.sign_transfer(TransferData {
            sender: self.address(),
            recipient,
            amount,
            nonce,
        })
    }

    /// Signs a deposit into `address` (usually this wallet's own) with the
    /// settlement key. Returns the request and its signature.
    pub fn sign_deposit(
        &self,
        address: Address,
        amount: u64,
        kind: BalanceKind,
        nonce: u64,
    ) -> (DepositRequest, Vec<u8>) {
        let request = DepositRequest {
            address,
            amount,
            kind,
            nonce,
        };
        let signature = request.sign(&self.settlement_key);
        (request, signature)
    }

    pub fn decrypt_balance(&self, balance: &EncryptedBalance) -> Result<u64, CryptoError> {
        balance.decrypt(&self.rollup_key, DEFAULT_DECRYPT_BOUND)
    }

    /// Builds a confidential transfer from the wallet's current encrypted
    /// balance, proving it well formed with `backend`.
    ///
    /// `current_balance` must be the ciphertext held in this wallet's leaf at
    /// the time the operator applies the transfer.
    pub fn confidential_transfer<R: Rng + CryptoRng>(
        &self,
        backend: &dyn ProvingBackend,
        current_balance: &EncryptedBalance,
        recipient: Address,
        amount: u64,
        nonce: u64,
        rng: &mut R,
    ) -> Result<Transaction, WalletError> {
        let sender = self.address();
        if recipient == sender {
            return Err(WalletError::SelfTransfer);
        }
        let recipient_key = recipient.public_key()?;

        let available = self.decrypt_balance(current_balance)?;
        if amount > available {
            return Err(WalletError::InsufficientBalance {
                available,
                required: amount,
            });
        }

        let randomness = RollupScalar::rand(rng);
        let sender_amount =
            EncryptedBalance::encrypt(&self.rollup_key.public_key(), amount, &randomness);
        let recipient_amount = EncryptedBalance::encrypt(&recipient_key, amount, &randomness);
        let sender_after = current_balance.sub(&sender_amount)?;

        let statement = ConfidentialStatement {
            sender,
            recipient,
            sender_before: *current_balance,
            sender_amount,
            recipient_amount,
            sender_after,
            nonce,
        };
        let witness = ConfidentialWitness {
            sender_secret: self.rollup_key,
            amount,
            remaining_balance: available - amount,
            randomness,
        };
        let proof = backend.prove(
            CircuitId::ConfidentialTransfer,
            &PublicInputs::ConfidentialTransfer(statement),
            &PrivateWitness::ConfidentialTransfer(witness),
        )?;

        Ok(Transaction::ConfidentialTransfer(ConfidentialTransfer {
            sender,
            recipient,
            sender_encrypted_after_balance: sender_after,
            sender_encrypted_amount: sender_amount,
            recipient_encrypted_amount: recipient_amount,
            nonce,
            proof_of_well_formedness: proof.bytes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::rand::{SeedableRng, rngs::StdRng};
    use kestrel_account::{Account, Balance};
    use kestrel_prover::ReferenceBackend;
    use kestrel_transaction::{apply, verify_authorization};

    // concrete CryptoRng (ark_std::test_rng returns an opaque `impl Rng`),
    // seeded like ark_std's deterministic test rng
    fn test_rng() -> StdRng {
        StdRng::from_seed([
            1, 0, 0, 0, 23, 0, 0, 0, 200, 1, 0, 0, 210, 30, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            0, 0, 0, 0, 0,
        ])
    }

    #[test]
    fn test_from_seed_is_deterministic() {
        let seed = [7u8; 64];
        let a = Keypair::from_seed(&seed).unwrap();
        let b = Keypair::from_seed(&seed).unwrap();
        assert_eq!(a.address(), b.address());
        assert_eq!(a.settlement_public_key(), b.settlement_public_key());
        assert!(Keypair::from_seed(&[0u8; 64]).is_err());
    }

    #[test]
    fn test_transfer_is_signed_by_wallet() {
        let mut rng = test_rng();
        let alice = Keypair::generate(&mut rng);
        let bob = Keypair::generate(&mut rng);

        let tx = alice.transfer(bob.address(), 10, 0);
        assert!(verify_authorization(&tx).is_ok());
        assert_eq!(tx.sender(), Some(alice.address()));
    }

    #[test]
    fn test_sign_deposit() {
        let mut rng = test_rng();
        let wallet = Keypair::generate(&mut rng);
        let (request, signature) = wallet.sign_deposit(wallet.address(), 100, BalanceKind::Plain, 0);
        assert!(request.signature_valid(&wallet.settlement_public_key(), &signature));
    }

    #[test]
    fn test_confidential_transfer_applies_and_decrypts() {
        let mut rng = test_rng();
        let backend = ReferenceBackend::default();
        let alice = Keypair::generate(&mut rng);
        let bob = Keypair::generate(&mut rng);

        let funded = EncryptedBalance::trivial(100);
        let tx = alice
            .confidential_transfer(&backend, &funded, bob.address(), 40, 0, &mut rng)
            .unwrap();

        let sender = Account {
            address: alice.address(),
            nonce: 0,
            balance: Balance::Encrypted(funded),
        };
        let after = apply(&tx, &[Some(sender), None]).unwrap();
        assert_eq!(alice.decrypt_balance(after[0].encrypted_balance().unwrap()).unwrap(), 60);
        assert_eq!(bob.decrypt_balance(after[1].encrypted_balance().unwrap()).unwrap(), 40);
        assert_eq!(after[0].nonce, 1);
    }

    #[test]
    fn test_confidential_transfer_refuses_overspend() {
        let mut rng = test_rng();
        let backend = ReferenceBackend::default();
        let alice = Keypair::generate(&mut rng);
        let bob = Keypair::generate(&mut rng);

        let err = alice
            .confidential_transfer(&backend, &EncryptedBalance::trivial(5), bob.address(), 6, 0, &mut rng)
            .unwrap_err();
        assert!(matches!(err, WalletError::InsufficientBalance { available: 5, required: 6 }));

        let err = alice
            .confidential_transfer(&backend, &EncryptedBalance::trivial(5), alice.address(), 1, 0, &mut rng)
            .unwrap_err();
        assert!(matches!(err, WalletError::SelfTransfer));
    }
}
