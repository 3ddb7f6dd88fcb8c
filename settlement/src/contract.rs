use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use wincode::{SchemaRead, SchemaWrite};

use kestrel_account::{Address, BalanceKind};
use kestrel_crypto::{FieldElement, SettlementPublicKey};
use kestrel_prover::{
    BatchPublicInputs, CircuitId, Proof, ProvingBackend, PublicInputs, PublicTransaction,
};
use kestrel_transaction::{DepositEvent, DepositRequest};

use crate::error::SettlementError;

/// Entries of the contract's append-only log. An event's position in the
/// log is its sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaWrite, SchemaRead)]
pub enum SettlementEvent {
    Deposit(DepositEvent),
    Forged {
        batch_index: u64,
        prev_root: [u8; 32],
        new_root: [u8; 32],
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForgeReceipt {
    pub batch_index: u64,
    pub new_root: [u8; 32],
    /// Log position of the `Forged` event
    pub event_seq: u64,
}

/// Settlement-layer state machine.
///
/// `root` is the only consensus-relevant field. Everything else is
/// bookkeeping reproducible from the event log.
pub struct SettlementContract {
    root: [u8; 32],
    batch_index: u64,
    events: Vec<SettlementEvent>,
    /// Next expected request nonce per depositor (compressed settlement key)
    deposit_nonces: HashMap<Vec<u8>, u64>,
    /// Log positions of deposits some forged batch has credited
    credited_deposits: HashSet<u64>,
    verifier: Arc<dyn ProvingBackend>,
}

impl SettlementContract {
    pub fn new(genesis_root: [u8; 32], verifier: Arc<dyn ProvingBackend>) -> Self {
        info!(
            root = %hex::encode(genesis_root),
            vk = %hex::encode(verifier.verification_key_hash()),
            "settlement contract initialized"
        );
        Self {
            root: genesis_root,
            batch_index: 0,
            events: Vec::new(),
            deposit_nonces: HashMap::new(),
            credited_deposits: HashSet::new(),
            verifier,
        }
    }

    pub fn root(&self) -> [u8; 32] {
        self.root
    }

    /// Number of batches forged so far.
    pub fn batch_index(&self) -> u64 {
        self.batch_index
    }

    pub fn event_count(&self) -> u64 {
        self.events.len() as u64
    }

    /// Plain deposit into the account owned by the rollup key `(x, y)`.
    pub fn deposit(
        &mut self,
        pubkey_x: FieldElement,
        pubkey_y: FieldElement,
        amount: u64,
    ) -> Result<DepositEvent, SettlementError> {
        let address = point_address(pubkey_x, pubkey_y)?;
        self.record_deposit(address, amount, BalanceKind::Plain)
    }

    /// Deposit whose account, if fresh, is created with an encrypted balance.
    pub fn deposit_confidential(
        &mut self,
        pubkey_x: FieldElement,
        pubkey_y: FieldElement,
        amount: u64,
    ) -> Result<DepositEvent, SettlementError> {
        let address = point_address(pubkey_x, pubkey_y)?;
        self.record_deposit(address, amount, BalanceKind::Encrypted)
    }

    /// Deposit authorized by a settlement-curve signature over `request`.
    pub fn deposit_authorized(
        &mut self,
        depositor: &SettlementPublicKey,
        request: &DepositRequest,
        signature: &[u8],
    ) -> Result<DepositEvent, SettlementError> {
        if !request.signature_valid(depositor, signature) {
            warn!("deposit signature rejected");
            return Err(SettlementError::Unauthorized(
                "bad depositor signature".to_string(),
            ));
        }
        request
            .address
            .public_key()
            .map_err(|e| SettlementError::InvalidDeposit(format!("address: {e}")))?;

        let key = depositor.to_bytes();
        let expected = self.deposit_nonces.get(&key).copied().unwrap_or(0);
        if request.nonce != expected {
            return Err(SettlementError::InvalidDeposit(format!(
                "request nonce {} (expected {expected})",
                request.nonce
            )));
        }

        let event = self.record_deposit(request.address, request.amount, request.kind)?;
        self.deposit_nonces.insert(key, expected + 1);
        Ok(event)
    }

    fn record_deposit(
        &mut self,
        address: Address,
        amount: u64,
        kind: BalanceKind,
    ) -> Result<DepositEvent, SettlementError> {
        if amount == 0 {
            return Err(SettlementError::InvalidDeposit("zero amount".to_string()));
        }
        let event = DepositEvent {
            address,
            amount,
            kind,
            l1_seq: self.events.len() as u64,
        };
        self.events.push(SettlementEvent::Deposit(event));
        info!(l1_seq = event.l1_seq, %address, amount, ?kind, "deposit recorded");
        Ok(event)
    }

    /// Check-and-set of the root. On any error nothing changes.
    pub fn forge(
        &mut self,
        proof: &Proof,
        public_inputs: &BatchPublicInputs,
    ) -> Result<ForgeReceipt, SettlementError> {
        if public_inputs.prev_root != self.root {
            warn!(
                current = %hex::encode(self.root),
                submitted = %hex::encode(public_inputs.prev_root),
                "forge rejected: stale root"
            );
            return Err(SettlementError::StaleRoot {
                current: hex::encode(self.root),
                submitted: hex::encode(public_inputs.prev_root),
            });
        }

        let credited = self.check_deposits(public_inputs)?;

        let claim = PublicInputs::Batch(public_inputs.clone());
        if !self.verifier.verify(CircuitId::Batch, &claim, proof) {
            warn!(batch_index = self.batch_index + 1, "forge rejected: proof does not verify");
            return Err(SettlementError::VerificationFailed);
        }

        self.root = public_inputs.new_root;
        self.batch_index += 1;
        self.credited_deposits.extend(credited);
        let event_seq = self.events.len() as u64;
        self.events.push(SettlementEvent::Forged {
            batch_index: self.batch_index,
            prev_root: public_inputs.prev_root,
            new_root: public_inputs.new_root,
        });

        info!(
            batch_index = self.batch_index,
            tx_count = public_inputs.transactions.len(),
            new_root = %hex::encode(self.root),
            "batch forged"
        );
        Ok(ForgeReceipt {
            batch_index: self.batch_index,
            new_root: self.root,
            event_seq,
        })
    }

    /// Every deposit a batch credits must be a recorded event, match it
    /// field for field and not have been credited before. Returns the log
    /// positions the batch credits.
    fn check_deposits(&self, public_inputs: &BatchPublicInputs) -> Result<Vec<u64>, SettlementError> {
        let mut credited = Vec::new();
        for tx in &public_inputs.transactions {
            let PublicTransaction::Deposit {
                address,
                amount,
                kind,
                l1_seq,
            } = tx
            else {
                continue;
            };

            let recorded = usize::try_from(*l1_seq)
                .ok()
                .and_then(|position| self.events.get(position));
            let Some(SettlementEvent::Deposit(event)) = recorded else {
                warn!(l1_seq, "forge rejected: unknown deposit");
                return Err(SettlementError::DepositMismatch(format!(
                    "no deposit recorded at {l1_seq}"
                )));
            };
            if event.address != *address || event.amount != *amount || event.kind != *kind {
                warn!(l1_seq, "forge rejected: deposit differs from the log");
                return Err(SettlementError::DepositMismatch(format!(
                    "deposit {l1_seq} differs from the recorded event"
                )));
            }
            if self.credited_deposits.contains(l1_seq) || credited.contains(l1_seq) {
                warn!(l1_seq, "forge rejected: deposit credited twice");
                return Err(SettlementError::DepositMismatch(format!(
                    "deposit {l1_seq} already credited"
                )));
            }
            credited.push(*l1_seq);
        }
        Ok(credited)
    }

    /// Events with sequence number `>= cursor`, in acceptance order.
    pub fn events_since(&self, cursor: u64) -> Vec<SettlementEvent> {
        let start = (cursor as usize).min(self.events.len());
        self.events[start..].to_vec()
    }

    pub fn deposits_since(&self, cursor: u64) -> Vec<DepositEvent> {
        self.events_since(cursor)
            .into_iter()
            .filter_map(|event| match event {
                SettlementEvent::Deposit(deposit) => Some(deposit),
                SettlementEvent::Forged { .. } => None,
            })
            .collect()
    }
}

fn point_address(x: FieldElement, y: FieldElement) -> Result<Address, SettlementError> {
    Address::from_coordinates(x, y)
        .map_err(|e| SettlementError::InvalidDeposit(format!("pubkey: {e}")))
}

/// Thread-safe handle; every call holds the lock for its whole duration, so
/// each entry point is atomic.
#[derive(Clone)]
pub struct SharedSettlement {
    inner: Arc<Mutex<SettlementContract>>,
}

impl SharedSettlement {
    pub fn new(contract: SettlementContract) -> Self {
        Self {
            inner: Arc::new(Mutex::new(contract)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SettlementContract> {
        // contract state is only assigned after all checks pass
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn root(&self) -> [u8; 32] {
        self.lock().root()
    }

    pub fn batch_index(&self) -> u64 {
        self.lock().batch_index()
    }

    pub fn deposit(
        &self,
        pubkey_x: FieldElement,
        pubkey_y: FieldElement,
        amount: u64,
    ) -> Result<DepositEvent, SettlementError> {
        self.lock().deposit(pubkey_x, pubkey_y, amount)
    }

    pub fn deposit_confidential(
        &self,
        pubkey_x: FieldElement,
        pubkey_y: FieldElement,
        amount: u64,
    ) -> Result<DepositEvent, SettlementError> {
        self.lock().deposit_confidential(pubkey_x, pubkey_y, amount)
    }

    pub fn deposit_authorized(
        &self,
        depositor: &SettlementPublicKey,
        request: &DepositRequest,
        signature: &[u8],
    ) -> Result<DepositEvent, SettlementError> {
        self.lock().deposit_authorized(depositor, request, signature)
    }

    pub fn forge(
        &self,
        proof: &Proof,
        public_inputs: &BatchPublicInputs,
    ) -> Result<ForgeReceipt, SettlementError> {
        self.lock().forge(proof, public_inputs)
    }

    pub fn events_since(&self, cursor: u64) -> Vec<SettlementEvent> {
        self.lock().events_since(cursor)
    }

    pub fn deposits_since(&self, cursor: u64) -> Vec<DepositEvent> {
        self.lock().deposits_since(cursor)
    }

    pub fn event_count(&self) -> u64 {
        self.lock().event_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::rand::{SeedableRng, rngs::StdRng};
    use kestrel_crypto::{RollupSecretKey, empty_root};
    use kestrel_keypair::Keypair;
    use kestrel_prover::{BatchWitness, MockProver, PrivateWitness, PublicTransaction};

    // concrete CryptoRng (ark_std::test_rng returns an opaque `impl Rng`),
    // seeded like ark_std's deterministic test rng
    fn test_rng() -> StdRng {
        StdRng::from_seed([
            1, 0, 0, 0, 23, 0, 0, 0, 200, 1, 0, 0, 210, 30, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            0, 0, 0, 0, 0,
        ])
    }

    fn contract() -> SettlementContract {
        SettlementContract::new(empty_root(4), Arc::new(MockProver::new()))
    }

    fn coordinates(rng: &mut impl ark_std::rand::Rng) -> (FieldElement, FieldElement, Address) {
        let key = RollupSecretKey::random(rng);
        let address = Address::from_public_key(&key.public_key());
        let (x, y) = address.coordinates().unwrap();
        (x, y, address)
    }

    fn proven(prev_root: [u8; 32], new_root: [u8; 32]) -> (Proof, BatchPublicInputs) {
        proven_with(prev_root, new_root, vec![])
    }

    fn proven_with(
        prev_root: [u8; 32],
        new_root: [u8; 32],
        transactions: Vec<PublicTransaction>,
    ) -> (Proof, BatchPublicInputs) {
        let public = BatchPublicInputs {
            prev_root,
            new_root,
            transactions,
        };
        let proof = MockProver::new()
            .prove(
                CircuitId::Batch,
                &PublicInputs::Batch(public.clone()),
                &PrivateWitness::Batch(BatchWitness::default()),
            )
            .unwrap();
        (proof, public)
    }

    #[test]
    fn test_deposit_does_not_touch_root() {
        let mut rng = test_rng();
        let mut contract = contract();
        let root = contract.root();
        let (x, y, address) = coordinates(&mut rng);

        let first = contract.deposit(x, y, 100).unwrap();
        let second = contract.deposit_confidential(x, y, 5).unwrap();

        assert_eq!(contract.root(), root);
        assert_eq!(first.address, address);
        assert_eq!((first.l1_seq, second.l1_seq), (0, 1));
        assert_eq!(second.kind, BalanceKind::Encrypted);
        assert_eq!(contract.deposits_since(1), vec![second]);
    }

    #[test]
    fn test_deposit_rejects_bad_point_and_zero_amount() {
        let mut rng = test_rng();
        let mut contract = contract();
        let (x, y, _) = coordinates(&mut rng);

        let err = contract.deposit(x, y + FieldElement::from(1u64), 10).unwrap_err();
        assert!(matches!(err, SettlementError::InvalidDeposit(_)));
        let err = contract.deposit(x, y, 0).unwrap_err();
        assert!(matches!(err, SettlementError::InvalidDeposit(_)));
        assert_eq!(contract.event_count(), 0);
    }

    #[test]
    fn test_authorized_deposit() {
        let mut rng = test_rng();
        let mut contract = contract();
        let wallet = Keypair::generate(&mut rng);

        let (request, signature) = wallet.sign_deposit(wallet.address(), 50, BalanceKind::Plain, 0);
        let event = contract
            .deposit_authorized(&wallet.settlement_public_key(), &request, &signature)
            .unwrap();
        assert_eq!(event.amount, 50);

        // replay of the same request
        let err = contract
            .deposit_authorized(&wallet.settlement_public_key(), &request, &signature)
            .unwrap_err();
        assert!(matches!(err, SettlementError::InvalidDeposit(_)));

        // signature by someone else
        let intruder = Keypair::generate(&mut rng);
        let (request, signature) = intruder.sign_deposit(wallet.address(), 50, BalanceKind::Plain, 1);
        let err = contract
            .deposit_authorized(&wallet.settlement_public_key(), &request, &signature)
            .unwrap_err();
        assert!(matches!(err, SettlementError::Unauthorized(_)));
        assert_eq!(contract.event_count(), 1);
    }

    #[test]
    fn test_forge_twice_is_stale() {
        let mut contract = contract();
        let genesis = contract.root();
        let (proof, public) = proven(genesis, [9u8; 32]);

        let receipt = contract.forge(&proof, &public).unwrap();
        assert_eq!(receipt.batch_index, 1);
        assert_eq!(contract.root(), [9u8; 32]);

        let err = contract.forge(&proof, &public).unwrap_err();
        assert!(matches!(err, SettlementError::StaleRoot { .. }));
        assert_eq!(contract.root(), [9u8; 32]);
        assert_eq!(contract.batch_index(), 1);
    }

    #[test]
    fn test_forge_rejects_unverified_claim() {
        let mut contract = contract();
        let genesis = contract.root();
        let (proof, mut public) = proven(genesis, [9u8; 32]);
        public.new_root = [8u8; 32];

        assert_eq!(contract.forge(&proof, &public), Err(SettlementError::VerificationFailed));

        // added transaction not covered by the proof
        let (proof, mut public) = proven(genesis, [9u8; 32]);
        public.transactions.push(PublicTransaction::Transfer {
            sender: Address([0u8; 32]),
            recipient: Address([0u8; 32]),
            amount: 1,
            nonce: 0,
        });
        assert_eq!(contract.forge(&proof, &public), Err(SettlementError::VerificationFailed));
        assert_eq!(contract.root(), genesis);
        assert!(contract.events_since(0).is_empty());
    }

    #[test]
    fn test_forge_credits_each_recorded_deposit_once() {
        let mut rng = test_rng();
        let mut contract = contract();
        let (x, y, address) = coordinates(&mut rng);
        let event = contract.deposit(x, y, 40).unwrap();
        let credit = |amount, l1_seq| PublicTransaction::Deposit {
            address,
            amount,
            kind: BalanceKind::Plain,
            l1_seq,
        };
        let genesis = contract.root();

        // never deposited
        let (proof, public) = proven_with(genesis, [1u8; 32], vec![credit(40, 7)]);
        assert!(matches!(
            contract.forge(&proof, &public),
            Err(SettlementError::DepositMismatch(_))
        ));

        // inflated amount
        let (proof, public) = proven_with(genesis, [1u8; 32], vec![credit(400, event.l1_seq)]);
        assert!(matches!(
            contract.forge(&proof, &public),
            Err(SettlementError::DepositMismatch(_))
        ));

        // credited twice in one batch
        let twice = vec![credit(40, event.l1_seq), credit(40, event.l1_seq)];
        let (proof, public) = proven_with(genesis, [1u8; 32], twice);
        assert!(matches!(
            contract.forge(&proof, &public),
            Err(SettlementError::DepositMismatch(_))
        ));
        assert_eq!(contract.root(), genesis);

        let (proof, public) = proven_with(genesis, [1u8; 32], vec![credit(40, event.l1_seq)]);
        contract.forge(&proof, &public).unwrap();

        // and again in a later batch
        let (proof, public) = proven_with([1u8; 32], [2u8; 32], vec![credit(40, event.l1_seq)]);
        assert!(matches!(
            contract.forge(&proof, &public),
            Err(SettlementError::DepositMismatch(_))
        ));
        assert_eq!(contract.root(), [1u8; 32]);
        assert_eq!(contract.batch_index(), 1);
    }

    #[test]
    fn test_forged_event_in_log() {
        let mut rng = test_rng();
        let mut contract = contract();
        let (x, y, _) = coordinates(&mut rng);
        contract.deposit(x, y, 1).unwrap();

        let (proof, public) = proven(contract.root(), [3u8; 32]);
        let receipt = contract.forge(&proof, &public).unwrap();
        assert_eq!(receipt.event_seq, 1);
        assert!(matches!(
            contract.events_since(1).as_slice(),
            [SettlementEvent::Forged { batch_index: 1, .. }]
        ));
        assert!(contract.deposits_since(1).is_empty());
        assert!(contract.events_since(99).is_empty());
    }

    #[test]
    fn test_concurrent_forges_on_same_root_one_wins() {
        let shared = SharedSettlement::new(contract());
        let genesis = shared.root();

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    let (proof, public) = proven(genesis, [i + 1; 32]);
                    shared.forge(&proof, &public)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, SettlementError::StaleRoot { .. })));
        assert_eq!(shared.batch_index(), 1);
    }
}
