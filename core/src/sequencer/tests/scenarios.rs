use ark_std::test_rng;

use kestrel_keypair::Keypair;
use kestrel_prover::{CircuitId, PrivateWitness, PublicInputs, PublicTransaction};
use kestrel_settlement::SettlementError;
use kestrel_transaction::ValidationError;

use super::Harness;
use crate::sequencer::execution::SubmitError;

#[tokio::test]
async fn transfer_updates_both_leaves() {
    let mut rng = test_rng();
    let alice = Keypair::generate(&mut rng);
    let bob = Keypair::generate(&mut rng);
    let mut h = Harness::new();

    h.deposit(&alice, 100);
    assert_eq!(h.settle().await, Some(0));
    let prev_root = h.root().await;

    h.submit(alice.transfer(bob.address(), 30, 0)).await.unwrap();
    assert_eq!(h.settle().await, Some(1));

    let a = h.account(alice.address()).await.unwrap();
    let b = h.account(bob.address()).await.unwrap();
    assert_eq!((a.plain_balance(), a.nonce), (Some(70), 1));
    assert_eq!((b.plain_balance(), b.nonce), (Some(30), 0));

    let new_root = h.root().await;
    assert_ne!(new_root, prev_root);
    assert_eq!(h.contract.root(), new_root);

    let proof = h
        .orchestrator
        .batch_manager()
        .lock()
        .await
        .get_merkle_proof(&alice.address())
        .unwrap();
    assert!(proof.verify(&a.leaf_hash().unwrap(), &new_root));
    assert!(!proof.verify(&a.leaf_hash().unwrap(), &prev_root));
}

#[tokio::test]
async fn overspend_never_reaches_the_prover() {
    let mut rng = test_rng();
    let alice = Keypair::generate(&mut rng);
    let bob = Keypair::generate(&mut rng);
    let mut h = Harness::new();

    h.deposit(&alice, 100);
    h.settle().await.unwrap();

    assert_eq!(
        h.submit(alice.transfer(bob.address(), 150, 0)).await,
        Err(SubmitError::Rejected(ValidationError::InsufficientBalance {
            available: 100,
            required: 150
        }))
    );

    // each passes admission on its own; together they overspend
    h.submit(alice.transfer(bob.address(), 60, 0)).await.unwrap();
    h.submit(alice.transfer(bob.address(), 60, 1)).await.unwrap();

    let manager = h.orchestrator.batch_manager();
    let sealed = manager.lock().await.build_batch().unwrap().unwrap();
    assert_eq!(sealed.tx_count(), 1);
    assert_eq!(sealed.rejected.len(), 1);
    assert_eq!(
        sealed.rejected[0].error,
        ValidationError::InsufficientBalance {
            available: 40,
            required: 60
        }
    );
    assert!(matches!(
        sealed.public_inputs.transactions[..],
        [PublicTransaction::Transfer { amount: 60, nonce: 0, .. }]
    ));
    manager.lock().await.discard(sealed, None).unwrap();

    assert_eq!(h.settle().await, Some(1));
    let stats = h.orchestrator.stats().await;
    assert_eq!(stats.batch_stats.rejected_txs, 1);
    assert_eq!(stats.batch_stats.pending_txs, 0);
    assert_eq!(
        h.account(alice.address()).await.unwrap().plain_balance(),
        Some(40)
    );
}

#[tokio::test]
async fn repeated_forge_is_stale() {
    let mut rng = test_rng();
    let alice = Keypair::generate(&mut rng);
    let mut h = Harness::new();

    h.deposit(&alice, 10);
    // below the seal thresholds, so this only ingests
    assert_eq!(h.orchestrator.tick(false).await.unwrap(), None);
    let sealed = h
        .orchestrator
        .batch_manager()
        .lock()
        .await
        .build_batch()
        .unwrap()
        .unwrap();

    let proof = h
        .backend
        .prove(
            CircuitId::Batch,
            &PublicInputs::Batch(sealed.public_inputs.clone()),
            &PrivateWitness::Batch(sealed.witness.clone()),
        )
        .unwrap();

    let receipt = h.contract.forge(&proof, &sealed.public_inputs).unwrap();
    assert_eq!(receipt.new_root, sealed.new_root);
    assert_eq!(h.contract.root(), sealed.new_root);

    let again = h.contract.forge(&proof, &sealed.public_inputs);
    assert!(matches!(again, Err(SettlementError::StaleRoot { .. })));
    assert_eq!(h.contract.batch_index(), 1);
}

#[tokio::test]
async fn deposit_to_fresh_address_is_an_append() {
    let mut rng = test_rng();
    let funded = Keypair::generate(&mut rng);
    let fresh = Keypair::generate(&mut rng);
    let mut h = Harness::new();

    h.deposit(&funded, 5);
    h.settle().await.unwrap();

    h.deposit(&fresh, 50);
    assert_eq!(h.orchestrator.tick(false).await.unwrap(), None);
    let manager = h.orchestrator.batch_manager();
    let sealed = manager.lock().await.build_batch().unwrap().unwrap();

    let change = &sealed.witness.steps[0].changes[0];
    assert_eq!(change.index, 1);
    assert_eq!(change.before, None);
    assert_eq!(change.after.nonce, 0);
    assert_eq!(change.after.plain_balance(), Some(50));
    manager.lock().await.discard(sealed, None).unwrap();

    assert_eq!(h.settle().await, Some(1));
    let account = h.account(fresh.address()).await.unwrap();
    assert_eq!((account.plain_balance(), account.nonce), (Some(50), 0));
    assert_eq!(h.orchestrator.stats().await.batch_stats.accounts, 2);
}
