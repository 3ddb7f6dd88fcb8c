use std::collections::HashMap;

use kestrel_account::Address;
use kestrel_crypto::EMPTY_LEAF;
use kestrel_transaction::{Transaction, apply, touched_addresses, verify_authorization};

use crate::error::ProofError;
use crate::inputs::{BatchPublicInputs, ConfidentialStatement, Proof, PublicInputs, CircuitId};
use crate::witness::{BatchWitness, LeafChange, StepWitness};

/// Verifies inner confidential-transfer proofs while checking a batch.
pub trait InnerVerifier {
    fn verify_inner(&self, statement: &ConfidentialStatement, proof_bytes: &[u8]) -> bool;
}

impl<T: crate::ProvingBackend + ?Sized> InnerVerifier for T {
    fn verify_inner(&self, statement: &ConfidentialStatement, proof_bytes: &[u8]) -> bool {
        let public_inputs = PublicInputs::ConfidentialTransfer(*statement);
        let proof = Proof {
            circuit: CircuitId::ConfidentialTransfer,
            public_inputs: public_inputs.clone(),
            bytes: proof_bytes.to_vec(),
        };
        self.verify(CircuitId::ConfidentialTransfer, &public_inputs, &proof)
    }
}

/// The batch relation.
///
/// For every step, in order:
/// (a) its authorization is valid under the declared sender key,
/// (b) every pre-state leaf sits on its path under the running root,
/// (b') every post-state is exactly the transition of the pre-states,
/// and (c) folding all leaf updates from `prev_root` ends at `new_root`.
///
/// Within the batch an address keeps one leaf: it is created at most once
/// and never written at a second index. A creation only proves the target
/// slot was empty, not that the address is absent from leaves written by
/// earlier batches; that part rests on the operator's address index.
pub fn check_batch(
    public: &BatchPublicInputs,
    witness: &BatchWitness,
    inner: &dyn InnerVerifier,
) -> Result<(), ProofError> {
    if public.transactions.len() != witness.steps.len() {
        return Err(ProofError::batch(format!(
            "{} public transactions but {} witness steps",
            public.transactions.len(),
            witness.steps.len()
        )));
    }

    let mut root = public.prev_root;
    let mut depth = None;
    let mut placed: HashMap<Address, u64> = HashMap::new();

    for (i, (public_tx, step)) in public.transactions.iter().zip(&witness.steps).enumerate() {
        let tx = public_tx.with_authorization(&step.authorization, i)?;
        check_authorization(&tx, step, inner, i)?;
        check_transition(&tx, step, i)?;

        for change in &step.changes {
            let path_depth = *depth.get_or_insert(change.path.depth());
            if change.path.depth() != path_depth || change.path.index != change.index {
                return Err(ProofError::at(i, "path shape differs from the tree"));
            }
            check_placement(&mut placed, change, i)?;
            root = fold_change(root, change, i)?;
        }
    }

    if root != public.new_root {
        return Err(ProofError::batch("folded root does not equal new_root"));
    }
    Ok(())
}

fn check_authorization(
    tx: &Transaction,
    step: &StepWitness,
    inner: &dyn InnerVerifier,
    i: usize,
) -> Result<(), ProofError> {
    verify_authorization(tx).map_err(|e| ProofError::at(i, e.to_string()))?;

    if let Transaction::ConfidentialTransfer(transfer) = tx {
        let sender_before = step
            .changes
            .first()
            .and_then(|c| c.before.as_ref())
            .and_then(|a| a.encrypted_balance().copied())
            .ok_or_else(|| ProofError::at(i, "confidential sender has no encrypted pre-state"))?;
        let statement = ConfidentialStatement::for_transfer(transfer, sender_before);
        if !inner.verify_inner(&statement, &transfer.proof_of_well_formedness) {
            return Err(ProofError::at(i, "well-formedness proof rejected"));
        }
    }
    Ok(())
}

fn check_transition(tx: &Transaction, step: &StepWitness, i: usize) -> Result<(), ProofError> {
    let touched = touched_addresses(tx);
    if step.changes.len() != touched.len() {
        return Err(ProofError::at(i, "wrong number of leaf changes"));
    }
    for (change, address) in step.changes.iter().zip(&touched) {
        if change.after.address != *address {
            return Err(ProofError::at(i, "leaf change for an untouched address"));
        }
    }

    let before: Vec<_> = step.changes.iter().map(|c| c.before).collect();
    let expected = apply(tx, &before).map_err(|e| ProofError::at(i, e.to_string()))?;
    let actual: Vec<_> = step.changes.iter().map(|c| c.after).collect();
    if expected != actual {
        return Err(ProofError::at(i, "post-state does not follow from pre-state"));
    }
    Ok(())
}

fn check_placement(
    placed: &mut HashMap<Address, u64>,
    change: &LeafChange,
    i: usize,
) -> Result<(), ProofError> {
    let address = change.after.address;
    if let Some(index) = placed.get(&address) {
        if *index != change.index {
            return Err(ProofError::at(i, "address written at a second leaf"));
        }
        if change.before.is_none() {
            return Err(ProofError::at(i, "address created twice"));
        }
    }
    placed.insert(address, change.index);
    Ok(())
}

fn fold_change(root: [u8; 32], change: &LeafChange, i: usize) -> Result<[u8; 32], ProofError> {
    let leaf = |account: Option<&kestrel_account::Account>| match account {
        Some(a) => a.leaf_hash().map_err(|e| ProofError::at(i, format!("leaf hash: {e}"))),
        None => Ok(EMPTY_LEAF),
    };

    let before_leaf = leaf(change.before.as_ref())?;
    if !change.path.verify(&before_leaf, &root) {
        return Err(ProofError::at(
            i,
            format!("pre-state of leaf {} is not under the running root", change.index),
        ));
    }
    let after_leaf = leaf(Some(&change.after))?;
    Ok(change.path.compute_root(&after_leaf))
}
