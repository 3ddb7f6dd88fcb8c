//! The proving capability and the binding tag both local backends share.

use crate::error::ProofError;
use crate::inputs::{CircuitId, Proof, PublicInputs};
use crate::witness::PrivateWitness;

/// An opaque proof system.
///
/// `verify` must be deterministic and binding: a proof made for one set of
/// public inputs never verifies against any other.
pub trait ProvingBackend: Send + Sync {
    fn prove(
        &self,
        circuit: CircuitId,
        public_inputs: &PublicInputs,
        witness: &PrivateWitness,
    ) -> Result<Proof, ProofError>;

    fn verify(&self, circuit: CircuitId, public_inputs: &PublicInputs, proof: &Proof) -> bool;

    /// Identifier a verifier pins to (the settlement contract logs it).
    fn verification_key_hash(&self) -> [u8; 32];
}

/// Keyed BLAKE3 tag over `(circuit, public inputs)`.
#[derive(Clone)]
pub struct ProofMac {
    key: [u8; 32],
}

impl ProofMac {
    pub fn derive(context: &str, seed: &[u8]) -> Self {
        Self {
            key: blake3::derive_key(context, seed),
        }
    }

    pub fn tag(&self, circuit: CircuitId, public_inputs: &PublicInputs) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new_keyed(&self.key);
        hasher.update(circuit.tag());
        hasher.update(&public_inputs.encode());
        hasher.finalize()
    }

    pub fn seal(&self, circuit: CircuitId, public_inputs: &PublicInputs) -> Proof {
        Proof {
            circuit,
            public_inputs: public_inputs.clone(),
            bytes: self.tag(circuit, public_inputs).as_bytes().to_vec(),
        }
    }

    /// Circuit, embedded claim and tag must all match.
    pub fn check(&self, circuit: CircuitId, public_inputs: &PublicInputs, proof: &Proof) -> bool {
        if proof.circuit != circuit
            || public_inputs.circuit() != circuit
            || &proof.public_inputs != public_inputs
        {
            return false;
        }
        let Ok(bytes) = <[u8; 32]>::try_from(proof.bytes.as_slice()) else {
            return false;
        };
        // blake3::Hash equality is constant time
        blake3::Hash::from(bytes) == self.tag(circuit, public_inputs)
    }

    pub fn key_hash(&self) -> [u8; 32] {
        *blake3::hash(&self.key).as_bytes()
    }
}

/// Proves anything it is handed; only the binding tag is real.
///
/// Useful for exercising the pipeline without paying for relation checks.
pub struct MockProver {
    mac: ProofMac,
    /// Simulated proving time in ms
    prove_time_ms: u64,
}

impl MockProver {
    pub fn new() -> Self {
        Self::with_prove_time(0)
    }

    /// Create with custom proving time (for testing)
    pub fn with_prove_time(ms: u64) -> Self {
        Self {
            mac: ProofMac::derive("kestrel mock prover v1", b"kestrel-mock-vk"),
            prove_time_ms: ms,
        }
    }
}

impl Default for MockProver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvingBackend for MockProver {
    fn prove(
        &self,
        circuit: CircuitId,
        public_inputs: &PublicInputs,
        _witness: &PrivateWitness,
    ) -> Result<Proof, ProofError> {
        if public_inputs.circuit() != circuit {
            return Err(ProofError::CircuitMismatch {
                expected: circuit,
                got: public_inputs.circuit(),
            });
        }
        if self.prove_time_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(self.prove_time_ms));
        }
        Ok(self.mac.seal(circuit, public_inputs))
    }

    fn verify(&self, circuit: CircuitId, public_inputs: &PublicInputs, proof: &Proof) -> bool {
        self.mac.check(circuit, public_inputs, proof)
    }

    fn verification_key_hash(&self) -> [u8; 32] {
        self.mac.key_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::BatchPublicInputs;
    use crate::witness::BatchWitness;

    fn inputs() -> PublicInputs {
        PublicInputs::Batch(BatchPublicInputs {
            prev_root: [1u8; 32],
            new_root: [2u8; 32],
            transactions: vec![],
        })
    }

    #[test]
    fn test_mock_prove_verify() {
        let prover = MockProver::new();
        let public = inputs();
        let proof = prover
            .prove(CircuitId::Batch, &public, &PrivateWitness::Batch(BatchWitness::default()))
            .unwrap();

        assert!(prover.verify(CircuitId::Batch, &public, &proof));
        assert!(!prover.verify(CircuitId::ConfidentialTransfer, &public, &proof));
    }

    #[test]
    fn test_every_bit_of_public_inputs_is_bound() {
        let prover = MockProver::new();
        let public = inputs();
        let proof = prover
            .prove(CircuitId::Batch, &public, &PrivateWitness::Batch(BatchWitness::default()))
            .unwrap();

        let PublicInputs::Batch(base) = &public else { unreachable!() };
        for byte in 0..32 {
            for bit in 0..8 {
                let mut tampered = base.clone();
                tampered.prev_root[byte] ^= 1 << bit;
                let tampered = PublicInputs::Batch(tampered);
                assert!(!prover.verify(CircuitId::Batch, &tampered, &proof));

                // even a proof whose embedded claim was rewritten to match
                let mut relabeled = proof.clone();
                relabeled.public_inputs = tampered.clone();
                assert!(!prover.verify(CircuitId::Batch, &tampered, &relabeled));
            }
        }
    }

    #[test]
    fn test_distinct_keys_do_not_cross_verify() {
        let a = ProofMac::derive("ctx", b"a");
        let b = ProofMac::derive("ctx", b"b");
        let public = inputs();
        let proof = a.seal(CircuitId::Batch, &public);
        assert!(a.check(CircuitId::Batch, &public, &proof));
        assert!(!b.check(CircuitId::Batch, &public, &proof));
        assert_ne!(a.key_hash(), b.key_hash());
    }

    #[test]
    fn test_circuit_mismatch_rejected_at_prove() {
        let prover = MockProver::new();
        let err = prover
            .prove(
                CircuitId::ConfidentialTransfer,
                &inputs(),
                &PrivateWitness::Batch(BatchWitness::default()),
            )
            .unwrap_err();
        assert!(matches!(err, ProofError::CircuitMismatch { .. }));
    }
}
