//! Reference backend
//!
//! Checks the full relation in the clear and only then issues a proof. The
//! proof is a keyed tag over the public inputs, so it is binding and
//! deterministic to verify, but it is neither succinct nor zero-knowledge:
//! it stands in for a real proof system behind the same trait.

use crate::backend::{ProofMac, ProvingBackend};
use crate::circuit::{check_batch, check_confidential};
use crate::error::ProofError;
use crate::inputs::{CircuitId, Proof, PublicInputs};
use crate::witness::PrivateWitness;

const MAC_CONTEXT: &str = "kestrel reference backend v1";

pub struct ReferenceBackend {
    mac: ProofMac,
}

impl ReferenceBackend {
    /// Backends built from the same seed share a verification key.
    pub fn new(seed: &[u8]) -> Self {
        Self {
            mac: ProofMac::derive(MAC_CONTEXT, seed),
        }
    }
}

impl Default for ReferenceBackend {
    fn default() -> Self {
        Self::new(b"kestrel-dev")
    }
}

impl ProvingBackend for ReferenceBackend {
    fn prove(
        &self,
        circuit: CircuitId,
        public_inputs: &PublicInputs,
        witness: &PrivateWitness,
    ) -> Result<Proof, ProofError> {
        if public_inputs.circuit() != circuit {
            return Err(ProofError::CircuitMismatch {
                expected: circuit,
                got: public_inputs.circuit(),
            });
        }
        match (public_inputs, witness) {
            (PublicInputs::Batch(public), PrivateWitness::Batch(witness)) => {
                check_batch(public, witness, self)?
            }
            (
                PublicInputs::ConfidentialTransfer(statement),
                PrivateWitness::ConfidentialTransfer(witness),
            ) => check_confidential(statement, witness)?,
            _ => {
                return Err(ProofError::ProverFailure(
                    "witness kind does not match circuit".to_string(),
                ));
            }
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
