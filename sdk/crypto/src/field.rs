//! Scalar field and Poseidon hashing
//!
//! Every commitment in the rollup (leaf hashes, tree nodes, roots) lives in
//! the BLS12-381 scalar field, which is also the base field of Jubjub. That
//! lets account public keys and ciphertext coordinates be absorbed directly.

use std::sync::LazyLock;

use ark_crypto_primitives::sponge::{
    CryptographicSponge,
    poseidon::{PoseidonConfig, PoseidonSponge, find_poseidon_ark_and_mds},
};
use ark_ff::{BigInteger, PrimeField};

pub type FieldElement = ark_ed_on_bls12_381::Fq;

/// Hash of an unoccupied tree slot (the zero field element).
pub const EMPTY_LEAF: [u8; 32] = [0u8; 32];

static POSEIDON: LazyLock<PoseidonConfig<FieldElement>> = LazyLock::new(poseidon_config);

/// Width-3 Poseidon, alpha = 5, 8 full and 57 partial rounds.
fn poseidon_config() -> PoseidonConfig<FieldElement> {
    let (ark, mds) = find_poseidon_ark_and_mds::<FieldElement>(255, 2, 8, 57, 0);
    PoseidonConfig::new(8, 57, 5, mds, ark, 2, 1)
}

pub fn fe_to_bytes(value: &FieldElement) -> [u8; 32] {
    let bytes = value.into_bigint().to_bytes_le();
    let mut arr = [0u8; 32];
    arr[..bytes.len()].copy_from_slice(&bytes);
    arr
}

pub fn fe_from_bytes(bytes: &[u8; 32]) -> FieldElement {
    FieldElement::from_le_bytes_mod_order(bytes)
}

/// Absorb `inputs` in order and squeeze one element.
pub fn poseidon(inputs: &[FieldElement]) -> FieldElement {
    let mut sponge = PoseidonSponge::new(&*POSEIDON);
    for input in inputs {
        sponge.absorb(input);
    }
    sponge.squeeze_field_elements::<FieldElement>(1)[0]
}

/// Parent node of two children.
pub fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let out = poseidon(&[fe_from_bytes(left), fe_from_bytes(right)]);
    fe_to_bytes(&out)
}
