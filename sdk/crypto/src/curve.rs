//! The two curve groups.
//!
//! Jubjub carries rollup keys and encrypted balances; its base field is the
//! Poseidon field, so points hash without conversion. BN254 G1 carries
//! settlement-layer keys.

use ark_ec::AffineRepr;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};

use crate::error::CryptoError;
use crate::field::FieldElement;

pub type RollupCurve = ark_ed_on_bls12_381::EdwardsProjective;
pub type RollupAffine = ark_ed_on_bls12_381::EdwardsAffine;
pub type RollupScalar = ark_ed_on_bls12_381::Fr;

pub type SettlementCurve = ark_bn254::G1Projective;
pub type SettlementAffine = ark_bn254::G1Affine;
pub type SettlementScalar = ark_bn254::Fr;

/// Compressed encoding of any arkworks value.
pub fn to_compressed<T: CanonicalSerialize>(value: &T) -> Vec<u8> {
    let mut buf = Vec::with_capacity(value.compressed_size());
    value
        .serialize_compressed(&mut buf)
        .expect("Serialization should not fail");
    buf
}

pub fn encode_rollup_point(point: &RollupAffine) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&to_compressed(point));
    out
}

/// Decompress and check curve and subgroup membership.
pub fn decode_rollup_point(bytes: &[u8; 32]) -> Result<RollupAffine, CryptoError> {
    RollupAffine::deserialize_compressed(&bytes[..]).map_err(|_| CryptoError::InvalidPoint)
}

pub fn rollup_point_from_coordinates(
    x: FieldElement,
    y: FieldElement,
) -> Result<RollupAffine, CryptoError> {
    let point = RollupAffine::new_unchecked(x, y);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(CryptoError::NotOnCurve {
            x: x.to_string(),
            y: y.to_string(),
        });
    }
    Ok(point)
}

pub fn rollup_coordinates(point: &RollupAffine) -> (FieldElement, FieldElement) {
    (point.x, point.y)
}

pub fn rollup_generator() -> RollupAffine {
    RollupAffine::generator()
}
