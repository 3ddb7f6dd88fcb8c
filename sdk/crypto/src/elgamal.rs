//! Additively homomorphic balances (twisted ElGamal on Jubjub)
//!
//! ```text
//!   enc(PK, m, r) = (m·G + r·PK,  r·G)        = (left, right)
//!   enc(a) + enc(b) = enc(a + b)               componentwise
//!   dec(sk, C)    : m·G = left − sk·right, then a bounded discrete log
//! ```
//!
//! Ciphertexts travel as compressed point bytes so they can sit inside
//! serialized transactions and leaves; arithmetic decodes on demand.

use std::collections::HashMap;

use ark_ec::{AffineRepr, CurveGroup, PrimeGroup};
use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

use crate::curve::{
    RollupAffine, RollupCurve, RollupScalar, decode_rollup_point, encode_rollup_point,
};
use crate::error::CryptoError;
use crate::signature::{RollupPublicKey, RollupSecretKey};

/// Plaintexts up to 2^32 decrypt with a 2^16-entry baby-step table.
pub const DEFAULT_DECRYPT_BOUND: u64 = 1 << 32;

/// Largest accepted search bound. Keeps the baby-step table at 2^20 points.
pub const MAX_DECRYPT_BOUND: u64 = 1 << 40;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, SchemaWrite, SchemaRead,
)]
pub struct EncryptedBalance {
    pub left: [u8; 32],
    pub right: [u8; 32],
}

impl EncryptedBalance {
    /// Encryption of zero with zero randomness.
    pub fn zero() -> Self {
        let identity = encode_rollup_point(&RollupAffine::zero());
        Self {
            left: identity,
            right: identity,
        }
    }

    /// Publicly known encryption of `amount` (randomness zero). Used to
    /// credit plaintext deposits and transfers into an encrypted account.
    pub fn trivial(amount: u64) -> Self {
        let left = (RollupCurve::generator() * RollupScalar::from(amount)).into_affine();
        Self::from_points(left, RollupAffine::zero())
    }

    pub fn encrypt(public_key: &RollupPublicKey, amount: u64, randomness: &RollupScalar) -> Self {
        let g = RollupCurve::generator();
        let left = g * RollupScalar::from(amount) + *public_key.as_affine() * *randomness;
        let right = g * *randomness;
        Self::from_points(left.into_affine(), right.into_affine())
    }

    pub fn from_points(left: RollupAffine, right: RollupAffine) -> Self {
        Self {
            left: encode_rollup_point(&left),
            right: encode_rollup_point(&right),
        }
    }

    pub fn points(&self) -> Result<(RollupAffine, RollupAffine), CryptoError> {
        Ok((decode_rollup_point(&self.left)?, decode_rollup_point(&self.right)?))
    }

    pub fn add(&self, other: &Self) -> Result<Self, CryptoError> {
        let (l1, r1) = self.points()?;
        let (l2, r2) = other.points()?;
        Ok(Self::from_points((l1 + l2).into_affine(), (r1 + r2).into_affine()))
    }

    pub fn sub(&self, other: &Self) -> Result<Self, CryptoError> {
        let (l1, r1) = self.points()?;
        let (l2, r2) = other.points()?;
        Ok(Self::from_points(
            (l1.into_group() - l2).into_affine(),
            (r1.into_group() - r2).into_affine(),
        ))
    }

    /// `amount·G` as seen by the key holder.
    fn message_point(&self, secret_key: &RollupSecretKey) -> Result<RollupCurve, CryptoError> {
        let (left, right) = self.points()?;
        Ok(left.into_group() - right * secret_key.scalar())
    }

    /// Whether this ciphertext decrypts to exactly `amount`.
    pub fn opens_to(&self, secret_key: &RollupSecretKey, amount: u64) -> Result<bool, CryptoError> {
        let m = self.message_point(secret_key)?;
        Ok(m == RollupCurve::generator() * RollupScalar::from(amount))
    }

    /// Whether this is `enc(public_key, amount, randomness)`.
    pub fn is_encryption_of(
        &self,
        public_key: &RollupPublicKey,
        amount: u64,
        randomness: &RollupScalar,
    ) -> bool {
        *self == Self::encrypt(public_key, amount, randomness)
    }

    /// Baby-step giant-step search over `[0, bound)`. Bounds above
    /// [`MAX_DECRYPT_BOUND`] are refused before anything is allocated.
    pub fn decrypt(&self, secret_key: &RollupSecretKey, bound: u64) -> Result<u64, CryptoError> {
        if bound > MAX_DECRYPT_BOUND {
            return Err(CryptoError::DecryptionBoundTooLarge {
                bound,
                max: MAX_DECRYPT_BOUND,
            });
        }
        let target = self.message_point(secret_key)?;
        let step = (bound as f64).sqrt().ceil().max(1.0) as u64;

        let g = RollupCurve::generator();
        let mut baby = Vec::with_capacity(step as usize);
        let mut acc = RollupCurve::default();
        for _ in 0..step {
            baby.push(acc);
            acc += g;
        }
        let table: HashMap<RollupAffine, u64> = RollupCurve::normalize_batch(&baby)
            .into_iter()
            .enumerate()
            .map(|(j, p)| (p, j as u64))
            .collect();

        let giant = g * RollupScalar::from(step);
        let mut current = target;
        for i in 0..step {
            if let Some(j) = table.get(&current.into_affine()) {
                let value = i * step + j;
                if value < bound {
                    return Ok(value);
                }
                break;
            }
            current -= giant;
        }
        Err(CryptoError::DecryptionOutOfRange { bound })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::{UniformRand, test_rng};

    const SMALL_BOUND: u64 = 1 << 16;

    #[test]
    fn test_encrypt_decrypt() {
        let mut rng = test_rng();
        let sk = RollupSecretKey::random(&mut rng);
        let r = RollupScalar::rand(&mut rng);

        let ct = EncryptedBalance::encrypt(&sk.public_key(), 1234, &r);
        assert_eq!(ct.decrypt(&sk, SMALL_BOUND).unwrap(), 1234);
        assert!(ct.opens_to(&sk, 1234).unwrap());
        assert!(!ct.opens_to(&sk, 1235).unwrap());
        assert!(ct.is_encryption_of(&sk.public_key(), 1234, &r));
    }

    #[test]
    fn test_homomorphic_addition() {
        let mut rng = test_rng();
        let sk = RollupSecretKey::random(&mut rng);
        let pk = sk.public_key();

        let a = EncryptedBalance::encrypt(&pk, 700, &RollupScalar::rand(&mut rng));
        let b = EncryptedBalance::encrypt(&pk, 45, &RollupScalar::rand(&mut rng));
        let sum = a.add(&b).unwrap();
        assert_eq!(sum.decrypt(&sk, SMALL_BOUND).unwrap(), 745);

        let diff = sum.sub(&b).unwrap();
        assert_eq!(diff.decrypt(&sk, SMALL_BOUND).unwrap(), 700);
    }

    #[test]
    fn test_trivial_and_zero() {
        let mut rng = test_rng();
        let sk = RollupSecretKey::random(&mut rng);

        assert_eq!(EncryptedBalance::zero().decrypt(&sk, SMALL_BOUND).unwrap(), 0);
        let credited = EncryptedBalance::zero().add(&EncryptedBalance::trivial(50)).unwrap();
        assert_eq!(credited.decrypt(&sk, SMALL_BOUND).unwrap(), 50);
    }

    #[test]
    fn test_decrypt_out_of_bound() {
        let mut rng = test_rng();
        let sk = RollupSecretKey::random(&mut rng);
        let ct = EncryptedBalance::encrypt(&sk.public_key(), 5000, &RollupScalar::rand(&mut rng));
        assert_eq!(
            ct.decrypt(&sk, 1000),
            Err(CryptoError::DecryptionOutOfRange { bound: 1000 })
        );
    }

    #[test]
    fn test_decrypt_bound_is_capped() {
        let mut rng = test_rng();
        let sk = RollupSecretKey::random(&mut rng);
        let ct = EncryptedBalance::encrypt(&sk.public_key(), 7, &RollupScalar::rand(&mut rng));
        assert_eq!(
            ct.decrypt(&sk, u64::MAX),
            Err(CryptoError::DecryptionBoundTooLarge {
                bound: u64::MAX,
                max: MAX_DECRYPT_BOUND
            })
        );
        assert_eq!(ct.decrypt(&sk, DEFAULT_DECRYPT_BOUND).unwrap(), 7);
    }

    #[test]
    fn test_wrong_key_does_not_open() {
        let mut rng = test_rng();
        let owner = RollupSecretKey::random(&mut rng);
        let other = RollupSecretKey::random(&mut rng);
        let ct = EncryptedBalance::encrypt(&owner.public_key(), 9, &RollupScalar::rand(&mut rng));
        assert!(!ct.opens_to(&other, 9).unwrap());
    }
}
