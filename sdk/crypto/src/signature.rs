//! Schnorr signatures over an arbitrary prime-order curve group
//!
//! One implementation serves both layers: [`RollupSignature`] over Jubjub
//! signs rollup transfers, [`SettlementSignature`] over BN254 G1 signs
//! settlement-layer deposit authorizations.
//!
//! ```text
//!   sign:    k = H_nonce(sk, m)        R = k·G
//!            e = H_chal(R, PK, m)      s = k + e·sk
//!   verify:  s·G == R + e·PK
//! ```

use std::fmt;

use ark_ec::{AffineRepr, CurveGroup, PrimeGroup};
use ark_ff::{PrimeField, UniformRand, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use sha2::{Digest, Sha512};

use crate::curve::{RollupCurve, SettlementCurve, to_compressed};
use crate::error::CryptoError;

const NONCE_DOMAIN: &[u8] = b"kestrel/schnorr/nonce/v1";
const CHALLENGE_DOMAIN: &[u8] = b"kestrel/schnorr/challenge/v1";

pub type RollupSecretKey = SecretKey<RollupCurve>;
pub type RollupPublicKey = PublicKey<RollupCurve>;
pub type RollupSignature = Signature<RollupCurve>;

pub type SettlementSecretKey = SecretKey<SettlementCurve>;
pub type SettlementPublicKey = PublicKey<SettlementCurve>;
pub type SettlementSignature = Signature<SettlementCurve>;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SecretKey<C: CurveGroup>(C::ScalarField);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey<C: CurveGroup>(C::Affine);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature<C: CurveGroup> {
    r: C::Affine,
    s: C::ScalarField,
}

impl<C: CurveGroup> SecretKey<C> {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        loop {
            let scalar = C::ScalarField::rand(rng);
            if !scalar.is_zero() {
                return Self(scalar);
            }
        }
    }

    pub fn from_scalar(scalar: C::ScalarField) -> Self {
        Self(scalar)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let scalar = C::ScalarField::deserialize_compressed(bytes)
            .map_err(|_| CryptoError::InvalidScalar)?;
        if scalar.is_zero() {
            return Err(CryptoError::InvalidScalar);
        }
        Ok(Self(scalar))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        to_compressed(&self.0)
    }

    pub fn scalar(&self) -> C::ScalarField {
        self.0
    }

    pub fn public_key(&self) -> PublicKey<C> {
        PublicKey((C::generator() * self.0).into_affine())
    }

    pub fn sign(&self, message: &[u8]) -> Signature<C> {
        let public_key = self.public_key();
        let k = hash_to_scalar::<C::ScalarField>(&[NONCE_DOMAIN, &self.to_bytes(), message]);
        let r = (C::generator() * k).into_affine();
        let e = challenge::<C>(&r, &public_key.0, message);
        Signature { r, s: k + e * self.0 }
    }
}

impl<C: CurveGroup> fmt::Debug for SecretKey<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

impl<C: CurveGroup> PublicKey<C> {
    pub fn from_affine(point: C::Affine) -> Self {
        Self(point)
    }

    pub fn as_affine(&self) -> &C::Affine {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let point =
            C::Affine::deserialize_compressed(bytes).map_err(|_| CryptoError::InvalidPoint)?;
        Ok(Self(point))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        to_compressed(&self.0)
    }

    pub fn verify(&self, message: &[u8], signature: &Signature<C>) -> bool {
        if self.0.is_zero() {
            return false;
        }
        let e = challenge::<C>(&signature.r, &self.0, message);
        let lhs = C::generator() * signature.s;
        let rhs = signature.r.into_group() + self.0 * e;
        lhs == rhs
    }
}

impl<C: CurveGroup> Signature<C> {
    /// Compressed `R` followed by compressed `s`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = to_compressed(&self.r);
        out.extend_from_slice(&to_compressed(&self.s));
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let expected = Self::encoded_len();
        if bytes.len() != expected {
            return Err(CryptoError::InvalidSignatureLength {
                expected,
                got: bytes.len(),
            });
        }
        let mut reader = bytes;
        let r = C::Affine::deserialize_compressed(&mut reader)
            .map_err(|_| CryptoError::InvalidPoint)?;
        let s = C::ScalarField::deserialize_compressed(&mut reader)
            .map_err(|_| CryptoError::InvalidScalar)?;
        Ok(Self { r, s })
    }

    pub fn encoded_len() -> usize {
        C::Affine::generator().compressed_size() + C::ScalarField::zero().compressed_size()
    }
}

fn challenge<C: CurveGroup>(r: &C::Affine, public_key: &C::Affine, message: &[u8]) -> C::ScalarField {
    hash_to_scalar::<C::ScalarField>(&[
        CHALLENGE_DOMAIN,
        &to_compressed(r),
        &to_compressed(public_key),
        message,
    ])
}

/// SHA-512 over the length-prefixed parts, reduced into the field.
fn hash_to_scalar<F: PrimeField>(parts: &[&[u8]]) -> F {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    F::from_le_bytes_mod_order(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::test_rng;

    #[test]
    fn test_rollup_sign_verify() {
        let mut rng = test_rng();
        let sk = RollupSecretKey::random(&mut rng);
        let pk = sk.public_key();

        let sig = sk.sign(b"transfer 30 to bob");
        assert!(pk.verify(b"transfer 30 to bob", &sig));
        assert!(!pk.verify(b"transfer 31 to bob", &sig));
    }

    #[test]
    fn test_settlement_sign_verify() {
        let mut rng = test_rng();
        let sk = SettlementSecretKey::random(&mut rng);
        let other = SettlementSecretKey::random(&mut rng);

        let sig = sk.sign(b"deposit");
        assert!(sk.public_key().verify(b"deposit", &sig));
        assert!(!other.public_key().verify(b"deposit", &sig));
    }

    #[test]
    fn test_signature_is_deterministic() {
        let mut rng = test_rng();
        let sk = RollupSecretKey::random(&mut rng);
        assert_eq!(sk.sign(b"m"), sk.sign(b"m"));
        assert_ne!(sk.sign(b"m"), sk.sign(b"n"));
    }

    #[test]
    fn test_signature_bytes() {
        let mut rng = test_rng();
        let sk = RollupSecretKey::random(&mut rng);
        let sig = sk.sign(b"hello");

        let bytes = sig.to_bytes();
        assert_eq!(bytes.len(), 64);
        assert_eq!(RollupSignature::from_bytes(&bytes).unwrap(), sig);
        assert!(matches!(
            RollupSignature::from_bytes(&bytes[..63]),
            Err(CryptoError::InvalidSignatureLength { expected: 64, got: 63 })
        ));

        let pk_bytes = sk.public_key().to_bytes();
        assert_eq!(RollupPublicKey::from_bytes(&pk_bytes).unwrap(), sk.public_key());
    }

    #[test]
    fn test_secret_key_bytes() {
        let mut rng = test_rng();
        let sk = SettlementSecretKey::random(&mut rng);
        let restored = SettlementSecretKey::from_bytes(&sk.to_bytes()).unwrap();
        assert_eq!(restored.public_key(), sk.public_key());
        assert!(SettlementSecretKey::from_bytes(&[0u8; 32]).is_err());
    }
}
