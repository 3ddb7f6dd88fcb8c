//! Kestrel cryptographic primitives
//!
//! Everything the rollup needs below the account model:
//!
//! ```text
//!   field      BLS12-381 scalar field, Poseidon sponge, 32-byte LE encoding
//!   curve      Jubjub (rollup) and BN254 G1 (settlement) point encodings
//!   signature  Schnorr over any arkworks CurveGroup, used on both curves
//!   elgamal    Additively homomorphic balances on Jubjub
//!   merkle     Poseidon Merkle paths and empty subtree roots
//! ```

pub mod curve;
pub mod elgamal;
pub mod error;
pub mod field;
pub mod merkle;
pub mod signature;

pub use curve::{
    RollupAffine, RollupCurve, RollupScalar, SettlementAffine, SettlementCurve, SettlementScalar,
};
pub use elgamal::{DEFAULT_DECRYPT_BOUND, EncryptedBalance, MAX_DECRYPT_BOUND};
pub use error::CryptoError;
pub use field::{EMPTY_LEAF, FieldElement, fe_from_bytes, fe_to_bytes, hash_pair, poseidon};
pub use merkle::{MAX_DEPTH, MerkleProof, empty_root};
pub use signature::{
    PublicKey, RollupPublicKey, RollupSecretKey, RollupSignature, SecretKey, SettlementPublicKey,
    SettlementSecretKey, SettlementSignature, Signature,
};
