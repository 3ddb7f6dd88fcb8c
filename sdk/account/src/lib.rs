use std::fmt;

use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

use kestrel_crypto::curve::{
    decode_rollup_point, encode_rollup_point, rollup_coordinates, rollup_point_from_coordinates,
};
use kestrel_crypto::{CryptoError, EncryptedBalance, FieldElement, RollupPublicKey, fe_to_bytes, poseidon};

/// Leaf domain tags. Plain and encrypted leaves never share a preimage shape.
const PLAIN_LEAF_TAG: u64 = 1;
const ENCRYPTED_LEAF_TAG: u64 = 2;

/// A rollup address: the compressed rollup-curve public key of its owner.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, SchemaWrite, SchemaRead,
)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub fn from_public_key(public_key: &RollupPublicKey) -> Self {
        Self(encode_rollup_point(public_key.as_affine()))
    }

    /// Address for the point `(x, y)`, rejecting anything outside the subgroup.
    pub fn from_coordinates(x: FieldElement, y: FieldElement) -> Result<Self, CryptoError> {
        let point = rollup_point_from_coordinates(x, y)?;
        Ok(Self(encode_rollup_point(&point)))
    }

    pub fn public_key(&self) -> Result<RollupPublicKey, CryptoError> {
        Ok(RollupPublicKey::from_affine(decode_rollup_point(&self.0)?))
    }

    pub fn coordinates(&self) -> Result<(FieldElement, FieldElement), CryptoError> {
        Ok(rollup_coordinates(&decode_rollup_point(&self.0)?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// How a balance is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SchemaWrite, SchemaRead)]
pub enum BalanceKind {
    Plain,
    Encrypted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SchemaWrite, SchemaRead)]
pub enum Balance {
    Plain(u64),
    Encrypted(EncryptedBalance),
}

impl Balance {
    pub fn zero(kind: BalanceKind) -> Self {
        match kind {
            BalanceKind::Plain => Balance::Plain(0),
            BalanceKind::Encrypted => Balance::Encrypted(EncryptedBalance::zero()),
        }
    }

    pub fn kind(&self) -> BalanceKind {
        match self {
            Balance::Plain(_) => BalanceKind::Plain,
            Balance::Encrypted(_) => BalanceKind::Encrypted,
        }
    }
}

/// The state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SchemaWrite, SchemaRead)]
pub struct Account {
    pub address: Address,
    pub nonce: u64,
    pub balance: Balance,
}

impl Account {
    /// A freshly created account: nonce 0, zero balance of the given kind.
    pub fn empty(address: Address, kind: BalanceKind) -> Self {
        Self {
            address,
            nonce: 0,
            balance: Balance::zero(kind),
        }
    }

    pub fn plain(address: Address, balance: u64, nonce: u64) -> Self {
        Self {
            address,
            nonce,
            balance: Balance::Plain(balance),
        }
    }

    pub fn plain_balance(&self) -> Option<u64> {
        match self.balance {
            Balance::Plain(v) => Some(v),
            Balance::Encrypted(_) => None,
        }
    }

    pub fn encrypted_balance(&self) -> Option<&EncryptedBalance> {
        match &self.balance {
            Balance::Plain(_) => None,
            Balance::Encrypted(ct) => Some(ct),
        }
    }

    /// Poseidon over the serialized fields.
    ///
    /// ```text
    ///   plain:      H(1, pk.x, pk.y, nonce, balance)
    ///   encrypted:  H(2, pk.x, pk.y, nonce, L.x, L.y, R.x, R.y)
    /// ```
    pub fn leaf_hash(&self) -> Result<[u8; 32], CryptoError> {
        let (x, y) = self.address.coordinates()?;
        let nonce = FieldElement::from(self.nonce);
        let digest = match &self.balance {
            Balance::Plain(amount) => poseidon(&[
                FieldElement::from(PLAIN_LEAF_TAG),
                x,
                y,
                nonce,
                FieldElement::from(*amount),
            ]),
            Balance::Encrypted(ct) => {
                let (left, right) = ct.points()?;
                let (lx, ly) = rollup_coordinates(&left);
                let (rx, ry) = rollup_coordinates(&right);
                poseidon(&[
                    FieldElement::from(ENCRYPTED_LEAF_TAG),
                    x,
                    y,
                    nonce,
                    lx,
                    ly,
                    rx,
                    ry,
                ])
            }
        };
        Ok(fe_to_bytes(&digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::test_rng;
    use kestrel_crypto::RollupSecretKey;

    fn address(seed: u64) -> Address {
        let mut rng = test_rng();
        for _ in 0..seed {
            RollupSecretKey::random(&mut rng);
        }
        Address::from_public_key(&RollupSecretKey::random(&mut rng).public_key())
    }

    #[test]
    fn test_address_coordinates_roundtrip() {
        let addr = address(1);
        let (x, y) = addr.coordinates().unwrap();
        assert_eq!(Address::from_coordinates(x, y).unwrap(), addr);
        assert_eq!(
            Address::from_public_key(&addr.public_key().unwrap()),
            addr
        );
    }

    #[test]
    fn test_leaf_hash_tracks_every_field() {
        let addr = address(2);
        let base = Account::plain(addr, 100, 0);
        let h = base.leaf_hash().unwrap();

        assert_ne!(Account::plain(addr, 101, 0).leaf_hash().unwrap(), h);
        assert_ne!(Account::plain(addr, 100, 1).leaf_hash().unwrap(), h);
        assert_ne!(Account::plain(address(3), 100, 0).leaf_hash().unwrap(), h);
        assert_eq!(base.leaf_hash().unwrap(), h);
    }

    #[test]
    fn test_plain_and_encrypted_zero_differ() {
        let addr = address(4);
        let plain = Account::empty(addr, BalanceKind::Plain);
        let encrypted = Account::empty(addr, BalanceKind::Encrypted);
        assert_eq!(plain.nonce, 0);
        assert_ne!(plain.leaf_hash().unwrap(), encrypted.leaf_hash().unwrap());
    }
}
