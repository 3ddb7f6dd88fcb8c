//! Authoritative rollup state: the accumulator plus the account map.

use std::collections::HashMap;

use anyhow::{Result, bail};
use rayon::prelude::*;

use kestrel_account::{Account, Address};
use kestrel_crypto::MerkleProof;

use super::account_tree::{AccumulatorError, MerkleAccumulator};
use super::db::{RocksDbStore, StoredAccount};

/// Leaf write outcome for one account.
#[derive(Debug, Clone)]
pub struct LeafWrite {
    pub index: u64,
    pub before: Option<Account>,
    /// Sibling path at the time of the write
    pub path: MerkleProof,
}

#[derive(Debug, Clone)]
pub struct RollupState {
    tree: MerkleAccumulator,
    accounts: HashMap<Address, (u64, Account)>,
}

impl RollupState {
    pub fn new(depth: usize) -> Result<Self, AccumulatorError> {
        Ok(Self {
            tree: MerkleAccumulator::new(depth)?,
            accounts: HashMap::new(),
        })
    }

    /// Rebuild from persisted accounts and check against the persisted root.
    pub fn rebuild(depth: usize, db: &RocksDbStore) -> Result<Self> {
        let stored = db.load_accounts()?;

        for (expected, s) in stored.iter().enumerate() {
            if s.index != expected as u64 {
                bail!(
                    "account leaves are not contiguous: slot {} holds index {}",
                    expected,
                    s.index
                );
            }
        }

        let leaves = stored
            .par_iter()
            .map(|s| s.account.leaf_hash())
            .collect::<Result<Vec<_>, _>>()?;

        let mut state = Self::new(depth)?;
        for (s, leaf) in stored.iter().zip(leaves) {
            state.tree.add(leaf)?;
            state.accounts.insert(s.account.address, (s.index, s.account));
        }

        if let Some(persisted) = db.root()? {
            if persisted != state.root() {
                bail!(
                    "rebuilt root {} does not match stored root {}",
                    hex::encode(state.root()),
                    hex::encode(persisted)
                );
            }
        }
        Ok(state)
    }

    pub fn root(&self) -> [u8; 32] {
        self.tree.root()
    }

    pub fn depth(&self) -> usize {
        self.tree.depth()
    }

    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn capacity(&self) -> u64 {
        self.tree.capacity()
    }

    pub fn get_account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address).map(|(_, a)| a)
    }

    pub fn index_of(&self, address: &Address) -> Option<u64> {
        self.accounts.get(address).map(|(i, _)| *i)
    }

    pub fn get_merkle_proof(&self, address: &Address) -> Option<MerkleProof> {
        let index = self.index_of(address)?;
        self.tree.prove_inclusion(index).ok()
    }

    /// Write an account's leaf: `add` for a new address, `update` otherwise.
    pub fn write_account(
        &mut self,
        account: Account,
        leaf: [u8; 32],
    ) -> Result<LeafWrite, AccumulatorError> {
        match self.accounts.get(&account.address).copied() {
            Some((index, before)) => {
                let (_, path) = self.tree.update(index, leaf)?;
                self.accounts.insert(account.address, (index, account));
                Ok(LeafWrite {
                    index,
                    before: Some(before),
                    path,
                })
            }
            None => {
                let (_, path) = self.tree.add(leaf)?;
                let index = path.index;
                self.accounts.insert(account.address, (index, account));
                Ok(LeafWrite {
                    index,
                    before: None,
                    path,
                })
            }
        }
    }

    pub fn stored(&self, address: &Address) -> Option<StoredAccount> {
        self.accounts
            .get(address)
            .map(|(index, account)| StoredAccount {
                index: *index,
                account: *account,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::storage::db::DbBatch;
    use ark_std::test_rng;
    use kestrel_crypto::{EMPTY_LEAF, RollupSecretKey};
    use tempfile::TempDir;

    fn addresses(n: usize) -> Vec<Address> {
        let mut rng = test_rng();
        (0..n)
            .map(|_| Address::from_public_key(&RollupSecretKey::random(&mut rng).public_key()))
            .collect()
    }

    #[test]
    fn test_write_account_adds_then_updates() {
        let addrs = addresses(2);
        let mut state = RollupState::new(8).unwrap();
        let genesis = state.root();

        let alice = Account::plain(addrs[0], 100, 0);
        let write = state.write_account(alice, alice.leaf_hash().unwrap()).unwrap();
        assert_eq!(write.index, 0);
        assert_eq!(write.before, None);
        assert!(write.path.verify(&EMPTY_LEAF, &genesis));

        let after_add = state.root();
        let alice2 = Account::plain(addrs[0], 70, 1);
        let write = state.write_account(alice2, alice2.leaf_hash().unwrap()).unwrap();
        assert_eq!(write.index, 0);
        assert_eq!(write.before, Some(alice));
        assert!(write.path.verify(&alice.leaf_hash().unwrap(), &after_add));

        let proof = state.get_merkle_proof(&addrs[0]).unwrap();
        assert!(proof.verify(&alice2.leaf_hash().unwrap(), &state.root()));
        assert!(state.get_merkle_proof(&addrs[1]).is_none());
    }

    #[test]
    fn test_rebuild_matches_persisted_root() {
        let dir = TempDir::new().unwrap();
        let db = RocksDbStore::open(dir.path()).unwrap();
        let addrs = addresses(3);

        let mut state = RollupState::new(6).unwrap();
        for (i, addr) in addrs.iter().enumerate() {
            let account = Account::plain(*addr, 10 * (i as u64 + 1), i as u64);
            state.write_account(account, account.leaf_hash().unwrap()).unwrap();
        }
        db.commit_batch(DbBatch {
            accounts: addrs.iter().filter_map(|a| state.stored(a)).collect(),
            root: state.root(),
            ..Default::default()
        })
        .unwrap();

        let rebuilt = RollupState::rebuild(6, &db).unwrap();
        assert_eq!(rebuilt.root(), state.root());
        assert_eq!(rebuilt.index_of(&addrs[2]), Some(2));

        // a different depth closes to a different root
        assert!(RollupState::rebuild(7, &db).is_err());
    }
}
