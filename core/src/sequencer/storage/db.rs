use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

use kestrel_account::{Account, Address};
use kestrel_transaction::Transaction;

const CF_ACCOUNTS: &str = "accounts";
const CF_PENDING: &str = "pending";
const CF_BATCHES: &str = "batches";
const CF_META: &str = "meta";

const META_ROOT: &[u8] = b"root";
const META_NEXT_BATCH_ID: &[u8] = b"next_batch_id";
const META_NEXT_PENDING_SEQ: &[u8] = b"next_pending_seq";
const META_EVENT_CURSOR: &[u8] = b"event_cursor";

/// An account together with its leaf slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, SchemaWrite, SchemaRead)]
pub struct StoredAccount {
    pub index: u64,
    pub account: Account,
}

/// Summary of a settled batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaWrite, SchemaRead)]
pub struct BatchHeader {
    pub batch_id: u64,
    pub prev_root: [u8; 32],
    pub new_root: [u8; 32],
    pub tx_count: u32,
    /// Settlement contract batch counter after the forge
    pub settlement_index: u64,
}

/// Everything a settled batch changes, written in one shot.
#[derive(Debug, Default)]
pub struct DbBatch {
    pub accounts: Vec<StoredAccount>,
    pub consumed_pending: Vec<u64>,
    pub root: [u8; 32],
    pub header: Option<BatchHeader>,
}

/// A thread-safe wrapper around RocksDB.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
}

impl RocksDbStore {
    /// Opens the database at the specified path, creating it if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_PENDING, Options::default()),
            ColumnFamilyDescriptor::new(CF_BATCHES, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, families)
            .map_err(|e| anyhow::anyhow!("Failed to open RocksDB: {}", e))?;

        Ok(Self { db: Arc::new(db) })
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    pub fn get_account(&self, address: &Address) -> Result<Option<StoredAccount>> {
        let cf = self
            .db
            .cf_handle(CF_ACCOUNTS)
            .context("accounts CF missing")?;

        match self.db.get_cf(cf, address.0)? {
            Some(bytes) => Ok(Some(wincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All stored accounts, ordered by leaf index.
    pub fn load_accounts(&self) -> Result<Vec<StoredAccount>> {
        let cf = self
            .db
            .cf_handle(CF_ACCOUNTS)
            .context("accounts CF missing")?;

        let mut accounts = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let stored: StoredAccount = wincode::deserialize(&value)?;
            accounts.push(stored);
        }
        accounts.sort_by_key(|s| s.index);
        Ok(accounts)
    }

    // =========================================================================
    // Pending queue
    // =========================================================================

    /// Append transactions to the pending queue, advancing the Layer-1 event
    /// cursor in the same write when given.
    ///
    /// Returns the sequence number assigned to each entry.
    pub fn append_pending(
        &self,
        txs: &[Transaction],
        event_cursor: Option<u64>,
    ) -> Result<Vec<u64>> {
        let cf_pending = self
            .db
            .cf_handle(CF_PENDING)
            .context("pending CF missing")?;
        let cf_meta = self.db.cf_handle(CF_META).context("meta CF missing")?;

        let mut next = self.next_pending_seq()?;
        let mut seqs = Vec::with_capacity(txs.len());
        let mut batch = WriteBatch::default();

        for tx in txs {
            batch.put_cf(cf_pending, next.to_be_bytes(), tx.encode());
            seqs.push(next);
            next += 1;
        }
        batch.put_cf(cf_meta, META_NEXT_PENDING_SEQ, next.to_be_bytes());
        if let Some(cursor) = event_cursor {
            batch.put_cf(cf_meta, META_EVENT_CURSOR, cursor.to_be_bytes());
        }

        self.db.write(batch)?;
        Ok(seqs)
    }

    /// Pending entries in sequence order.
    pub fn load_pending(&self) -> Result<Vec<(u64, Transaction)>> {
        let cf = self
            .db
            .cf_handle(CF_PENDING)
            .context("pending CF missing")?;

        let mut pending = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let seq = u64::from_be_bytes(
                key.as_ref()
                    .try_into()
                    .context("invalid pending key length")?,
            );
            let tx = Transaction::decode(&value)
                .with_context(|| format!("pending entry {seq} is not a transaction"))?;
            pending.push((seq, tx));
        }
        Ok(pending)
    }

    pub fn remove_pending(&self, seqs: &[u64]) -> Result<()> {
        let cf = self
            .db
            .cf_handle(CF_PENDING)
            .context("pending CF missing")?;

        let mut batch = WriteBatch::default();
        for seq in seqs {
            batch.delete_cf(cf, seq.to_be_bytes());
        }
        self.db.write(batch)?;
        Ok(())
    }

    // =========================================================================
    // Meta
    // =========================================================================

    pub fn root(&self) -> Result<Option<[u8; 32]>> {
        let cf = self.db.cf_handle(CF_META).context("meta CF missing")?;
        match self.db.get_cf(cf, META_ROOT)? {
            Some(bytes) => {
                let root: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .context("invalid root length")?;
                Ok(Some(root))
            }
            None => Ok(None),
        }
    }

    pub fn next_batch_id(&self) -> Result<u64> {
        self.meta_u64(META_NEXT_BATCH_ID)
    }

    pub fn next_pending_seq(&self) -> Result<u64> {
        self.meta_u64(META_NEXT_PENDING_SEQ)
    }

    pub fn event_cursor(&self) -> Result<u64> {
        self.meta_u64(META_EVENT_CURSOR)
    }

    fn meta_u64(&self, key: &[u8]) -> Result<u64> {
        let cf = self.db.cf_handle(CF_META).context("meta CF missing")?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .context("invalid meta value length")?;
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    // =========================================================================
    // Batches
    // =========================================================================

    pub fn get_batch_header(&self, batch_id: u64) -> Result<Option<BatchHeader>> {
        let cf = self
            .db
            .cf_handle(CF_BATCHES)
            .context("batches CF missing")?;
        match self.db.get_cf(cf, batch_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(wincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Atomically persist a settled batch.
    pub fn commit_batch(&self, operations: DbBatch) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_accounts = self
            .db
            .cf_handle(CF_ACCOUNTS)
            .context("accounts CF missing")?;
        let cf_pending = self
            .db
            .cf_handle(CF_PENDING)
            .context("pending CF missing")?;
        let cf_batches = self
            .db
            .cf_handle(CF_BATCHES)
            .context("batches CF missing")?;
        let cf_meta = self.db.cf_handle(CF_META).context("meta CF missing")?;

        for stored in &operations.accounts {
            let bytes = wincode::serialize(stored)?;
            batch.put_cf(cf_accounts, stored.account.address.0, bytes);
        }

        for seq in &operations.consumed_pending {
            batch.delete_cf(cf_pending, seq.to_be_bytes());
        }

        batch.put_cf(cf_meta, META_ROOT, operations.root);

        if let Some(header) = &operations.header {
            batch.put_cf(
                cf_batches,
                header.batch_id.to_be_bytes(),
                wincode::serialize(header)?,
            );
            batch.put_cf(cf_meta, META_NEXT_BATCH_ID, (header.batch_id + 1).to_be_bytes());
        }

        self.db.write(batch)?;
        Ok(())
    }
}
