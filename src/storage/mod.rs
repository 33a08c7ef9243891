// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Settlement Storage
//!
//! Everything the settlement core persists lives in one embedded redb
//! database (pure Rust, ACID). redb serializes write transactions, so every
//! read-check-write that must be atomic (balance debit, stock reservation,
//! status transitions) runs inside a single `begin_write()` scope.
//!
//! ## Table Layout
//!
//! ```text
//! users                   user_id            → UserRecord (JSON)
//! wallets                 user_id            → WalletBalances (JSON)
//! encrypted_keys          user_id            → EncryptedKeyMaterial (JSON)
//! encrypted_keys_archive  user_id|version|ts → EncryptedKeyMaterial (JSON)
//! crypto_wallets          user_id|chain      → CryptoAddress (JSON)
//! transactions            tx_id              → TransactionRecord (JSON)
//! user_tx_index           user|!ts_be|tx_id  → kind
//! reference_index         reference          → tx_id
//! orders                  order_id           → Order (JSON)
//! user_order_index        user|!ts_be|id     → status
//! products                product_id         → Product (JSON)
//! audit_events            !ts_be|event_id    → AuditEvent (JSON)
//! ```
//!
//! The `!ts_be` components are bit-inverted big-endian millisecond
//! timestamps so a forward range scan yields newest entries first.

pub mod audit;
pub mod history_cache;
pub mod ledger;
pub mod orders;
pub mod users;

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;

use crate::models::{Currency, OrderStatus, PaymentStatus, TxKind};

pub use audit::{AuditEvent, AuditEventType, AuditLog};
pub use history_cache::HistoryCache;
pub use ledger::{
    LedgerReceipt, LedgerStore, NewTransaction, Resolution, Settled, TransactionRecord,
};
pub use orders::{NewOrder, Order, OrderLine, OrderStore, Product, TrackingEvent};
pub use users::{CryptoAddress, TwoFactorRecord, UserRecord, UserStore};

// =============================================================================
// Table Definitions
// =============================================================================

pub(crate) const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
pub(crate) const WALLETS: TableDefinition<&str, &[u8]> = TableDefinition::new("wallets");
pub(crate) const ENCRYPTED_KEYS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("encrypted_keys");
pub(crate) const ENCRYPTED_KEYS_ARCHIVE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("encrypted_keys_archive");
pub(crate) const CRYPTO_WALLETS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("crypto_wallets");
pub(crate) const TRANSACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");
pub(crate) const USER_TX_INDEX: TableDefinition<&[u8], &str> =
    TableDefinition::new("user_tx_index");
pub(crate) const REFERENCE_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("reference_index");
pub(crate) const ORDERS: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");
/// Keys only; order state is read from `orders`.
pub(crate) const USER_ORDER_INDEX: TableDefinition<&[u8], ()> =
    TableDefinition::new("user_order_index");
pub(crate) const PRODUCTS: TableDefinition<&str, &[u8]> = TableDefinition::new("products");
pub(crate) const AUDIT_EVENTS: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("audit_events");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient {currency} balance")]
    InsufficientFunds { currency: Currency },

    #[error("amount must be positive")]
    InvalidAmount,

    #[error("insufficient stock for product {product_id}")]
    OutOfStock { product_id: String },

    #[error("illegal order transition {from:?} -> {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("conflict: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Storage handle
// =============================================================================

/// All stores over one shared database handle.
#[derive(Clone)]
pub struct Storage {
    pub ledger: LedgerStore,
    pub orders: OrderStore,
    pub users: UserStore,
    pub audit: AuditLog,
    db: Arc<Database>,
}

impl Storage {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Arc::new(open_database(path)?);
        Ok(Self {
            ledger: LedgerStore::new(db.clone()),
            orders: OrderStore::new(db.clone()),
            users: UserStore::new(db.clone()),
            audit: AuditLog::new(db.clone()),
            db,
        })
    }

    /// Cheap liveness probe: can a read transaction be opened.
    pub fn ping(&self) -> StoreResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(USERS)?;
        Ok(())
    }

    /// Refund a paid order in one write transaction: the order moves to
    /// `REFUNDED`, its payment to refunded, and the buyer is credited the
    /// settlement amount as a completed `REFUND` entry.
    pub fn refund_order(
        &self,
        order_id: &str,
        note: Option<String>,
    ) -> StoreResult<(Order, LedgerReceipt)> {
        let write_txn = self.db.begin_write()?;
        let (order, receipt) = {
            let mut table = write_txn.open_table(ORDERS)?;
            let mut order: Order = get_json(&table, order_id)?
                .ok_or_else(|| StoreError::NotFound(format!("Order {order_id}")))?;
            if order.payment_status != PaymentStatus::Paid {
                return Err(StoreError::Conflict(format!(
                    "Order {order_id} has no settled payment to refund"
                )));
            }
            order.advance(OrderStatus::Refunded, note)?;
            order.payment_status = PaymentStatus::Refunded;

            let entry = NewTransaction::new(
                &order.buyer_id,
                TxKind::Refund,
                order.settlement_currency,
                order.settlement_amount,
            )
            .completed()
            .with_order(order_id);
            let receipt = ledger::apply_in(&write_txn, entry, ledger::Direction::Credit)?;

            let json = serde_json::to_vec(&order)?;
            table.insert(order_id, json.as_slice())?;
            (order, receipt)
        };
        write_txn.commit()?;
        Ok((order, receipt))
    }
}

fn open_database(path: &Path) -> StoreResult<Database> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::create(path)?;

    // Pre-create all tables so later read transactions don't fail
    let write_txn = db.begin_write()?;
    {
        let _ = write_txn.open_table(USERS)?;
        let _ = write_txn.open_table(WALLETS)?;
        let _ = write_txn.open_table(ENCRYPTED_KEYS)?;
        let _ = write_txn.open_table(ENCRYPTED_KEYS_ARCHIVE)?;
        let _ = write_txn.open_table(CRYPTO_WALLETS)?;
        let _ = write_txn.open_table(TRANSACTIONS)?;
        let _ = write_txn.open_table(USER_TX_INDEX)?;
        let _ = write_txn.open_table(REFERENCE_INDEX)?;
        let _ = write_txn.open_table(ORDERS)?;
        let _ = write_txn.open_table(USER_ORDER_INDEX)?;
        let _ = write_txn.open_table(PRODUCTS)?;
        let _ = write_txn.open_table(AUDIT_EVENTS)?;
    }
    write_txn.commit()?;

    Ok(db)
}

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Build a composite key `owner_len_be16 | owner | inverted_millis_be | id`.
///
/// The owner is length-prefixed so no owner's range can contain another's,
/// even when one id is a prefix of the other. The inverted timestamp gives
/// newest-first ordering when scanning forward.
pub(crate) fn make_index_key(owner: &str, timestamp_millis: i64, id: &str) -> Vec<u8> {
    let mut key = make_prefix(owner);
    key.reserve(8 + id.len());
    key.extend_from_slice(&(!timestamp_millis as u64).to_be_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

/// Prefix for range scanning every entry of an owner.
pub(crate) fn make_prefix(owner: &str) -> Vec<u8> {
    let len = u16::try_from(owner.len()).unwrap_or(u16::MAX);
    let mut prefix = Vec::with_capacity(2 + owner.len());
    prefix.extend_from_slice(&len.to_be_bytes());
    prefix.extend_from_slice(owner.as_bytes());
    prefix
}

/// Upper bound for a range scan (prefix with 0xFF bytes appended).
pub(crate) fn make_prefix_end(owner: &str) -> Vec<u8> {
    let mut end = make_prefix(owner);
    end.extend_from_slice(&[0xFF; 20]);
    end
}

/// Split a composite key built for `owner` into `(timestamp_millis, id)`.
///
/// `None` if the key belongs to another owner.
pub(crate) fn split_index_key(owner: &str, key: &[u8]) -> Option<(i64, String)> {
    let prefix = make_prefix(owner);
    let rest = key.strip_prefix(prefix.as_slice())?;
    if rest.len() < 8 {
        return None;
    }
    let (ts_bytes, id) = rest.split_at(8);
    let ts_bytes: [u8; 8] = ts_bytes.try_into().ok()?;
    let timestamp = !u64::from_be_bytes(ts_bytes) as i64;
    let id = String::from_utf8(id.to_vec()).ok()?;
    Some((timestamp, id))
}

/// Read and deserialize a JSON value from a `&str`-keyed table.
pub(crate) fn get_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StoreResult<Option<T>> {
    match table.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn encode_cursor(key: &[u8]) -> String {
    alloy::hex::encode(key)
}

pub(crate) fn decode_cursor(cursor: &str) -> Option<Vec<u8>> {
    alloy::hex::decode(cursor).ok()
}

#[cfg(test)]
pub(crate) fn temp_storage() -> (Storage, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(&dir.path().join("test.redb")).unwrap();
    (storage, dir)
}
