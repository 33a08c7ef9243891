// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-user balance ledger and append-only transaction log.
//!
//! Every balance mutation and the transaction row that justifies it are
//! written in the same redb write transaction. redb admits one writer at a
//! time, so the balance check and the decrement in [`LedgerStore::debit`]
//! cannot interleave with another debit on the same balance.
//!
//! Status transitions go through [`LedgerStore::resolve`]. A record leaves
//! `PENDING` exactly once; a second resolution of the same record returns
//! [`Settled::AlreadyFinal`] and mutates nothing, which is what makes webhook
//! replays and poller races harmless.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{
    decode_cursor, encode_cursor, get_json, make_index_key, make_prefix, make_prefix_end,
    split_index_key, StoreError, StoreResult, REFERENCE_INDEX, TRANSACTIONS, USER_TX_INDEX,
    WALLETS,
};
use crate::models::{Chain, Currency, TxKind, TxStatus, WalletBalances};

// =============================================================================
// Records
// =============================================================================

/// An entry in the transaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TransactionRecord {
    pub id: String,
    pub user_id: String,
    pub kind: TxKind,
    pub currency: Currency,
    #[schema(value_type = String, example = "17500.00")]
    pub amount: Decimal,
    pub status: TxStatus,
    /// Payment-gateway reference or on-chain transaction hash.
    pub reference: Option<String>,
    pub order_id: Option<String>,
    pub chain: Option<Chain>,
    pub destination: Option<String>,
    /// USD value at the time of the request (withdrawals only).
    #[schema(value_type = Option<String>)]
    pub usd_value: Option<Decimal>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Builder for a log entry before it has an id.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: String,
    pub kind: TxKind,
    pub currency: Currency,
    pub amount: Decimal,
    pub status: TxStatus,
    pub reference: Option<String>,
    pub order_id: Option<String>,
    pub chain: Option<Chain>,
    pub destination: Option<String>,
    pub usd_value: Option<Decimal>,
}

impl NewTransaction {
    pub fn new(
        user_id: impl Into<String>,
        kind: TxKind,
        currency: Currency,
        amount: Decimal,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            currency,
            amount,
            status: TxStatus::Pending,
            reference: None,
            order_id: None,
            chain: None,
            destination: None,
            usd_value: None,
        }
    }

    pub fn completed(mut self) -> Self {
        self.status = TxStatus::Completed;
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_destination(mut self, chain: Chain, address: impl Into<String>) -> Self {
        self.chain = Some(chain);
        self.destination = Some(address.into());
        self
    }

    pub fn with_usd_value(mut self, usd: Decimal) -> Self {
        self.usd_value = Some(usd);
        self
    }

    fn into_record(self) -> TransactionRecord {
        let now = Utc::now();
        TransactionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: self.user_id,
            kind: self.kind,
            currency: self.currency,
            amount: self.amount,
            status: self.status,
            reference: self.reference,
            order_id: self.order_id,
            chain: self.chain,
            destination: self.destination,
            usd_value: self.usd_value,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result of a balance mutation.
#[derive(Debug, Clone)]
pub struct LedgerReceipt {
    pub transaction: TransactionRecord,
    pub new_balance: Decimal,
}

/// How to move a `PENDING` record to a terminal state.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Mark `COMPLETED`; the balance already reflects the movement.
    Complete,
    /// Mark `COMPLETED` and credit the amount (deferred deposits).
    CompleteAndCredit,
    /// Mark `FAILED` without touching the balance.
    Fail { reason: String },
    /// Mark `FAILED` and credit back an amount debited at creation.
    FailAndReverse { reason: String },
}

/// Outcome of [`LedgerStore::resolve`].
#[derive(Debug, Clone)]
pub enum Settled {
    /// The transition (and any credit) was applied by this call.
    Applied(TransactionRecord),
    /// The record was already terminal; nothing changed.
    AlreadyFinal(TransactionRecord),
}

impl Settled {
    pub fn record(&self) -> &TransactionRecord {
        match self {
            Settled::Applied(r) | Settled::AlreadyFinal(r) => r,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Settled::Applied(_))
    }
}

// =============================================================================
// LedgerStore
// =============================================================================

/// Balance and transaction-log store.
#[derive(Clone)]
pub struct LedgerStore {
    db: Arc<Database>,
}

impl LedgerStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    // =========================================================================
    // Balances
    // =========================================================================

    /// All balances of a user. Users without a wallet row read as all zero.
    pub fn balances(&self, user_id: &str) -> StoreResult<WalletBalances> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WALLETS)?;
        Ok(get_json(&table, user_id)?.unwrap_or_default())
    }

    pub fn get_balance(&self, user_id: &str, currency: Currency) -> StoreResult<Decimal> {
        Ok(self.balances(user_id)?.get(currency))
    }

    /// Decrement a balance and append the entry, atomically.
    ///
    /// Fails with [`StoreError::InsufficientFunds`] if the balance is below
    /// the amount; nothing is written in that case.
    pub fn debit(&self, entry: NewTransaction) -> StoreResult<LedgerReceipt> {
        self.apply(entry, Direction::Debit)
    }

    /// Increment a balance and append the entry, atomically.
    pub fn credit(&self, entry: NewTransaction) -> StoreResult<LedgerReceipt> {
        self.apply(entry, Direction::Credit)
    }

    fn apply(&self, entry: NewTransaction, direction: Direction) -> StoreResult<LedgerReceipt> {
        let write_txn = self.db.begin_write()?;
        let receipt = apply_in(&write_txn, entry, direction)?;
        write_txn.commit()?;
        Ok(receipt)
    }

    // =========================================================================
    // Transaction log
    // =========================================================================

    /// Append an entry without moving any balance.
    ///
    /// Used for movements whose funds arrive later, e.g. a gateway top-up
    /// that is credited only once the charge is confirmed.
    pub fn record_transaction(&self, entry: NewTransaction) -> StoreResult<TransactionRecord> {
        ensure_positive(entry.amount)?;
        let record = entry.into_record();
        let write_txn = self.db.begin_write()?;
        insert_record(&write_txn, &record)?;
        write_txn.commit()?;
        Ok(record)
    }

    pub fn get_transaction(&self, id: &str) -> StoreResult<Option<TransactionRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        get_json(&table, id)
    }

    /// Look up a record by gateway reference or chain hash.
    pub fn find_by_reference(&self, reference: &str) -> StoreResult<Option<TransactionRecord>> {
        let read_txn = self.db.begin_read()?;
        let refs = read_txn.open_table(REFERENCE_INDEX)?;
        let tx_id = match refs.get(reference)? {
            Some(v) => v.value().to_string(),
            None => return Ok(None),
        };
        let table = read_txn.open_table(TRANSACTIONS)?;
        get_json(&table, &tx_id)
    }

    /// Attach an external reference to a pending record.
    pub fn attach_reference(&self, id: &str, reference: &str) -> StoreResult<TransactionRecord> {
        let write_txn = self.db.begin_write()?;
        let record = {
            let mut table = write_txn.open_table(TRANSACTIONS)?;
            let mut record: TransactionRecord = get_json(&table, id)?
                .ok_or_else(|| StoreError::NotFound(format!("Transaction {id}")))?;
            if record.status.is_terminal() {
                return Err(StoreError::Conflict(format!(
                    "Transaction {id} is already {:?}",
                    record.status
                )));
            }
            record.reference = Some(reference.to_string());
            record.updated_at = Utc::now();
            let json = serde_json::to_vec(&record)?;
            table.insert(id, json.as_slice())?;
            record
        };
        index_reference(&write_txn, reference, id)?;
        write_txn.commit()?;
        Ok(record)
    }

    /// Move a pending record to a terminal status, applying any credit in
    /// the same write transaction.
    pub fn resolve(&self, id: &str, resolution: Resolution) -> StoreResult<Settled> {
        let write_txn = self.db.begin_write()?;
        let settled = {
            let mut table = write_txn.open_table(TRANSACTIONS)?;
            let mut record: TransactionRecord = get_json(&table, id)?
                .ok_or_else(|| StoreError::NotFound(format!("Transaction {id}")))?;

            if record.status.is_terminal() {
                return Ok(Settled::AlreadyFinal(record));
            }

            match resolution {
                Resolution::Complete => record.status = TxStatus::Completed,
                Resolution::CompleteAndCredit => {
                    adjust_balance(&write_txn, &record.user_id, record.currency, record.amount)?;
                    record.status = TxStatus::Completed;
                }
                Resolution::Fail { reason } => {
                    record.status = TxStatus::Failed;
                    record.failure_reason = Some(reason);
                }
                Resolution::FailAndReverse { reason } => {
                    adjust_balance(&write_txn, &record.user_id, record.currency, record.amount)?;
                    record.status = TxStatus::Failed;
                    record.failure_reason = Some(reason);
                }
            }
            record.updated_at = Utc::now();

            let json = serde_json::to_vec(&record)?;
            table.insert(id, json.as_slice())?;
            Settled::Applied(record)
        };
        write_txn.commit()?;
        Ok(settled)
    }

    /// Paginated listing of a user's transactions, newest first.
    pub fn list_for_user(
        &self,
        user_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> StoreResult<(Vec<TransactionRecord>, Option<String>)> {
        let read_txn = self.db.begin_read()?;
        let idx_table = read_txn.open_table(USER_TX_INDEX)?;
        let tx_table = read_txn.open_table(TRANSACTIONS)?;

        let prefix = make_prefix(user_id);
        let prefix_end = make_prefix_end(user_id);
        let start = cursor
            .and_then(decode_cursor)
            .filter(|k| k.starts_with(&prefix))
            .unwrap_or_else(|| prefix.clone());

        let mut results = Vec::with_capacity(limit);
        let mut skip_first = cursor.is_some() && start != prefix;
        let mut last_key: Option<Vec<u8>> = None;

        for entry in idx_table.range(start.as_slice()..prefix_end.as_slice())? {
            let entry = entry?;
            let key_bytes = entry.0.value().to_vec();

            // Skip the cursor entry itself
            if skip_first {
                skip_first = false;
                continue;
            }

            if let Some((_, tx_id)) = split_index_key(user_id, &key_bytes) {
                if let Some(record) = get_json::<TransactionRecord>(&tx_table, &tx_id)? {
                    if record.user_id == user_id {
                        results.push(record);
                        last_key = Some(key_bytes);
                    }
                }
            }

            if results.len() >= limit {
                break;
            }
        }

        let next_cursor = if results.len() >= limit {
            last_key.map(|k| encode_cursor(&k))
        } else {
            None
        };

        Ok((results, next_cursor))
    }

    /// Sum of `usd_value` over the user's non-failed withdrawals created at
    /// or after `since`.
    ///
    /// Pending withdrawals count: their funds have already left the ledger.
    pub fn withdrawal_usd_volume_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Decimal> {
        let read_txn = self.db.begin_read()?;
        let idx_table = read_txn.open_table(USER_TX_INDEX)?;
        let tx_table = read_txn.open_table(TRANSACTIONS)?;

        let prefix = make_prefix(user_id);
        let prefix_end = make_prefix_end(user_id);
        let cutoff = since.timestamp_millis();

        let mut total = Decimal::ZERO;
        for entry in idx_table.range(prefix.as_slice()..prefix_end.as_slice())? {
            let entry = entry?;
            if entry.1.value() != kind_tag(TxKind::Withdrawal) {
                continue;
            }
            let Some((timestamp, tx_id)) = split_index_key(user_id, entry.0.value()) else {
                continue;
            };
            if timestamp < cutoff {
                break;
            }
            if let Some(record) = get_json::<TransactionRecord>(&tx_table, &tx_id)? {
                if record.user_id == user_id && record.status != TxStatus::Failed {
                    total += record.usd_value.unwrap_or_default();
                }
            }
        }
        Ok(total)
    }

    /// Pending records of one kind that carry an external reference.
    pub fn pending_with_reference(&self, kind: TxKind) -> StoreResult<Vec<TransactionRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let record: TransactionRecord = serde_json::from_slice(entry.1.value())?;
            if record.kind == kind
                && record.status == TxStatus::Pending
                && record.reference.is_some()
            {
                out.push(record);
            }
        }
        Ok(out)
    }
}

// =============================================================================
// Write-transaction helpers
// =============================================================================

pub(super) enum Direction {
    Debit,
    Credit,
}

/// Balance mutation plus its log entry inside a caller-owned write
/// transaction. Nothing is visible until the caller commits.
pub(super) fn apply_in(
    write_txn: &WriteTransaction,
    entry: NewTransaction,
    direction: Direction,
) -> StoreResult<LedgerReceipt> {
    ensure_positive(entry.amount)?;
    let record = entry.into_record();
    let delta = match direction {
        Direction::Debit => -record.amount,
        Direction::Credit => record.amount,
    };
    let new_balance = adjust_balance(write_txn, &record.user_id, record.currency, delta)?;
    insert_record(write_txn, &record)?;
    Ok(LedgerReceipt {
        transaction: record,
        new_balance,
    })
}

fn ensure_positive(amount: Decimal) -> StoreResult<()> {
    if amount <= Decimal::ZERO {
        return Err(StoreError::InvalidAmount);
    }
    Ok(())
}

/// Apply `delta` to one balance inside an open write transaction.
///
/// Fails without writing if the result would be negative.
fn adjust_balance(
    write_txn: &WriteTransaction,
    user_id: &str,
    currency: Currency,
    delta: Decimal,
) -> StoreResult<Decimal> {
    let mut wallets = write_txn.open_table(WALLETS)?;
    let mut balances: WalletBalances = get_json(&wallets, user_id)?.unwrap_or_default();
    let slot = balances.get_mut(currency);
    let next = *slot + delta;
    if next < Decimal::ZERO {
        return Err(StoreError::InsufficientFunds { currency });
    }
    *slot = next;
    let json = serde_json::to_vec(&balances)?;
    wallets.insert(user_id, json.as_slice())?;
    Ok(next)
}

fn insert_record(write_txn: &WriteTransaction, record: &TransactionRecord) -> StoreResult<()> {
    let json = serde_json::to_vec(record)?;
    {
        let mut table = write_txn.open_table(TRANSACTIONS)?;
        table.insert(record.id.as_str(), json.as_slice())?;
    }
    {
        let mut idx = write_txn.open_table(USER_TX_INDEX)?;
        let key = make_index_key(
            &record.user_id,
            record.created_at.timestamp_millis(),
            &record.id,
        );
        idx.insert(key.as_slice(), kind_tag(record.kind))?;
    }
    if let Some(reference) = &record.reference {
        index_reference(write_txn, reference, &record.id)?;
    }
    Ok(())
}

fn index_reference(write_txn: &WriteTransaction, reference: &str, tx_id: &str) -> StoreResult<()> {
    let mut refs = write_txn.open_table(REFERENCE_INDEX)?;
    let existing = refs.get(reference)?.map(|v| v.value().to_string());
    if let Some(existing) = existing {
        if existing != tx_id {
            return Err(StoreError::Conflict(format!(
                "Reference {reference} already belongs to another transaction"
            )));
        }
    }
    refs.insert(reference, tx_id)?;
    Ok(())
}

fn kind_tag(kind: TxKind) -> &'static str {
    match kind {
        TxKind::Deposit => "deposit",
        TxKind::Withdrawal => "withdrawal",
        TxKind::Payment => "payment",
        TxKind::Refund => "refund",
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::temp_storage;
    use rust_decimal::dec;

    fn fund(ledger: &LedgerStore, user: &str, currency: Currency, amount: Decimal) {
        ledger
            .credit(NewTransaction::new(user, TxKind::Deposit, currency, amount).completed())
            .unwrap();
    }

    #[test]
    fn new_user_has_zero_balances() {
        let (storage, _dir) = temp_storage();
        assert_eq!(
            storage.ledger.get_balance("u1", Currency::Ngn).unwrap(),
            Decimal::ZERO
        );
    }

    #[test]
    fn credit_then_debit_records_both() {
        let (storage, _dir) = temp_storage();
        let ledger = &storage.ledger;
        fund(ledger, "u1", Currency::Ngn, dec!(100000));

        let receipt = ledger
            .debit(
                NewTransaction::new("u1", TxKind::Payment, Currency::Ngn, dec!(17500))
                    .with_order("order-1"),
            )
            .unwrap();
        assert_eq!(receipt.new_balance, dec!(82500));
        assert_eq!(receipt.transaction.status, TxStatus::Pending);

        let (txs, cursor) = ledger.list_for_user("u1", None, 10).unwrap();
        assert_eq!(txs.len(), 2);
        assert!(cursor.is_none());
    }

    #[test]
    fn exact_balance_debit_succeeds_and_one_micro_more_fails() {
        let (storage, _dir) = temp_storage();
        let ledger = &storage.ledger;
        fund(ledger, "u1", Currency::Usdt, dec!(25.5));

        let too_much = ledger.debit(NewTransaction::new(
            "u1",
            TxKind::Withdrawal,
            Currency::Usdt,
            dec!(25.500001),
        ));
        assert!(matches!(
            too_much,
            Err(StoreError::InsufficientFunds { currency: Currency::Usdt })
        ));
        assert_eq!(ledger.get_balance("u1", Currency::Usdt).unwrap(), dec!(25.5));

        let exact = ledger
            .debit(NewTransaction::new("u1", TxKind::Withdrawal, Currency::Usdt, dec!(25.5)))
            .unwrap();
        assert_eq!(exact.new_balance, Decimal::ZERO);
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let (storage, _dir) = temp_storage();
        for amount in [Decimal::ZERO, dec!(-1)] {
            let result =
                storage
                    .ledger
                    .credit(NewTransaction::new("u1", TxKind::Deposit, Currency::Ngn, amount));
            assert!(matches!(result, Err(StoreError::InvalidAmount)));
        }
        let (txs, _) = storage.ledger.list_for_user("u1", None, 10).unwrap();
        assert!(txs.is_empty());
    }

    #[test]
    fn concurrent_debits_never_overdraw() {
        let (storage, _dir) = temp_storage();
        let ledger = storage.ledger.clone();
        fund(&ledger, "u1", Currency::Ngn, dec!(1000));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    ledger
                        .debit(NewTransaction::new(
                            "u1",
                            TxKind::Payment,
                            Currency::Ngn,
                            dec!(150),
                        ))
                        .is_ok()
                })
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 6);
        let balance = ledger.get_balance("u1", Currency::Ngn).unwrap();
        assert_eq!(balance, dec!(1000) - dec!(150) * Decimal::from(successes));
        assert!(balance >= Decimal::ZERO);
    }

    #[test]
    fn currencies_are_independent() {
        let (storage, _dir) = temp_storage();
        let ledger = &storage.ledger;
        fund(ledger, "u1", Currency::Usdt, dec!(10));
        let result =
            ledger.debit(NewTransaction::new("u1", TxKind::Payment, Currency::Usdc, dec!(1)));
        assert!(result.is_err());
        assert_eq!(ledger.get_balance("u1", Currency::Usdt).unwrap(), dec!(10));
    }

    #[test]
    fn fail_and_reverse_credits_exactly_once() {
        let (storage, _dir) = temp_storage();
        let ledger = &storage.ledger;
        fund(ledger, "u1", Currency::Eth, dec!(1));

        let receipt = ledger
            .debit(NewTransaction::new("u1", TxKind::Withdrawal, Currency::Eth, dec!(0.4)))
            .unwrap();
        let id = receipt.transaction.id;

        let first = ledger
            .resolve(&id, Resolution::FailAndReverse { reason: "reverted".into() })
            .unwrap();
        assert!(first.was_applied());
        assert_eq!(first.record().status, TxStatus::Failed);

        let second = ledger
            .resolve(&id, Resolution::FailAndReverse { reason: "reverted".into() })
            .unwrap();
        assert!(!second.was_applied());
        assert_eq!(ledger.get_balance("u1", Currency::Eth).unwrap(), dec!(1));
    }

    #[test]
    fn terminal_records_cannot_change() {
        let (storage, _dir) = temp_storage();
        let ledger = &storage.ledger;
        let record = ledger
            .record_transaction(NewTransaction::new(
                "u1",
                TxKind::Deposit,
                Currency::Ngn,
                dec!(500),
            ))
            .unwrap();

        ledger.resolve(&record.id, Resolution::CompleteAndCredit).unwrap();
        let again = ledger
            .resolve(&record.id, Resolution::Fail { reason: "late".into() })
            .unwrap();
        assert!(matches!(again, Settled::AlreadyFinal(_)));
        assert_eq!(again.record().status, TxStatus::Completed);
        assert_eq!(ledger.get_balance("u1", Currency::Ngn).unwrap(), dec!(500));
    }

    #[test]
    fn reference_lookup_and_uniqueness() {
        let (storage, _dir) = temp_storage();
        let ledger = &storage.ledger;
        let a = ledger
            .record_transaction(
                NewTransaction::new("u1", TxKind::Deposit, Currency::Ngn, dec!(1))
                    .with_reference("ref-1"),
            )
            .unwrap();
        assert_eq!(ledger.find_by_reference("ref-1").unwrap().unwrap().id, a.id);

        let dup = ledger.record_transaction(
            NewTransaction::new("u2", TxKind::Deposit, Currency::Ngn, dec!(1))
                .with_reference("ref-1"),
        );
        assert!(matches!(dup, Err(StoreError::Conflict(_))));
        assert!(ledger.find_by_reference("nope").unwrap().is_none());
    }

    #[test]
    fn attach_reference_to_pending_only() {
        let (storage, _dir) = temp_storage();
        let ledger = &storage.ledger;
        fund(ledger, "u1", Currency::Bnb, dec!(2));
        let pending = ledger
            .debit(NewTransaction::new("u1", TxKind::Withdrawal, Currency::Bnb, dec!(1)))
            .unwrap()
            .transaction;

        let updated = ledger.attach_reference(&pending.id, "0xhash").unwrap();
        assert_eq!(updated.reference.as_deref(), Some("0xhash"));
        assert_eq!(
            ledger.find_by_reference("0xhash").unwrap().unwrap().id,
            pending.id
        );

        ledger.resolve(&pending.id, Resolution::Complete).unwrap();
        assert!(matches!(
            ledger.attach_reference(&pending.id, "0xother"),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn list_for_user_paginates_newest_first() {
        let (storage, _dir) = temp_storage();
        let ledger = &storage.ledger;
        for i in 1..=5 {
            fund(ledger, "u1", Currency::Ngn, Decimal::from(i));
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        fund(ledger, "u2", Currency::Ngn, dec!(99));

        let (page1, cursor) = ledger.list_for_user("u1", None, 2).unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].amount, dec!(5));
        let (page2, cursor2) = ledger.list_for_user("u1", cursor.as_deref(), 2).unwrap();
        assert_eq!(page2.len(), 2);
        assert_eq!(page2[0].amount, dec!(3));
        let (page3, cursor3) = ledger.list_for_user("u1", cursor2.as_deref(), 2).unwrap();
        assert_eq!(page3.len(), 1);
        assert!(cursor3.is_none());
    }

    #[test]
    fn withdrawal_volume_skips_failed_and_other_kinds() {
        let (storage, _dir) = temp_storage();
        let ledger = &storage.ledger;
        fund(ledger, "u1", Currency::Usdt, dec!(1000));

        let ok = ledger
            .debit(
                NewTransaction::new("u1", TxKind::Withdrawal, Currency::Usdt, dec!(100))
                    .with_usd_value(dec!(100)),
            )
            .unwrap();
        let failed = ledger
            .debit(
                NewTransaction::new("u1", TxKind::Withdrawal, Currency::Usdt, dec!(200))
                    .with_usd_value(dec!(200)),
            )
            .unwrap();
        ledger
            .resolve(
                &failed.transaction.id,
                Resolution::FailAndReverse { reason: "x".into() },
            )
            .unwrap();
        ledger.resolve(&ok.transaction.id, Resolution::Complete).unwrap();

        let since = Utc::now() - chrono::Duration::hours(24);
        let volume = ledger.withdrawal_usd_volume_since("u1", since).unwrap();
        assert_eq!(volume, dec!(100));

        let future = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(
            ledger.withdrawal_usd_volume_since("u1", future).unwrap(),
            Decimal::ZERO
        );
    }

    #[test]
    fn prefix_sharing_user_ids_keep_separate_history() {
        let (storage, _dir) = temp_storage();
        let ledger = &storage.ledger;
        for user in ["u1", "u1|x", "u10"] {
            fund(ledger, user, Currency::Usdc, dec!(500));
        }

        ledger
            .debit(
                NewTransaction::new("u1", TxKind::Withdrawal, Currency::Usdc, dec!(150))
                    .with_usd_value(dec!(150)),
            )
            .unwrap();
        for user in ["u1|x", "u10"] {
            ledger
                .debit(
                    NewTransaction::new(user, TxKind::Withdrawal, Currency::Usdc, dec!(40))
                        .with_usd_value(dec!(40)),
                )
                .unwrap();
        }

        let since = Utc::now() - chrono::Duration::hours(24);
        assert_eq!(ledger.withdrawal_usd_volume_since("u1", since).unwrap(), dec!(150));
        assert_eq!(ledger.withdrawal_usd_volume_since("u1|x", since).unwrap(), dec!(40));

        let (history, _) = ledger.list_for_user("u1", None, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|t| t.user_id == "u1"));
    }

    #[test]
    fn pending_with_reference_filters() {
        let (storage, _dir) = temp_storage();
        let ledger = &storage.ledger;
        fund(ledger, "u1", Currency::Eth, dec!(3));
        let a = ledger
            .debit(NewTransaction::new("u1", TxKind::Withdrawal, Currency::Eth, dec!(1)))
            .unwrap()
            .transaction;
        ledger
            .debit(NewTransaction::new("u1", TxKind::Withdrawal, Currency::Eth, dec!(1)))
            .unwrap();
        ledger.attach_reference(&a.id, "0xaaa").unwrap();

        let pending = ledger.pending_with_reference(TxKind::Withdrawal).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id);
    }
}
