// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Orders and the product stock they consume.
//!
//! Product listings are owned elsewhere; this store keeps the price and
//! stock snapshot the settlement path needs and is the only writer of stock
//! counts. Reservation of a whole cart happens in one write transaction:
//! either every line is decremented or none is.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{
    decode_cursor, encode_cursor, get_json, make_index_key, make_prefix, make_prefix_end,
    split_index_key, StoreError, StoreResult, ORDERS, PRODUCTS, USER_ORDER_INDEX,
};
use crate::models::{Currency, OrderStatus, PaymentMethod, PaymentStatus};

// =============================================================================
// Records
// =============================================================================

/// Price and stock snapshot of a sellable product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Unit price in NGN.
    #[schema(value_type = String, example = "7500.00")]
    pub price: Decimal,
    pub stock: u32,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// One line of an order, with the price as charged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderLine {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
}

/// A timestamped status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrackingEvent {
    pub status: OrderStatus,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

/// Order record with embedded tracking history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: String,
    pub buyer_id: String,
    pub lines: Vec<OrderLine>,
    /// Sum of line totals, NGN.
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    #[schema(value_type = String)]
    pub shipping_fee: Decimal,
    /// `subtotal + shipping_fee`, NGN.
    #[schema(value_type = String)]
    pub total: Decimal,
    pub settlement_currency: Currency,
    #[schema(value_type = String)]
    pub settlement_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    /// Ledger transaction that paid for this order.
    pub transaction_id: Option<String>,
    pub status: OrderStatus,
    pub tracking_number: String,
    pub tracking: Vec<TrackingEvent>,
    /// Whether the order still holds its reserved stock.
    pub stock_reserved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Apply a status transition and append the tracking event.
    pub fn advance(&mut self, next: OrderStatus, note: Option<String>) -> StoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        self.status = next;
        self.tracking.push(TrackingEvent {
            status: next,
            note,
            at: now,
        });
        self.updated_at = now;
        Ok(())
    }

    pub fn reserved_lines(&self) -> Vec<(String, u32)> {
        self.lines
            .iter()
            .map(|l| (l.product_id.clone(), l.quantity))
            .collect()
    }
}

/// Everything needed to persist a new order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: String,
    pub buyer_id: String,
    pub lines: Vec<OrderLine>,
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub settlement_currency: Currency,
    pub settlement_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    pub transaction_id: Option<String>,
    pub status: OrderStatus,
    pub tracking_number: String,
}

impl NewOrder {
    fn into_order(self) -> Order {
        let now = Utc::now();
        Order {
            id: self.id,
            buyer_id: self.buyer_id,
            lines: self.lines,
            subtotal: self.subtotal,
            shipping_fee: self.shipping_fee,
            total: self.subtotal + self.shipping_fee,
            settlement_currency: self.settlement_currency,
            settlement_amount: self.settlement_amount,
            payment_method: self.payment_method,
            payment_status: self.payment_status,
            payment_reference: self.payment_reference,
            transaction_id: self.transaction_id,
            status: self.status,
            tracking_number: self.tracking_number,
            tracking: vec![TrackingEvent {
                status: self.status,
                note: None,
                at: now,
            }],
            stock_reserved: true,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// OrderStore
// =============================================================================

#[derive(Clone)]
pub struct OrderStore {
    db: Arc<Database>,
}

impl OrderStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    pub fn upsert_product(&self, product: &Product) -> StoreResult<()> {
        let json = serde_json::to_vec(product)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PRODUCTS)?;
            table.insert(product.id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_product(&self, product_id: &str) -> StoreResult<Option<Product>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PRODUCTS)?;
        get_json(&table, product_id)
    }

    /// Decrement stock for every line, or for none of them.
    pub fn reserve_stock(&self, lines: &[(String, u32)]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PRODUCTS)?;
            for (product_id, quantity) in lines {
                let mut product: Product = get_json(&table, product_id)?
                    .ok_or_else(|| StoreError::NotFound(format!("Product {product_id}")))?;
                if !product.active || product.stock < *quantity {
                    return Err(StoreError::OutOfStock {
                        product_id: product_id.clone(),
                    });
                }
                product.stock -= quantity;
                let json = serde_json::to_vec(&product)?;
                table.insert(product_id.as_str(), json.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Return previously reserved stock.
    pub fn release_stock(&self, lines: &[(String, u32)]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        restock(&write_txn, lines)?;
        write_txn.commit()?;
        Ok(())
    }

    // =========================================================================
    // Orders
    // =========================================================================

    pub fn insert_order(&self, new_order: NewOrder) -> StoreResult<Order> {
        let order = new_order.into_order();
        let json = serde_json::to_vec(&order)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ORDERS)?;
            if table.get(order.id.as_str())?.is_some() {
                return Err(StoreError::Conflict(format!("Order {} exists", order.id)));
            }
            table.insert(order.id.as_str(), json.as_slice())?;

            let mut idx = write_txn.open_table(USER_ORDER_INDEX)?;
            let key = make_index_key(
                &order.buyer_id,
                order.created_at.timestamp_millis(),
                &order.id,
            );
            idx.insert(key.as_slice(), ())?;
        }
        write_txn.commit()?;
        Ok(order)
    }

    pub fn get_order(&self, order_id: &str) -> StoreResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS)?;
        get_json(&table, order_id)
    }

    /// Atomic read-modify-write of one order.
    ///
    /// If the closure returns an error nothing is written.
    pub fn update_order<F>(&self, order_id: &str, f: F) -> StoreResult<Order>
    where
        F: FnOnce(&mut Order) -> StoreResult<()>,
    {
        let write_txn = self.db.begin_write()?;
        let order = {
            let mut table = write_txn.open_table(ORDERS)?;
            let mut order: Order = get_json(&table, order_id)?
                .ok_or_else(|| StoreError::NotFound(format!("Order {order_id}")))?;
            f(&mut order)?;
            order.updated_at = Utc::now();
            let json = serde_json::to_vec(&order)?;
            table.insert(order_id, json.as_slice())?;
            order
        };
        write_txn.commit()?;
        Ok(order)
    }

    /// Move an order to `next`.
    ///
    /// Cancelling an order that still holds its stock returns that stock in
    /// the same write transaction.
    pub fn transition(
        &self,
        order_id: &str,
        next: OrderStatus,
        note: Option<String>,
    ) -> StoreResult<Order> {
        let write_txn = self.db.begin_write()?;
        let order = {
            let mut table = write_txn.open_table(ORDERS)?;
            let mut order: Order = get_json(&table, order_id)?
                .ok_or_else(|| StoreError::NotFound(format!("Order {order_id}")))?;
            order.advance(next, note)?;

            if next == OrderStatus::Cancelled && order.stock_reserved {
                restock(&write_txn, &order.reserved_lines())?;
                order.stock_reserved = false;
            }

            let json = serde_json::to_vec(&order)?;
            table.insert(order_id, json.as_slice())?;
            order
        };
        write_txn.commit()?;
        Ok(order)
    }

    /// Paginated listing of a buyer's orders, newest first.
    pub fn list_for_user(
        &self,
        buyer_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> StoreResult<(Vec<Order>, Option<String>)> {
        let read_txn = self.db.begin_read()?;
        let idx_table = read_txn.open_table(USER_ORDER_INDEX)?;
        let orders = read_txn.open_table(ORDERS)?;

        let prefix = make_prefix(buyer_id);
        let prefix_end = make_prefix_end(buyer_id);
        let start = cursor
            .and_then(decode_cursor)
            .filter(|k| k.starts_with(&prefix))
            .unwrap_or_else(|| prefix.clone());

        let mut results = Vec::with_capacity(limit);
        let mut skip_first = cursor.is_some() && start != prefix;
        let mut last_key = None;

        for entry in idx_table.range(start.as_slice()..prefix_end.as_slice())? {
            let entry = entry?;
            let key_bytes = entry.0.value().to_vec();
            if skip_first {
                skip_first = false;
                continue;
            }
            if let Some((_, order_id)) = split_index_key(buyer_id, &key_bytes) {
                if let Some(order) = get_json::<Order>(&orders, &order_id)? {
                    if order.buyer_id == buyer_id {
                        results.push(order);
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
}

fn restock(write_txn: &WriteTransaction, lines: &[(String, u32)]) -> StoreResult<()> {
    let mut table = write_txn.open_table(PRODUCTS)?;
    for (product_id, quantity) in lines {
        let Some(mut product) = get_json::<Product>(&table, product_id)? else {
            tracing::warn!(product_id = %product_id, "Cannot restock unknown product");
            continue;
        };
        product.stock = product.stock.saturating_add(*quantity);
        let json = serde_json::to_vec(&product)?;
        table.insert(product_id.as_str(), json.as_slice())?;
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
