// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Checkout: cart validation, payment and order creation.
//!
//! ```text
//! CART_VALIDATED -> FUNDS_RESERVED -> SETTLED -> ORDER_CREATED
//!        |                |               |
//!        +----------------+---------------+--> REJECTED (nothing kept)
//! ```
//!
//! Wallet payments run the whole machine in one request: stock is reserved,
//! the settlement currency is debited, the order is stored. A failure at
//! any step undoes the earlier ones before the error is returned.
//!
//! Gateway payments stop at a `PENDING` order holding its stock. The order
//! only becomes paid when the gateway's confirmation arrives through the
//! webhook; a failed charge cancels it and returns the stock.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::funding::{
    ensure_matches, ensure_success, verified_currency, ChargeSettlement, PURPOSE_ORDER_PAYMENT,
};
use super::{SettlementEngine, SettlementError, SettlementResult};
use crate::custody::CryptoError;
use crate::models::{Currency, OrderStatus, PaymentMethod, PaymentStatus, TxKind};
use crate::providers::gateway::{from_minor_units, to_minor_units};
use crate::providers::{ChargeRequest, ChargeVerification};
use crate::storage::{
    AuditEvent, AuditEventType, NewOrder, NewTransaction, Order, OrderLine, Resolution,
    StoreError,
};

/// Upper bound on distinct lines in one cart.
pub const MAX_CART_LINES: usize = 50;

const TRACKING_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TRACKING_SUFFIX_LEN: usize = 5;

/// One line of a submitted cart.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub product_id: String,
    pub quantity: u32,
    /// Unit price (NGN) the buyer saw. Checked against the current price
    /// when present; never used for charging.
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "7500.00")]
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub lines: Vec<CartLine>,
    pub payment: PaymentMethod,
    /// Receipt address for gateway payments.
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutReceipt {
    pub order: Order,
    pub transaction_id: String,
    /// Hosted payment page (gateway payments only).
    pub authorization_url: Option<String>,
    /// Balance of the settlement currency after the debit (wallet payments only).
    #[schema(value_type = Option<String>)]
    pub new_balance: Option<Decimal>,
}

/// A validated cart, priced from the current catalog.
struct PricedCart {
    lines: Vec<OrderLine>,
    subtotal: Decimal,
    shipping_fee: Decimal,
}

impl PricedCart {
    fn total(&self) -> Decimal {
        self.subtotal + self.shipping_fee
    }

    fn reservation(&self) -> Vec<(String, u32)> {
        self.lines
            .iter()
            .map(|l| (l.product_id.clone(), l.quantity))
            .collect()
    }
}

/// `GON-{YYYYMMDD}-{5 x [A-Z0-9]}`.
pub fn generate_tracking_number(
    rng: &SystemRandom,
    now: DateTime<Utc>,
) -> Result<String, CryptoError> {
    let mut suffix = String::with_capacity(TRACKING_SUFFIX_LEN);
    let mut buf = [0u8; 16];
    while suffix.len() < TRACKING_SUFFIX_LEN {
        rng.fill(&mut buf).map_err(|_| CryptoError::Rng)?;
        for &b in &buf {
            // 252 = 7 * 36; larger bytes would bias the first characters
            if b < 252 && suffix.len() < TRACKING_SUFFIX_LEN {
                suffix.push(TRACKING_ALPHABET[(b % 36) as usize] as char);
            }
        }
    }
    Ok(format!("GON-{}-{suffix}", now.format("%Y%m%d")))
}

impl SettlementEngine {
    pub async fn checkout(
        &self,
        buyer_id: &str,
        request: CheckoutRequest,
    ) -> SettlementResult<CheckoutReceipt> {
        let cart = self.price_cart(&request.lines)?;
        let order_id = uuid::Uuid::new_v4().to_string();
        let tracking_number = generate_tracking_number(&self.rng, Utc::now())?;

        match request.payment {
            PaymentMethod::Wallet { currency } => {
                self.checkout_from_wallet(buyer_id, order_id, tracking_number, cart, currency)
                    .await
            }
            PaymentMethod::Gateway => {
                let email = request
                    .email
                    .filter(|e| !e.trim().is_empty())
                    .ok_or_else(|| {
                        SettlementError::InvalidRequest("email is required for gateway payments".into())
                    })?;
                self.checkout_via_gateway(buyer_id, order_id, tracking_number, cart, &email)
                    .await
            }
        }
    }

    /// Re-read every product and price the cart server-side.
    fn price_cart(&self, lines: &[CartLine]) -> SettlementResult<PricedCart> {
        if lines.is_empty() {
            return Err(SettlementError::InvalidRequest("cart is empty".into()));
        }
        if lines.len() > MAX_CART_LINES {
            return Err(SettlementError::InvalidRequest(format!(
                "cart has more than {MAX_CART_LINES} lines"
            )));
        }

        let mut seen = HashSet::new();
        let mut priced = Vec::with_capacity(lines.len());
        let mut subtotal = Decimal::ZERO;
        let tolerance = Decimal::from(self.config.price_tolerance_bps) / Decimal::from(10_000);

        for line in lines {
            if line.quantity == 0 {
                return Err(SettlementError::InvalidRequest(format!(
                    "quantity for {} must be at least 1",
                    line.product_id
                )));
            }
            if !seen.insert(line.product_id.as_str()) {
                return Err(SettlementError::InvalidRequest(format!(
                    "product {} appears more than once",
                    line.product_id
                )));
            }

            let product = self
                .storage
                .orders
                .get_product(&line.product_id)?
                .filter(|p| p.active)
                .ok_or_else(|| {
                    SettlementError::StaleCart(format!(
                        "product {} is no longer available",
                        line.product_id
                    ))
                })?;

            if let Some(seen_price) = line.unit_price {
                let drift = (product.price - seen_price).abs();
                if drift > product.price * tolerance {
                    return Err(SettlementError::StaleCart(format!(
                        "price of {} changed",
                        line.product_id
                    )));
                }
            }
            if product.stock < line.quantity {
                return Err(SettlementError::OutOfStock {
                    product_id: line.product_id.clone(),
                });
            }

            subtotal += product.price * Decimal::from(line.quantity);
            priced.push(OrderLine {
                product_id: product.id,
                name: product.name,
                quantity: line.quantity,
                unit_price: product.price,
            });
        }

        Ok(PricedCart {
            lines: priced,
            subtotal,
            shipping_fee: self.config.shipping_fee_ngn,
        })
    }

    async fn checkout_from_wallet(
        &self,
        buyer_id: &str,
        order_id: String,
        tracking_number: String,
        cart: PricedCart,
        currency: Currency,
    ) -> SettlementResult<CheckoutReceipt> {
        // Quote before touching any state
        let rates = self.rates.get_rates().await;
        let amount = rates.convert(cart.total(), Currency::Ngn, currency)?;

        let reservation = cart.reservation();
        self.storage.orders.reserve_stock(&reservation)?;

        let receipt = match self.storage.ledger.debit(
            NewTransaction::new(buyer_id, TxKind::Payment, currency, amount).with_order(&order_id),
        ) {
            Ok(receipt) => receipt,
            Err(e) => {
                self.release(&order_id, &reservation);
                return Err(e.into());
            }
        };
        let tx_id = receipt.transaction.id.clone();

        let order = match self.storage.orders.insert_order(NewOrder {
            id: order_id.clone(),
            buyer_id: buyer_id.to_string(),
            subtotal: cart.subtotal,
            shipping_fee: cart.shipping_fee,
            lines: cart.lines,
            settlement_currency: currency,
            settlement_amount: amount,
            payment_method: PaymentMethod::Wallet { currency },
            payment_status: PaymentStatus::Paid,
            payment_reference: None,
            transaction_id: Some(tx_id.clone()),
            status: OrderStatus::Confirmed,
            tracking_number,
        }) {
            Ok(order) => order,
            Err(e) => {
                error!(order_id = %order_id, error = %e, "Order could not be stored, reversing payment");
                self.compensate_payment(&tx_id, "order could not be stored");
                self.release(&order_id, &reservation);
                self.touched(buyer_id);
                return Err(e.into());
            }
        };

        if let Err(e) = self.storage.ledger.resolve(&tx_id, Resolution::Complete) {
            // Funds and order are both in place; only the log status lags
            error!(transaction_id = %tx_id, error = %e, "Failed to complete payment entry");
        }
        self.touched(buyer_id);

        info!(
            order_id = %order.id,
            buyer_id = %buyer_id,
            currency = %currency,
            amount = %amount,
            total_ngn = %order.total,
            "Checkout settled from wallet"
        );
        self.storage.audit.record(
            AuditEvent::new(AuditEventType::CheckoutSettled)
                .with_user(buyer_id)
                .with_resource("order", &order.id)
                .with_details(json!({
                    "currency": currency.code(),
                    "amount": amount.to_string(),
                    "transaction_id": tx_id,
                })),
        );

        Ok(CheckoutReceipt {
            order,
            transaction_id: tx_id,
            authorization_url: None,
            new_balance: Some(receipt.new_balance),
        })
    }

    async fn checkout_via_gateway(
        &self,
        buyer_id: &str,
        order_id: String,
        tracking_number: String,
        cart: PricedCart,
        email: &str,
    ) -> SettlementResult<CheckoutReceipt> {
        let total = cart.total();
        let amount_minor = to_minor_units(total, Currency::Ngn)
            .ok_or_else(|| SettlementError::invalid_amount("order total is out of range"))?;
        let reference = format!("gon-ord-{order_id}");

        let reservation = cart.reservation();
        self.storage.orders.reserve_stock(&reservation)?;

        let record = match self.storage.ledger.record_transaction(
            NewTransaction::new(buyer_id, TxKind::Payment, Currency::Ngn, total)
                .with_reference(&reference)
                .with_order(&order_id),
        ) {
            Ok(record) => record,
            Err(e) => {
                self.release(&order_id, &reservation);
                return Err(e.into());
            }
        };

        let order = match self.storage.orders.insert_order(NewOrder {
            id: order_id.clone(),
            buyer_id: buyer_id.to_string(),
            subtotal: cart.subtotal,
            shipping_fee: cart.shipping_fee,
            lines: cart.lines,
            settlement_currency: Currency::Ngn,
            settlement_amount: total,
            payment_method: PaymentMethod::Gateway,
            payment_status: PaymentStatus::Pending,
            payment_reference: Some(reference.clone()),
            transaction_id: Some(record.id.clone()),
            status: OrderStatus::Pending,
            tracking_number,
        }) {
            Ok(order) => order,
            Err(e) => {
                self.fail_entry(&record.id, "order could not be stored");
                self.release(&order_id, &reservation);
                return Err(e.into());
            }
        };
        self.touched(buyer_id);

        let charge = ChargeRequest {
            reference: reference.clone(),
            amount_minor,
            currency: Currency::Ngn,
            email: email.trim().to_string(),
            metadata: json!({
                "purpose": PURPOSE_ORDER_PAYMENT,
                "order_id": order_id,
                "user_id": buyer_id,
            }),
        };
        let init = match self.gateway.initiate_charge(&charge).await {
            Ok(init) => init,
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "Gateway charge failed, cancelling order");
                self.cancel_unpaid(&order_id, &record.id, "payment could not be initiated");
                self.touched(buyer_id);
                return Err(e.into());
            }
        };

        info!(order_id = %order_id, reference = %reference, total_ngn = %total, "Checkout awaiting gateway payment");
        Ok(CheckoutReceipt {
            order,
            transaction_id: record.id,
            authorization_url: init.authorization_url,
            new_balance: None,
        })
    }

    /// Mark a gateway-paid order as paid after a verified charge.
    ///
    /// If the order was cancelled before the money arrived, the charge is
    /// credited to the buyer's NGN balance as a refund instead.
    pub fn confirm_order_payment(
        &self,
        reference: &str,
        verification: &ChargeVerification,
    ) -> SettlementResult<ChargeSettlement> {
        ensure_success(verification)?;
        let currency = verified_currency(verification)?;
        let amount = from_minor_units(verification.amount_minor, currency);

        let record = self
            .storage
            .ledger
            .find_by_reference(reference)?
            .filter(|r| r.kind == TxKind::Payment)
            .ok_or_else(|| SettlementError::NotFound(format!("Order payment {reference}")))?;
        let order_id = record
            .order_id
            .clone()
            .ok_or_else(|| SettlementError::InvalidState(format!("{reference} has no order")))?;
        ensure_matches(&record, amount, currency)?;

        let order = self
            .storage
            .orders
            .get_order(&order_id)?
            .ok_or_else(|| SettlementError::NotFound(format!("Order {order_id}")))?;

        match (order.status, order.payment_status) {
            (_, PaymentStatus::Paid | PaymentStatus::Refunded) => {
                return Ok(ChargeSettlement::Duplicate);
            }
            (OrderStatus::Pending, PaymentStatus::Pending) => {}
            _ => return self.refund_late_charge(&record.id, reference, &order, amount),
        }

        let order = self.storage.orders.update_order(&order_id, |order| {
            order.advance(OrderStatus::Confirmed, Some("payment confirmed".into()))?;
            order.payment_status = PaymentStatus::Paid;
            Ok(())
        })?;
        if let Err(e) = self.storage.ledger.resolve(&record.id, Resolution::Complete) {
            error!(transaction_id = %record.id, error = %e, "Failed to complete payment entry");
        }
        self.touched(&order.buyer_id);

        info!(order_id = %order_id, reference = %reference, "Gateway payment confirmed");
        self.storage.audit.record(
            AuditEvent::new(AuditEventType::CheckoutSettled)
                .with_user(&order.buyer_id)
                .with_resource("order", &order_id)
                .with_details(json!({ "reference": reference, "amount": amount.to_string() })),
        );
        Ok(ChargeSettlement::Applied)
    }

    /// A gateway charge for an order failed: cancel it and return its stock.
    pub fn fail_order_payment(
        &self,
        reference: &str,
        reason: &str,
    ) -> SettlementResult<ChargeSettlement> {
        let record = self
            .storage
            .ledger
            .find_by_reference(reference)?
            .filter(|r| r.kind == TxKind::Payment)
            .ok_or_else(|| SettlementError::NotFound(format!("Order payment {reference}")))?;
        if record.status.is_terminal() {
            return Ok(ChargeSettlement::Duplicate);
        }
        let order_id = record
            .order_id
            .clone()
            .ok_or_else(|| SettlementError::InvalidState(format!("{reference} has no order")))?;

        self.cancel_unpaid(&order_id, &record.id, reason);
        self.touched(&record.user_id);
        info!(order_id = %order_id, reference = %reference, reason = %reason, "Gateway payment failed");
        Ok(ChargeSettlement::Applied)
    }

    /// Money arrived for an order that can no longer be fulfilled. The buyer
    /// is credited once, keyed by a reference derived from the charge.
    fn refund_late_charge(
        &self,
        payment_id: &str,
        reference: &str,
        order: &Order,
        amount: Decimal,
    ) -> SettlementResult<ChargeSettlement> {
        if let Err(e) = self.storage.ledger.resolve(payment_id, Resolution::Complete) {
            error!(transaction_id = %payment_id, error = %e, "Failed to complete payment entry");
        }
        let credited = self.storage.ledger.credit(
            NewTransaction::new(&order.buyer_id, TxKind::Refund, Currency::Ngn, amount)
                .completed()
                .with_reference(format!("{reference}:refund"))
                .with_order(&order.id),
        );
        match credited {
            Ok(_) => {
                warn!(order_id = %order.id, status = order.status.as_str(), "Charge confirmed for closed order, crediting buyer");
                self.touched(&order.buyer_id);
                Ok(ChargeSettlement::Applied)
            }
            Err(StoreError::Conflict(_)) => Ok(ChargeSettlement::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    /// Cancel a pending order (returning its stock) and fail its payment entry.
    fn cancel_unpaid(&self, order_id: &str, payment_id: &str, reason: &str) {
        let cancelled = self.storage.orders.transition(
            order_id,
            OrderStatus::Cancelled,
            Some(reason.to_string()),
        );
        match cancelled {
            Ok(_) => {
                if let Err(e) = self.storage.orders.update_order(order_id, |order| {
                    order.payment_status = PaymentStatus::Failed;
                    Ok(())
                }) {
                    error!(order_id = %order_id, error = %e, "Failed to mark payment failed");
                }
            }
            Err(e) => error!(order_id = %order_id, error = %e, "Failed to cancel unpaid order"),
        }
        self.fail_entry(payment_id, reason);
    }

    fn fail_entry(&self, tx_id: &str, reason: &str) {
        if let Err(e) = self.storage.ledger.resolve(
            tx_id,
            Resolution::Fail {
                reason: reason.to_string(),
            },
        ) {
            error!(transaction_id = %tx_id, error = %e, "Failed to mark entry failed");
        }
    }

    /// Credit back a debited payment and mark it failed.
    fn compensate_payment(&self, tx_id: &str, reason: &str) {
        if let Err(e) = self.storage.ledger.resolve(
            tx_id,
            Resolution::FailAndReverse {
                reason: reason.to_string(),
            },
        ) {
            error!(transaction_id = %tx_id, error = %e, "Payment reversal failed; manual reconciliation required");
        }
    }

    fn release(&self, order_id: &str, reservation: &[(String, u32)]) {
        if let Err(e) = self.storage.orders.release_stock(reservation) {
            error!(order_id = %order_id, error = %e, "Failed to release reserved stock");
        }
    }
}
