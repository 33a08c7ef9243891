// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Order reads for buyers, fulfilment updates and refunds for admins.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};
use utoipa::ToSchema;

use super::{SettlementEngine, SettlementError, SettlementResult, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::models::{OrderStatus, PaymentStatus};
use crate::storage::{AuditEvent, AuditEventType, Order, Resolution};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub next_cursor: Option<String>,
}

/// Result of an admin refund.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RefundReceipt {
    pub order: Order,
    pub transaction_id: String,
    #[schema(value_type = String)]
    pub new_balance: Decimal,
}

impl SettlementEngine {
    /// An order owned by `user_id`. Other users' orders are reported as
    /// missing.
    pub fn get_order(&self, user_id: &str, order_id: &str) -> SettlementResult<Order> {
        self.storage
            .orders
            .get_order(order_id)?
            .filter(|o| o.buyer_id == user_id)
            .ok_or_else(|| SettlementError::NotFound(format!("Order {order_id}")))
    }

    pub fn list_orders(
        &self,
        user_id: &str,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> SettlementResult<OrderPage> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let (orders, next_cursor) = self.storage.orders.list_for_user(user_id, cursor, limit)?;
        Ok(OrderPage {
            orders,
            next_cursor,
        })
    }

    /// Move an order along its fulfilment path.
    ///
    /// Paid orders leave the path only through [`Self::refund_order`];
    /// unpaid orders can only be cancelled.
    pub fn update_order_status(
        &self,
        admin_id: &str,
        order_id: &str,
        next: OrderStatus,
        note: Option<String>,
    ) -> SettlementResult<Order> {
        if next == OrderStatus::Refunded {
            return Err(SettlementError::InvalidRequest(
                "Use the refund endpoint to refund an order".into(),
            ));
        }

        let current = self
            .storage
            .orders
            .get_order(order_id)?
            .ok_or_else(|| SettlementError::NotFound(format!("Order {order_id}")))?;
        match (next, current.payment_status) {
            (OrderStatus::Cancelled, PaymentStatus::Paid) => {
                return Err(SettlementError::InvalidState(
                    "Paid orders must be refunded, not cancelled".into(),
                ));
            }
            (OrderStatus::Cancelled, _) => {}
            (_, PaymentStatus::Paid) => {}
            _ => {
                return Err(SettlementError::InvalidState(
                    "Order has not been paid".into(),
                ));
            }
        }

        let order = self.storage.orders.transition(order_id, next, note.clone())?;

        if next == OrderStatus::Cancelled && order.payment_status == PaymentStatus::Pending {
            // An abandoned gateway checkout: its pending charge will never settle
            self.storage.orders.update_order(order_id, |o| {
                o.payment_status = PaymentStatus::Failed;
                Ok(())
            })?;
            if let Some(tx_id) = &order.transaction_id {
                if let Err(e) = self.storage.ledger.resolve(
                    tx_id,
                    Resolution::Fail {
                        reason: "order cancelled".into(),
                    },
                ) {
                    error!(transaction_id = %tx_id, error = %e, "Failed to close payment entry");
                }
            }
            self.touched(&order.buyer_id);
        }

        info!(
            order_id = %order_id,
            admin_id = %admin_id,
            from = current.status.as_str(),
            to = next.as_str(),
            "Order status changed"
        );
        self.storage.audit.record(
            AuditEvent::new(AuditEventType::OrderStatusChanged)
                .with_user(admin_id)
                .with_resource("order", order_id)
                .with_details(json!({
                    "from": current.status.as_str(),
                    "to": next.as_str(),
                    "note": note,
                })),
        );

        Ok(self
            .storage
            .orders
            .get_order(order_id)?
            .unwrap_or(order))
    }

    /// Refund a paid order to the buyer's balance in its settlement
    /// currency. Stock is not returned.
    pub fn refund_order(
        &self,
        admin_id: &str,
        order_id: &str,
        reason: Option<String>,
    ) -> SettlementResult<RefundReceipt> {
        let (order, receipt) = self.storage.refund_order(order_id, reason.clone())?;
        self.touched(&order.buyer_id);

        info!(
            order_id = %order_id,
            admin_id = %admin_id,
            currency = %order.settlement_currency,
            amount = %order.settlement_amount,
            "Order refunded"
        );
        self.storage.audit.record(
            AuditEvent::new(AuditEventType::OrderRefunded)
                .with_user(admin_id)
                .with_resource("order", order_id)
                .with_details(json!({
                    "buyer_id": order.buyer_id,
                    "currency": order.settlement_currency.code(),
                    "amount": order.settlement_amount.to_string(),
                    "transaction_id": receipt.transaction.id,
                    "reason": reason,
                })),
        );

        Ok(RefundReceipt {
            transaction_id: receipt.transaction.id,
            new_balance: receipt.new_balance,
            order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Currency, PaymentMethod};
    use crate::settlement::{CartLine, CheckoutRequest};
    use crate::testing::Harness;
    use rust_decimal::dec;

    async fn wallet_order(h: &Harness) -> Order {
        h.fund("buyer", Currency::Ngn, dec!(50000));
        h.product("mug", dec!(5000), 4);
        h.engine
            .checkout(
                "buyer",
                CheckoutRequest {
                    lines: vec![CartLine {
                        product_id: "mug".into(),
                        quantity: 2,
                        unit_price: Some(dec!(5000)),
                    }],
                    payment: PaymentMethod::Wallet {
                        currency: Currency::Ngn,
                    },
                    email: None,
                },
            )
            .await
            .unwrap()
            .order
    }

    #[tokio::test]
    async fn buyers_only_see_their_own_orders() {
        let h = Harness::new();
        let order = wallet_order(&h).await;

        assert_eq!(h.engine.get_order("buyer", &order.id).unwrap().id, order.id);
        assert_eq!(
            h.engine.get_order("someone-else", &order.id).unwrap_err().code(),
            "NOT_FOUND"
        );
        assert_eq!(h.engine.list_orders("buyer", None, None).unwrap().orders.len(), 1);
        assert!(h
            .engine
            .list_orders("someone-else", None, None)
            .unwrap()
            .orders
            .is_empty());
    }

    #[tokio::test]
    async fn fulfilment_moves_forward_and_records_tracking() {
        let h = Harness::new();
        let order = wallet_order(&h).await;

        let shipped = h
            .engine
            .update_order_status("admin", &order.id, OrderStatus::Shipped, Some("courier".into()))
            .unwrap();
        assert_eq!(shipped.status, OrderStatus::Shipped);
        assert_eq!(shipped.tracking.last().unwrap().note.as_deref(), Some("courier"));

        let err = h
            .engine
            .update_order_status("admin", &order.id, OrderStatus::Confirmed, None)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");

        let err = h
            .engine
            .update_order_status("admin", &order.id, OrderStatus::Cancelled, None)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");

        let err = h
            .engine
            .update_order_status("admin", &order.id, OrderStatus::Refunded, None)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn refund_credits_buyer_once_without_restocking() {
        let h = Harness::new();
        let order = wallet_order(&h).await;
        assert_eq!(h.balance("buyer", Currency::Ngn), dec!(37500));

        let receipt = h
            .engine
            .refund_order("admin", &order.id, Some("damaged".into()))
            .unwrap();
        assert_eq!(receipt.order.status, OrderStatus::Refunded);
        assert_eq!(receipt.order.payment_status, PaymentStatus::Refunded);
        assert_eq!(receipt.new_balance, dec!(50000));
        assert_eq!(h.stock("mug"), 2);

        let err = h.engine.refund_order("admin", &order.id, None).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
        assert_eq!(h.balance("buyer", Currency::Ngn), dec!(50000));

        let events = h.engine.storage().audit.search_by_user("admin", 10).unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == AuditEventType::OrderRefunded));
    }

    #[tokio::test]
    async fn cancelling_unpaid_gateway_order_restocks() {
        let h = Harness::new();
        h.product("mug", dec!(5000), 4);
        let receipt = h
            .engine
            .checkout(
                "buyer",
                CheckoutRequest {
                    lines: vec![CartLine {
                        product_id: "mug".into(),
                        quantity: 3,
                        unit_price: None,
                    }],
                    payment: PaymentMethod::Gateway,
                    email: Some("buyer@example.com".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(h.stock("mug"), 1);

        let err = h
            .engine
            .update_order_status("admin", &receipt.order.id, OrderStatus::Shipped, None)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");

        let cancelled = h
            .engine
            .update_order_status("admin", &receipt.order.id, OrderStatus::Cancelled, None)
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.payment_status, PaymentStatus::Failed);
        assert_eq!(h.stock("mug"), 4);

        let err = h.engine.refund_order("admin", &receipt.order.id, None).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[tokio::test]
    async fn unknown_orders_are_not_found() {
        let h = Harness::new();
        assert_eq!(
            h.engine
                .update_order_status("admin", "nope", OrderStatus::Shipped, None)
                .unwrap_err()
                .code(),
            "NOT_FOUND"
        );
        assert_eq!(
            h.engine.refund_order("admin", "nope", None).unwrap_err().code(),
            "NOT_FOUND"
        );
    }
}
