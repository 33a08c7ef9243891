// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Webhook Reconciler
//!
//! Applies delayed confirmations from the payment gateway to the ledger and
//! to orders.
//!
//! Every delivery is authenticated first: the gateway signs the raw body
//! with HMAC-SHA512 under the shared webhook secret and sends the hex
//! digest in `x-paystack-signature`. The comparison is constant-time.
//!
//! Charge successes are never trusted as delivered; the charge is
//! re-verified with the gateway before anything is credited. Deliveries are
//! idempotent: a replayed event resolves to [`WebhookOutcome::Duplicate`].

use alloy::primitives::hex;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha512;
use tracing::{error, info, warn};

use crate::models::TxKind;
use crate::settlement::funding::{PURPOSE_ORDER_PAYMENT, PURPOSE_WALLET_TOPUP};
use crate::settlement::{ChargeSettlement, SettlementEngine, SettlementError, TransferOutcome};
use crate::storage::{AuditEvent, AuditEventType};

/// Header carrying the hex HMAC-SHA512 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Webhook signature is missing or invalid")]
    InvalidSignature,

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

/// What a delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    /// Already reconciled by an earlier delivery.
    Duplicate,
    /// Not an event this service acts on.
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

impl From<ChargeSettlement> for WebhookOutcome {
    fn from(settlement: ChargeSettlement) -> Self {
        match settlement {
            ChargeSettlement::Applied => WebhookOutcome::Applied,
            ChargeSettlement::Duplicate => WebhookOutcome::Duplicate,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GatewayEvent {
    event: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    reference: String,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    gateway_response: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl EventData {
    /// Metadata arrives either as an object or as a JSON-encoded string.
    fn metadata_field(&self, key: &str) -> Option<String> {
        let parsed;
        let metadata = match &self.metadata {
            Value::String(raw) => {
                parsed = serde_json::from_str::<Value>(raw).ok()?;
                &parsed
            }
            other => other,
        };
        metadata.get(key)?.as_str().map(str::to_string)
    }

    fn failure_reason(&self) -> String {
        self.reason
            .clone()
            .or_else(|| self.gateway_response.clone())
            .unwrap_or_else(|| "reported failed by gateway".to_string())
    }
}

/// Which internal flow a charge belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChargePurpose {
    Topup,
    OrderPayment,
}

#[derive(Clone)]
pub struct WebhookReconciler {
    engine: SettlementEngine,
    secret: Vec<u8>,
}

impl WebhookReconciler {
    pub fn new(engine: SettlementEngine, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            engine,
            secret: secret.into(),
        }
    }

    /// Check the signature of a raw body.
    pub fn verify_signature(&self, body: &[u8], signature: Option<&str>) -> Result<(), WebhookError> {
        let provided = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| hex::decode(s).ok())
            .ok_or(WebhookError::InvalidSignature)?;

        let mut mac =
            HmacSha512::new_from_slice(&self.secret).map_err(|_| WebhookError::InvalidSignature)?;
        mac.update(body);
        mac.verify_slice(&provided)
            .map_err(|_| WebhookError::InvalidSignature)
    }

    /// Authenticate and apply one delivery.
    pub async fn handle(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookError> {
        if let Err(e) = self.verify_signature(body, signature) {
            error!(body_len = body.len(), "Webhook signature rejected");
            self.engine.storage().audit.record(
                AuditEvent::new(AuditEventType::WebhookRejected)
                    .with_details(json!({ "body_len": body.len() }))
                    .failed("signature mismatch"),
            );
            return Err(e);
        }

        let event: GatewayEvent = serde_json::from_slice(body)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
        let reference = event.data.reference.as_str();

        let outcome = match event.event.as_str() {
            "charge.success" => self.charge_succeeded(&event.data).await?,
            "charge.failed" => self.charge_failed(&event.data)?,
            "transfer.success" => self.transfer_finished(reference, TransferOutcome::Confirmed)?,
            "transfer.failed" | "transfer.reversed" => self.transfer_finished(
                reference,
                TransferOutcome::Failed(event.data.failure_reason()),
            )?,
            other => {
                warn!(event = %other, reference = %reference, "Unhandled webhook event");
                WebhookOutcome::Ignored
            }
        };

        info!(event = %event.event, reference = %reference, outcome = outcome.as_str(), "Webhook processed");
        if outcome == WebhookOutcome::Applied {
            self.engine.storage().audit.record(
                AuditEvent::new(AuditEventType::WebhookReconciled)
                    .with_resource("reference", reference)
                    .with_details(json!({ "event": event.event })),
            );
        }
        Ok(outcome)
    }

    async fn charge_succeeded(&self, data: &EventData) -> Result<WebhookOutcome, WebhookError> {
        let Some(purpose) = self.purpose(data)? else {
            warn!(reference = %data.reference, "Charge for unknown purpose");
            return Ok(WebhookOutcome::Ignored);
        };

        let verification = self
            .engine
            .gateway()
            .verify_charge(&data.reference)
            .await
            .map_err(SettlementError::from)?;

        let settled = match purpose {
            ChargePurpose::Topup => self.engine.complete_topup(
                &data.reference,
                &verification,
                data.metadata_field("user_id").as_deref(),
            )?,
            ChargePurpose::OrderPayment => self
                .engine
                .confirm_order_payment(&data.reference, &verification)?,
        };
        Ok(settled.into())
    }

    fn charge_failed(&self, data: &EventData) -> Result<WebhookOutcome, WebhookError> {
        let Some(purpose) = self.purpose(data)? else {
            return Ok(WebhookOutcome::Ignored);
        };
        let reason = data.failure_reason();
        let settled = match purpose {
            ChargePurpose::Topup => self.engine.fail_topup(&data.reference, &reason),
            ChargePurpose::OrderPayment => self.engine.fail_order_payment(&data.reference, &reason),
        };
        match settled {
            Ok(settled) => Ok(settled.into()),
            // A failed charge we never recorded has nothing to undo
            Err(SettlementError::NotFound(_)) => Ok(WebhookOutcome::Ignored),
            Err(e) => Err(e.into()),
        }
    }

    fn transfer_finished(
        &self,
        reference: &str,
        outcome: TransferOutcome,
    ) -> Result<WebhookOutcome, WebhookError> {
        match self.engine.reconcile_transfer(reference, outcome)? {
            Some(settled) if settled.was_applied() => Ok(WebhookOutcome::Applied),
            Some(_) => Ok(WebhookOutcome::Duplicate),
            None => {
                warn!(reference = %reference, "Transfer event for unknown reference");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    /// Purpose from metadata, or from the kind of the recorded entry.
    fn purpose(&self, data: &EventData) -> Result<Option<ChargePurpose>, WebhookError> {
        match data.metadata_field("purpose").as_deref() {
            Some(PURPOSE_WALLET_TOPUP) => return Ok(Some(ChargePurpose::Topup)),
            Some(PURPOSE_ORDER_PAYMENT) => return Ok(Some(ChargePurpose::OrderPayment)),
            _ => {}
        }
        let record = self
            .engine
            .storage()
            .ledger
            .find_by_reference(&data.reference)
            .map_err(SettlementError::from)?;
        Ok(record.and_then(|r| match r.kind {
            TxKind::Deposit => Some(ChargePurpose::Topup),
            TxKind::Payment => Some(ChargePurpose::OrderPayment),
            _ => None,
        }))
    }
}

/// Hex HMAC-SHA512 of `body`, as the gateway computes it.
#[cfg(test)]
pub(crate) fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha512::new_from_slice(secret).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chain, Currency, OrderStatus, PaymentMethod, PaymentStatus, TxStatus};
    use crate::settlement::{CartLine, CheckoutRequest, WithdrawalRequest};
    use crate::testing::Harness;
    use rust_decimal::dec;
    use rust_decimal::Decimal;

    const SECRET: &[u8] = b"whsec_test";

    fn reconciler(h: &Harness) -> WebhookReconciler {
        WebhookReconciler::new(h.engine.clone(), SECRET)
    }

    fn body(event: &str, data: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({ "event": event, "data": data })).unwrap()
    }

    async fn deliver(r: &WebhookReconciler, body: &[u8]) -> Result<WebhookOutcome, WebhookError> {
        let signature = sign(SECRET, body);
        r.handle(body, Some(&signature)).await
    }

    #[tokio::test]
    async fn bad_or_missing_signatures_are_rejected() {
        let h = Harness::new();
        let r = reconciler(&h);
        let payload = body("charge.success", json!({ "reference": "x" }));

        assert!(matches!(
            r.handle(&payload, None).await,
            Err(WebhookError::InvalidSignature)
        ));
        assert!(matches!(
            r.handle(&payload, Some("zz-not-hex")).await,
            Err(WebhookError::InvalidSignature)
        ));
        let forged = sign(b"other-secret", &payload);
        assert!(matches!(
            r.handle(&payload, Some(&forged)).await,
            Err(WebhookError::InvalidSignature)
        ));

        // Signature over a different body
        let signature = sign(SECRET, b"{}");
        assert!(matches!(
            r.handle(&payload, Some(&signature)).await,
            Err(WebhookError::InvalidSignature)
        ));

        let rejected = h.engine.storage().audit.recent(10).unwrap();
        assert!(rejected
            .iter()
            .all(|e| e.event_type == AuditEventType::WebhookRejected && !e.success));
    }

    #[tokio::test]
    async fn replayed_topup_credits_once() {
        let h = Harness::new();
        let r = reconciler(&h);
        let init = h
            .engine
            .initiate_topup("u1", dec!(5000), "u1@example.com")
            .await
            .unwrap();

        let payload = body(
            "charge.success",
            json!({
                "reference": init.reference,
                "amount": 500000,
                "currency": "NGN",
                "metadata": { "purpose": "wallet_topup", "user_id": "u1" },
            }),
        );
        assert_eq!(deliver(&r, &payload).await.unwrap(), WebhookOutcome::Applied);
        assert_eq!(deliver(&r, &payload).await.unwrap(), WebhookOutcome::Duplicate);
        assert_eq!(deliver(&r, &payload).await.unwrap(), WebhookOutcome::Duplicate);
        assert_eq!(h.balance("u1", Currency::Ngn), dec!(5000));
    }

    #[tokio::test]
    async fn unverifiable_charge_is_not_credited() {
        let h = Harness::new();
        let r = reconciler(&h);
        let init = h
            .engine
            .initiate_topup("u1", dec!(5000), "u1@example.com")
            .await
            .unwrap();
        h.gateway.verifications.lock().unwrap().insert(
            init.reference.clone(),
            crate::providers::ChargeVerification {
                status: crate::providers::ChargeStatus::Pending,
                amount_minor: 500_000,
                currency: "NGN".into(),
            },
        );

        let payload = body(
            "charge.success",
            json!({ "reference": init.reference, "metadata": { "purpose": "wallet_topup" } }),
        );
        assert!(deliver(&r, &payload).await.is_err());
        assert_eq!(h.balance("u1", Currency::Ngn), Decimal::ZERO);
    }

    #[tokio::test]
    async fn order_payment_is_confirmed_by_charge_success() {
        let h = Harness::new();
        let r = reconciler(&h);
        h.product("tee", dec!(7500), 3);
        let receipt = h
            .engine
            .checkout(
                "u1",
                CheckoutRequest {
                    lines: vec![CartLine {
                        product_id: "tee".into(),
                        quantity: 1,
                        unit_price: None,
                    }],
                    payment: PaymentMethod::Gateway,
                    email: Some("u1@example.com".into()),
                },
            )
            .await
            .unwrap();
        let reference = receipt.order.payment_reference.clone().unwrap();

        // Metadata stringified, as some gateway dashboards send it
        let payload = body(
            "charge.success",
            json!({
                "reference": reference,
                "metadata": "{\"purpose\":\"order_payment\"}",
            }),
        );
        assert_eq!(deliver(&r, &payload).await.unwrap(), WebhookOutcome::Applied);

        let order = h.engine.get_order("u1", &receipt.order.id).unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn charge_failed_cancels_pending_order() {
        let h = Harness::new();
        let r = reconciler(&h);
        h.product("tee", dec!(7500), 3);
        let receipt = h
            .engine
            .checkout(
                "u1",
                CheckoutRequest {
                    lines: vec![CartLine {
                        product_id: "tee".into(),
                        quantity: 2,
                        unit_price: None,
                    }],
                    payment: PaymentMethod::Gateway,
                    email: Some("u1@example.com".into()),
                },
            )
            .await
            .unwrap();
        let reference = receipt.order.payment_reference.clone().unwrap();

        // No metadata: purpose is inferred from the recorded entry
        let payload = body(
            "charge.failed",
            json!({ "reference": reference, "gateway_response": "Declined" }),
        );
        assert_eq!(deliver(&r, &payload).await.unwrap(), WebhookOutcome::Applied);
        assert_eq!(deliver(&r, &payload).await.unwrap(), WebhookOutcome::Duplicate);
        assert_eq!(h.stock("tee"), 3);
    }

    #[tokio::test]
    async fn transfer_failed_credits_back_once() {
        let h = Harness::new();
        let r = reconciler(&h);
        h.verified_user("u1").await;
        h.fund("u1", Currency::Usdt, dec!(40));
        let receipt = h
            .engine
            .withdraw(
                "u1",
                WithdrawalRequest {
                    currency: Currency::Usdt,
                    chain: Chain::Polygon,
                    amount: dec!(40),
                    destination: "0x2222222222222222222222222222222222222222".into(),
                    two_factor_code: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(h.balance("u1", Currency::Usdt), Decimal::ZERO);

        let payload = body(
            "transfer.failed",
            json!({ "reference": receipt.tx_hash, "reason": "reverted" }),
        );
        assert_eq!(deliver(&r, &payload).await.unwrap(), WebhookOutcome::Applied);
        assert_eq!(deliver(&r, &payload).await.unwrap(), WebhookOutcome::Duplicate);
        assert_eq!(h.balance("u1", Currency::Usdt), dec!(40));

        let record = h
            .engine
            .storage()
            .ledger
            .get_transaction(&receipt.transaction.id)
            .unwrap()
            .unwrap();
        assert_eq!(record.status, TxStatus::Failed);
        assert_eq!(record.failure_reason.as_deref(), Some("reverted"));
    }

    #[tokio::test]
    async fn unknown_events_and_references_are_ignored() {
        let h = Harness::new();
        let r = reconciler(&h);

        let payload = body("subscription.create", json!({ "reference": "sub_1" }));
        assert_eq!(deliver(&r, &payload).await.unwrap(), WebhookOutcome::Ignored);

        let payload = body("transfer.success", json!({ "reference": "0xnothing" }));
        assert_eq!(deliver(&r, &payload).await.unwrap(), WebhookOutcome::Ignored);

        let malformed = b"{\"event\":\"charge.success\"}".to_vec();
        assert!(matches!(
            deliver(&r, &malformed).await,
            Err(WebhookError::MalformedPayload(_))
        ));
    }
}
