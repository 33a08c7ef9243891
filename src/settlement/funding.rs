// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet top-ups through the payment gateway.
//!
//! A top-up is recorded as a `PENDING` deposit keyed by the gateway
//! reference and credited only when the gateway confirms the charge. The
//! reference index makes that credit happen at most once.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::{validate_amount, SettlementEngine, SettlementError, SettlementResult};
use crate::models::{Currency, TxKind};
use crate::providers::gateway::{from_minor_units, to_minor_units};
use crate::providers::{ChargeRequest, ChargeStatus, ChargeVerification};
use crate::storage::{NewTransaction, Resolution, StoreError, TransactionRecord};

/// Metadata `purpose` values echoed back by the gateway.
pub const PURPOSE_WALLET_TOPUP: &str = "wallet_topup";
pub const PURPOSE_ORDER_PAYMENT: &str = "order_payment";

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TopupInit {
    pub reference: String,
    pub transaction_id: String,
    pub authorization_url: Option<String>,
}

/// What reconciling a gateway charge did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeSettlement {
    /// This call moved the money.
    Applied,
    /// Already reconciled earlier; nothing changed.
    Duplicate,
}

impl SettlementEngine {
    /// Open a gateway charge that credits the user's NGN balance once paid.
    pub async fn initiate_topup(
        &self,
        user_id: &str,
        amount: Decimal,
        email: &str,
    ) -> SettlementResult<TopupInit> {
        validate_amount(amount, Currency::Ngn)?;
        let amount_minor = to_minor_units(amount, Currency::Ngn)
            .ok_or_else(|| SettlementError::invalid_amount("amount is out of range"))?;
        if email.trim().is_empty() {
            return Err(SettlementError::InvalidRequest("email is required".into()));
        }

        let reference = format!("gon-top-{}", uuid::Uuid::new_v4());
        let record = self.storage.ledger.record_transaction(
            NewTransaction::new(user_id, TxKind::Deposit, Currency::Ngn, amount)
                .with_reference(&reference),
        )?;
        self.touched(user_id);

        let charge = ChargeRequest {
            reference: reference.clone(),
            amount_minor,
            currency: Currency::Ngn,
            email: email.trim().to_string(),
            metadata: json!({ "purpose": PURPOSE_WALLET_TOPUP, "user_id": user_id }),
        };
        match self.gateway.initiate_charge(&charge).await {
            Ok(init) => {
                info!(user_id = %user_id, reference = %reference, amount = %amount, "Top-up initiated");
                Ok(TopupInit {
                    reference,
                    transaction_id: record.id,
                    authorization_url: init.authorization_url,
                })
            }
            Err(e) => {
                warn!(user_id = %user_id, reference = %reference, error = %e, "Top-up initiation failed");
                self.storage.ledger.resolve(
                    &record.id,
                    Resolution::Fail {
                        reason: "gateway unavailable".into(),
                    },
                )?;
                self.touched(user_id);
                Err(e.into())
            }
        }
    }

    /// Credit a verified successful top-up charge.
    ///
    /// A charge without a local record (opened outside this service) is
    /// credited to `user_hint` as a completed deposit. Replays are reported
    /// as [`ChargeSettlement::Duplicate`].
    pub fn complete_topup(
        &self,
        reference: &str,
        verification: &ChargeVerification,
        user_hint: Option<&str>,
    ) -> SettlementResult<ChargeSettlement> {
        ensure_success(verification)?;
        let currency = verified_currency(verification)?;
        let amount = from_minor_units(verification.amount_minor, currency);

        let Some(record) = self.storage.ledger.find_by_reference(reference)? else {
            let user_id = user_hint.ok_or_else(|| {
                SettlementError::NotFound(format!("Top-up {reference}"))
            })?;
            return match self.storage.ledger.credit(
                NewTransaction::new(user_id, TxKind::Deposit, currency, amount)
                    .completed()
                    .with_reference(reference),
            ) {
                Ok(_) => {
                    info!(user_id = %user_id, reference = %reference, amount = %amount, "Unsolicited top-up credited");
                    self.touched(user_id);
                    Ok(ChargeSettlement::Applied)
                }
                // Lost a race against a concurrent delivery of the same event
                Err(StoreError::Conflict(_)) => Ok(ChargeSettlement::Duplicate),
                Err(e) => Err(e.into()),
            };
        };

        if record.kind != TxKind::Deposit {
            return Err(SettlementError::InvalidState(format!(
                "Reference {reference} is not a top-up"
            )));
        }
        ensure_matches(&record, amount, currency)?;

        let settled = self
            .storage
            .ledger
            .resolve(&record.id, Resolution::CompleteAndCredit)?;
        if !settled.was_applied() {
            return Ok(ChargeSettlement::Duplicate);
        }
        info!(user_id = %record.user_id, reference = %reference, amount = %amount, "Top-up credited");
        self.touched(&record.user_id);
        Ok(ChargeSettlement::Applied)
    }

    /// Mark a top-up as failed. Nothing was credited, so nothing is reversed.
    pub fn fail_topup(&self, reference: &str, reason: &str) -> SettlementResult<ChargeSettlement> {
        let record = self
            .storage
            .ledger
            .find_by_reference(reference)?
            .ok_or_else(|| SettlementError::NotFound(format!("Top-up {reference}")))?;
        if record.kind != TxKind::Deposit {
            return Err(SettlementError::InvalidState(format!(
                "Reference {reference} is not a top-up"
            )));
        }
        let settled = self.storage.ledger.resolve(
            &record.id,
            Resolution::Fail {
                reason: reason.to_string(),
            },
        )?;
        self.touched(&record.user_id);
        Ok(if settled.was_applied() {
            ChargeSettlement::Applied
        } else {
            ChargeSettlement::Duplicate
        })
    }
}

pub(crate) fn ensure_success(verification: &ChargeVerification) -> SettlementResult<()> {
    if verification.status != ChargeStatus::Success {
        return Err(SettlementError::InvalidState(
            "Gateway does not report the charge as successful".into(),
        ));
    }
    Ok(())
}

pub(crate) fn verified_currency(verification: &ChargeVerification) -> SettlementResult<Currency> {
    verification
        .currency
        .parse::<Currency>()
        .map_err(SettlementError::UnsupportedCurrency)
}

/// The gateway must have collected exactly what was recorded.
pub(crate) fn ensure_matches(
    record: &TransactionRecord,
    amount: Decimal,
    currency: Currency,
) -> SettlementResult<()> {
    if record.currency != currency || record.amount != amount {
        warn!(
            transaction_id = %record.id,
            expected = %record.amount,
            expected_currency = %record.currency,
            received = %amount,
            received_currency = %currency,
            "Charge does not match recorded amount"
        );
        return Err(SettlementError::InvalidState(
            "Charge amount does not match the recorded transaction".into(),
        ));
    }
    Ok(())
}
