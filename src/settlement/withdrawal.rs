// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! On-chain withdrawals from custodial wallets.
//!
//! Checks run cheapest first and none of them mutate state: identity,
//! second factor, USD limits, destination, ledger funds, then on-chain
//! balances. Only then is the ledger debited (as a `PENDING` withdrawal)
//! and the transfer broadcast. If no transaction hash comes back the debit
//! is reversed before the error is returned.
//!
//! Confirmation is not awaited. The entry stays `PENDING` until the
//! receipt poller or a transfer webhook resolves it through
//! [`SettlementEngine::reconcile_transfer`].

use std::str::FromStr;

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::{validate_amount, SettlementEngine, SettlementError, SettlementResult};
use crate::blockchain::{
    network, parse_address, to_base_units, token_deployment, TransferAsset, TransferRequest,
};
use crate::models::{Chain, Currency, TxKind};
use crate::storage::{AuditEvent, AuditEventType, NewTransaction, Resolution, Settled, TransactionRecord};

const NATIVE_DECIMALS: u8 = 18;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct WithdrawalRequest {
    pub currency: Currency,
    pub chain: Chain,
    #[schema(value_type = String, example = "25.5")]
    pub amount: Decimal,
    /// `0x`-prefixed EVM address.
    pub destination: String,
    /// Required when the user has enabled a second factor.
    #[serde(default)]
    pub two_factor_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WithdrawalReceipt {
    /// The `PENDING` withdrawal entry, keyed by the transaction hash.
    pub transaction: TransactionRecord,
    pub tx_hash: String,
    pub explorer_url: String,
}

/// Final on-chain result of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Confirmed,
    Failed(String),
}

/// Which asset a (currency, chain) pair moves and at what precision.
fn resolve_asset(currency: Currency, chain: Chain) -> SettlementResult<(TransferAsset, u8)> {
    if !currency.is_crypto() {
        return Err(SettlementError::UnsupportedCurrency(format!(
            "{currency} cannot be withdrawn on-chain"
        )));
    }
    if currency.native_chain() == Some(chain) {
        return Ok((TransferAsset::Native, NATIVE_DECIMALS));
    }
    let deployment = token_deployment(chain, currency).ok_or_else(|| {
        SettlementError::UnsupportedNetwork(format!("{currency} is not available on {chain}"))
    })?;
    let contract = Address::from_str(deployment.address)
        .map_err(|e| SettlementError::Internal(format!("bad token address: {e}")))?;
    Ok((TransferAsset::Token { contract }, deployment.decimals))
}

impl SettlementEngine {
    pub async fn withdraw(
        &self,
        user_id: &str,
        request: WithdrawalRequest,
    ) -> SettlementResult<WithdrawalReceipt> {
        let WithdrawalRequest {
            currency,
            chain,
            amount,
            destination,
            two_factor_code,
        } = request;

        validate_amount(amount, currency)?;
        let (asset, decimals) = resolve_asset(currency, chain)?;

        let user = self
            .storage
            .users
            .get(user_id)?
            .filter(|u| u.kyc_verified)
            .ok_or(SettlementError::KycRequired)?;
        self.check_second_factor(&user, two_factor_code.as_deref())?;

        let usd = self.rates.get_rates().await.to_usd(amount, currency)?;
        let decision = self.limiter.check_limit(user_id, usd)?;
        if !decision.allowed {
            let reason = decision
                .reason
                .unwrap_or_else(|| "Withdrawal limit exceeded".to_string());
            info!(user_id = %user_id, usd = %usd, reason = %reason, "Withdrawal over limit");
            return Err(SettlementError::LimitExceeded(reason));
        }

        let to = parse_address(&destination)?;
        let amount_units = to_base_units(amount, decimals)?;

        // Fail before any RPC call when the ledger cannot cover it
        if self.storage.ledger.get_balance(user_id, currency)? < amount {
            return Err(SettlementError::InsufficientFunds { currency });
        }

        let key = self
            .storage
            .users
            .encrypted_key(user_id)?
            .ok_or_else(|| SettlementError::InvalidState("No custodial wallet".into()))?;
        let net = network(chain);
        let signer = self.crypto.signer(&key, user_id, net.chain_id)?;

        let transfer = TransferRequest {
            chain,
            from: signer.address(),
            to,
            asset,
            amount: amount_units,
        };
        let fee = self.chain.estimate_fee(&transfer).await?;
        self.ensure_on_chain_funds(&transfer, fee.max_cost()).await?;

        let debit = self.storage.ledger.debit(
            NewTransaction::new(user_id, TxKind::Withdrawal, currency, amount)
                .with_destination(chain, to.to_checksum(None))
                .with_usd_value(usd),
        )?;
        let tx_id = debit.transaction.id.clone();
        self.touched(user_id);
        self.storage.audit.record(
            AuditEvent::new(AuditEventType::WithdrawalRequested)
                .with_user(user_id)
                .with_resource("transaction", &tx_id)
                .with_details(json!({
                    "currency": currency.code(),
                    "chain": chain.as_str(),
                    "amount": amount.to_string(),
                    "usd_value": usd.to_string(),
                })),
        );

        let tx_hash = match self.chain.broadcast(signer, &transfer, &fee).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(user_id = %user_id, transaction_id = %tx_id, error = %e, "Broadcast failed, reversing debit");
                self.compensate_withdrawal(&tx_id, user_id, &e.to_string());
                return Err(e.into());
            }
        };

        let transaction = match self.storage.ledger.attach_reference(&tx_id, &tx_hash) {
            Ok(record) => record,
            Err(e) => {
                // The transfer is on its way; the entry stays pending for manual matching
                error!(transaction_id = %tx_id, tx_hash = %tx_hash, error = %e, "Failed to record transaction hash");
                debit.transaction
            }
        };
        self.touched(user_id);

        info!(
            user_id = %user_id,
            transaction_id = %tx_id,
            tx_hash = %tx_hash,
            chain = %chain,
            currency = %currency,
            amount = %amount,
            "Withdrawal broadcast"
        );
        self.storage.audit.record(
            AuditEvent::new(AuditEventType::WithdrawalBroadcast)
                .with_user(user_id)
                .with_resource("transaction", &tx_id)
                .with_details(json!({ "tx_hash": tx_hash, "chain": chain.as_str() })),
        );

        Ok(WithdrawalReceipt {
            transaction,
            explorer_url: format!("{}/tx/{tx_hash}", net.explorer_url),
            tx_hash,
        })
    }

    /// Native transfers need `amount + gas` in the native balance; token
    /// transfers need the token amount plus gas in the native balance.
    async fn ensure_on_chain_funds(
        &self,
        transfer: &TransferRequest,
        gas: U256,
    ) -> SettlementResult<()> {
        let native = self
            .chain
            .native_balance(transfer.chain, transfer.from)
            .await?;
        match transfer.asset {
            TransferAsset::Native => {
                if native < transfer.amount {
                    return Err(SettlementError::InsufficientBalance);
                }
                if native < transfer.amount.saturating_add(gas) {
                    return Err(SettlementError::InsufficientGas);
                }
            }
            TransferAsset::Token { contract } => {
                let held = self
                    .chain
                    .token_balance(transfer.chain, contract, transfer.from)
                    .await?;
                if held < transfer.amount {
                    return Err(SettlementError::InsufficientBalance);
                }
                if native < gas {
                    return Err(SettlementError::InsufficientGas);
                }
            }
        }
        Ok(())
    }

    fn compensate_withdrawal(&self, tx_id: &str, user_id: &str, reason: &str) {
        match self.storage.ledger.resolve(
            tx_id,
            Resolution::FailAndReverse {
                reason: reason.to_string(),
            },
        ) {
            Ok(_) => self.storage.audit.record(
                AuditEvent::new(AuditEventType::WithdrawalFailed)
                    .with_user(user_id)
                    .with_resource("transaction", tx_id)
                    .with_details(json!({ "compensated": true }))
                    .failed(reason),
            ),
            Err(e) => {
                error!(transaction_id = %tx_id, error = %e, "Withdrawal reversal failed; manual reconciliation required")
            }
        }
        self.touched(user_id);
    }

    /// Resolve a pending withdrawal. Failed ones are credited back; replays
    /// change nothing. Any other kind of entry is refused.
    pub fn reconcile_withdrawal(
        &self,
        record: &TransactionRecord,
        outcome: TransferOutcome,
    ) -> SettlementResult<Settled> {
        if record.kind != TxKind::Withdrawal {
            warn!(transaction_id = %record.id, kind = ?record.kind, "Transfer outcome for a non-withdrawal entry");
            return Err(SettlementError::InvalidState(format!(
                "Transaction {} is not a withdrawal",
                record.id
            )));
        }

        let resolution = match &outcome {
            TransferOutcome::Confirmed => Resolution::Complete,
            TransferOutcome::Failed(reason) => Resolution::FailAndReverse {
                reason: reason.clone(),
            },
        };

        let settled = self.storage.ledger.resolve(&record.id, resolution)?;
        if !settled.was_applied() {
            return Ok(settled);
        }
        self.touched(&record.user_id);

        match outcome {
            TransferOutcome::Confirmed => {
                info!(transaction_id = %record.id, reference = ?record.reference, "Transfer confirmed");
            }
            TransferOutcome::Failed(reason) => {
                warn!(transaction_id = %record.id, reference = ?record.reference, reason = %reason, "Transfer failed, amount credited back");
                self.storage.audit.record(
                    AuditEvent::new(AuditEventType::WithdrawalFailed)
                        .with_user(&record.user_id)
                        .with_resource("transaction", &record.id)
                        .with_details(json!({
                            "compensated": true,
                            "reference": record.reference,
                        }))
                        .failed(reason),
                );
            }
        }
        Ok(settled)
    }

    /// [`Self::reconcile_withdrawal`] by transaction hash or transfer
    /// reference. `None` when nothing matches.
    pub fn reconcile_transfer(
        &self,
        reference: &str,
        outcome: TransferOutcome,
    ) -> SettlementResult<Option<Settled>> {
        let Some(record) = self.storage.ledger.find_by_reference(reference)? else {
            return Ok(None);
        };
        self.reconcile_withdrawal(&record, outcome).map(Some)
    }
}
