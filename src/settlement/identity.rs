// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity verification, custodial wallet provisioning and the TOTP
//! second factor.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::{SettlementEngine, SettlementError, SettlementResult};
use crate::custody::totp;
use crate::models::KycTier;
use crate::providers::DocumentType;
use crate::storage::{AuditEvent, AuditEventType, CryptoAddress, StoreError, UserRecord};

const TOTP_ISSUER: &str = "GON";

/// Result of a successful verification.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct KycOutcome {
    pub kyc_tier: KycTier,
    /// Custodial addresses, one per supported chain.
    pub addresses: Vec<CryptoAddress>,
    /// False when the user had already been verified.
    pub newly_verified: bool,
}

/// Material for an authenticator app. Shown once, at enrolment.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TwoFactorSetup {
    /// Base32 shared secret.
    pub secret: String,
    pub otpauth_uri: String,
}

/// Encryption context for second-factor secrets, kept apart from the
/// context of the user's private key.
pub(crate) fn totp_context(user_id: &str) -> String {
    format!("{user_id}:totp")
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl SettlementEngine {
    /// Verify a user's identity document and provision their wallet.
    ///
    /// Already-verified users are not sent to the provider again; the call
    /// only makes sure their wallet exists.
    pub async fn verify_kyc(
        &self,
        user_id: &str,
        document_type: DocumentType,
        document_number: &str,
    ) -> SettlementResult<KycOutcome> {
        let document_number = document_number.trim();
        if document_number.is_empty() {
            return Err(SettlementError::InvalidRequest(
                "document_number is required".into(),
            ));
        }

        let user = self.storage.users.get_or_create(user_id)?;
        if user.kyc_verified {
            let addresses = self.ensure_wallet(user_id)?;
            return Ok(KycOutcome {
                kyc_tier: user.tier(),
                addresses,
                newly_verified: false,
            });
        }

        let verification = self.kyc.verify(document_type, document_number).await?;
        if !verification.verified {
            info!(user_id = %user_id, document_type = document_type.as_str(), "KYC rejected");
            self.storage.audit.record(
                AuditEvent::new(AuditEventType::KycRejected)
                    .with_user(user_id)
                    .with_details(serde_json::json!({ "document_type": document_type.as_str() }))
                    .failed("provider did not verify the document"),
            );
            return Err(SettlementError::KycRejected);
        }

        let (user, flipped) = self
            .storage
            .users
            .mark_kyc_verified(user_id, document_type.as_str())?;
        if flipped {
            info!(user_id = %user_id, document_type = document_type.as_str(), "KYC verified");
            self.storage.audit.record(
                AuditEvent::new(AuditEventType::KycVerified)
                    .with_user(user_id)
                    .with_details(serde_json::json!({ "document_type": document_type.as_str() })),
            );
        }

        let addresses = self.ensure_wallet(user_id)?;
        Ok(KycOutcome {
            kyc_tier: user.tier(),
            addresses,
            newly_verified: flipped,
        })
    }

    /// Generate and store the custodial wallet unless one exists.
    fn ensure_wallet(&self, user_id: &str) -> SettlementResult<Vec<CryptoAddress>> {
        if self.storage.users.encrypted_key(user_id)?.is_some() {
            return Ok(self.storage.users.addresses(user_id)?);
        }

        let wallet = self.crypto.generate_wallet(user_id)?;
        let address = wallet.address.to_checksum(None);
        match self.storage.users.store_wallet(user_id, &wallet.key, &address) {
            Ok(addresses) => {
                info!(user_id = %user_id, address = %address, "Custodial wallet created");
                self.storage.audit.record(
                    AuditEvent::new(AuditEventType::WalletCreated)
                        .with_user(user_id)
                        .with_resource("address", &address)
                        .with_details(serde_json::json!({ "key_version": wallet.key.key_version })),
                );
                Ok(addresses)
            }
            // A concurrent verification won the race; keep its wallet
            Err(StoreError::Conflict(_)) => Ok(self.storage.users.addresses(user_id)?),
            Err(e) => Err(e.into()),
        }
    }

    /// Start TOTP enrolment. Repeating it before confirmation replaces the
    /// pending secret.
    pub fn setup_two_factor(&self, user_id: &str) -> SettlementResult<TwoFactorSetup> {
        let secret = totp::generate_secret(&self.rng)?;
        let sealed = self.crypto.encrypt(&secret, &totp_context(user_id))?;
        self.storage
            .users
            .set_pending_two_factor(user_id, sealed)?;

        self.storage
            .audit
            .record(AuditEvent::new(AuditEventType::TwoFactorEnrolled).with_user(user_id));

        Ok(TwoFactorSetup {
            secret: totp::base32(&secret),
            otpauth_uri: totp::provisioning_uri(&secret, TOTP_ISSUER, user_id),
        })
    }

    /// Confirm enrolment with a first code; enables the second factor.
    pub fn confirm_two_factor(&self, user_id: &str, code: &str) -> SettlementResult<KycTier> {
        let user = self
            .storage
            .users
            .get(user_id)?
            .ok_or_else(|| SettlementError::InvalidState("No two-factor enrolment in progress".into()))?;
        let Some(pending) = user.two_factor.as_ref() else {
            return Err(SettlementError::InvalidState(
                "No two-factor enrolment in progress".into(),
            ));
        };
        if pending.enabled {
            return Err(SettlementError::InvalidState(
                "Two-factor authentication is already enabled".into(),
            ));
        }

        let secret = self.crypto.decrypt(&pending.secret, &totp_context(user_id))?;
        if !totp::verify(secret.expose(), code, unix_now()) {
            self.storage.audit.record(
                AuditEvent::new(AuditEventType::TwoFactorFailed)
                    .with_user(user_id)
                    .failed("enrolment code mismatch"),
            );
            return Err(SettlementError::InvalidTwoFactorCode);
        }

        let user = self.storage.users.enable_two_factor(user_id)?;
        info!(user_id = %user_id, "Two-factor authentication enabled");
        self.storage
            .audit
            .record(AuditEvent::new(AuditEventType::TwoFactorEnabled).with_user(user_id));
        Ok(user.tier())
    }

    /// Enforce the second factor for a sensitive operation, if enabled.
    pub(crate) fn check_second_factor(
        &self,
        user: &UserRecord,
        code: Option<&str>,
    ) -> SettlementResult<()> {
        let Some(record) = user.two_factor.as_ref().filter(|t| t.enabled) else {
            return Ok(());
        };
        let Some(code) = code.filter(|c| !c.trim().is_empty()) else {
            return Err(SettlementError::TwoFactorRequired);
        };

        let secret = self.crypto.decrypt(&record.secret, &totp_context(&user.id))?;
        if !totp::verify(secret.expose(), code, unix_now()) {
            warn!(user_id = %user.id, "Second-factor code rejected");
            self.storage.audit.record(
                AuditEvent::new(AuditEventType::TwoFactorFailed)
                    .with_user(&user.id)
                    .failed("code mismatch"),
            );
            return Err(SettlementError::InvalidTwoFactorCode);
        }
        Ok(())
    }
}
