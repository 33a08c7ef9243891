// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Custody
//!
//! Custodial keys are generated inside this module and persisted only as
//! [`EncryptedKeyMaterial`]. Nothing outside custody handles raw key bytes:
//! settlement asks [`WalletCrypto::signer`] for a ready signer.
//!
//! ## Components
//!
//! - [`KeyManager`]: versioned master keys from the environment
//! - [`WalletCrypto`]: keypair generation, AES-256-GCM sealing, signers
//! - [`totp`]: second-factor codes
//! - [`rotate_keys`]: re-encrypt every stored key under the active version

pub mod keys;
pub mod totp;
pub mod wallet_crypto;

pub use keys::{KeyManager, MasterKey};
pub use wallet_crypto::{EncryptedKeyMaterial, GeneratedWallet, SecretBytes, WalletCrypto};

use serde::Serialize;
use utoipa::ToSchema;
use tracing::{error, info, warn};

use crate::storage::{AuditEvent, AuditEventType, AuditLog, UserStore};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("master key version {0} not found")]
    KeyNotFound(u32),

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("secure random source unavailable")]
    Rng,

    #[error("master key configuration: {0}")]
    Config(String),
}

/// Outcome of a rotation sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RotationReport {
    pub rotated: usize,
    pub already_current: usize,
    pub failed: usize,
}

/// Re-encrypt every stored custodial key under the active master key.
///
/// Each record is decrypted with its own version, sealed under the active
/// version, verified, and then swapped in while the previous record is
/// archived. A record that fails any step is left untouched and still
/// decryptable with its old version.
pub fn rotate_keys(crypto: &WalletCrypto, users: &UserStore, audit: &AuditLog) -> RotationReport {
    let active = crypto.key_manager().active_version();
    let mut report = RotationReport::default();

    let versions = match users.key_versions() {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "Failed to list key records for rotation");
            return report;
        }
    };

    for (user_id, version) in versions {
        if version == active {
            report.already_current += 1;
            continue;
        }

        match rotate_user_key(crypto, users, &user_id, version) {
            Ok(()) => {
                report.rotated += 1;
                audit.record(
                    AuditEvent::new(AuditEventType::KeyRotated)
                        .with_user(&user_id)
                        .with_details(serde_json::json!({ "from": version, "to": active })),
                );
            }
            Err(e) => {
                report.failed += 1;
                warn!(user_id = %user_id, from = version, to = active, error = %e, "Key rotation failed");
                audit.record(
                    AuditEvent::new(AuditEventType::KeyRotated)
                        .with_user(&user_id)
                        .failed(e),
                );
            }
        }
    }

    info!(
        rotated = report.rotated,
        already_current = report.already_current,
        failed = report.failed,
        active_version = active,
        "Key rotation sweep complete"
    );
    report
}

/// Re-seal one user's key under the active master key and archive the old
/// record. `version` is the version the caller last saw stored.
pub fn rotate_user_key(
    crypto: &WalletCrypto,
    users: &UserStore,
    user_id: &str,
    version: u32,
) -> Result<(), String> {
    let record = users
        .encrypted_key(user_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "key record vanished".to_string())?;
    let rotated = crypto
        .reencrypt(&record, user_id)
        .map_err(|e| e.to_string())?;
    users
        .replace_key(user_id, version, &rotated)
        .map_err(|e| e.to_string())
}
