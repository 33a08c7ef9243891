// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User flags, custodial key records and derived addresses.
//!
//! Encrypted key material is written once when the wallet is generated and
//! replaced only by key rotation, which archives the previous record in the
//! same write transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{
    get_json, StoreError, StoreResult, CRYPTO_WALLETS, ENCRYPTED_KEYS, ENCRYPTED_KEYS_ARCHIVE,
    USERS,
};
use crate::custody::EncryptedKeyMaterial;
use crate::models::{Chain, KycTier};

// =============================================================================
// Records
// =============================================================================

/// Second-factor enrolment. The secret is stored encrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorRecord {
    pub secret: EncryptedKeyMaterial,
    pub enabled: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub kyc_verified: bool,
    pub kyc_verified_at: Option<DateTime<Utc>>,
    pub kyc_document_type: Option<String>,
    pub two_factor: Option<TwoFactorRecord>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kyc_verified: false,
            kyc_verified_at: None,
            kyc_document_type: None,
            two_factor: None,
            created_at: Utc::now(),
        }
    }

    pub fn two_factor_enabled(&self) -> bool {
        self.two_factor.as_ref().is_some_and(|t| t.enabled)
    }

    pub fn tier(&self) -> KycTier {
        match (self.kyc_verified, self.two_factor_enabled()) {
            (false, _) => KycTier::Unverified,
            (true, false) => KycTier::Verified,
            (true, true) => KycTier::Enhanced,
        }
    }
}

/// Custodial address of a user on one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CryptoAddress {
    pub chain: Chain,
    pub address: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// UserStore
// =============================================================================

#[derive(Clone)]
pub struct UserStore {
    db: Arc<Database>,
}

impl UserStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS)?;
        get_json(&table, user_id)
    }

    /// Fetch a user, creating an unverified record on first sight.
    pub fn get_or_create(&self, user_id: &str) -> StoreResult<UserRecord> {
        if let Some(user) = self.get(user_id)? {
            return Ok(user);
        }
        self.update(user_id, |_| Ok(()))
    }

    /// Atomic read-modify-write; missing users are created first.
    fn update<F>(&self, user_id: &str, f: F) -> StoreResult<UserRecord>
    where
        F: FnOnce(&mut UserRecord) -> StoreResult<()>,
    {
        let write_txn = self.db.begin_write()?;
        let user = {
            let mut table = write_txn.open_table(USERS)?;
            let mut user = get_json(&table, user_id)?.unwrap_or_else(|| UserRecord::new(user_id));
            f(&mut user)?;
            let json = serde_json::to_vec(&user)?;
            table.insert(user_id, json.as_slice())?;
            user
        };
        write_txn.commit()?;
        Ok(user)
    }

    /// Flip `kyc_verified` to true. Returns `false` if it already was.
    pub fn mark_kyc_verified(
        &self,
        user_id: &str,
        document_type: &str,
    ) -> StoreResult<(UserRecord, bool)> {
        let mut flipped = false;
        let user = self.update(user_id, |user| {
            if !user.kyc_verified {
                user.kyc_verified = true;
                user.kyc_verified_at = Some(Utc::now());
                user.kyc_document_type = Some(document_type.to_string());
                flipped = true;
            }
            Ok(())
        })?;
        Ok((user, flipped))
    }

    /// Store a not-yet-confirmed second-factor secret.
    ///
    /// Fails once a second factor is enabled; re-enrolment while pending
    /// replaces the previous secret.
    pub fn set_pending_two_factor(
        &self,
        user_id: &str,
        secret: EncryptedKeyMaterial,
    ) -> StoreResult<UserRecord> {
        self.update(user_id, |user| {
            if user.two_factor_enabled() {
                return Err(StoreError::Conflict(
                    "Two-factor authentication is already enabled".into(),
                ));
            }
            user.two_factor = Some(TwoFactorRecord {
                secret,
                enabled: false,
                confirmed_at: None,
            });
            Ok(())
        })
    }

    pub fn enable_two_factor(&self, user_id: &str) -> StoreResult<UserRecord> {
        self.update(user_id, |user| match user.two_factor.as_mut() {
            Some(record) => {
                record.enabled = true;
                record.confirmed_at = Some(Utc::now());
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "Two-factor enrolment for {}",
                user.id
            ))),
        })
    }

    // =========================================================================
    // Keys and addresses
    // =========================================================================

    /// Persist a freshly generated wallet: the key record plus one address
    /// row per supported chain. Fails if the user already has a key.
    pub fn store_wallet(
        &self,
        user_id: &str,
        key: &EncryptedKeyMaterial,
        address: &str,
    ) -> StoreResult<Vec<CryptoAddress>> {
        let key_json = serde_json::to_vec(key)?;
        let now = Utc::now();
        let addresses: Vec<CryptoAddress> = Chain::ALL
            .into_iter()
            .map(|chain| CryptoAddress {
                chain,
                address: address.to_string(),
                created_at: now,
            })
            .collect();

        let write_txn = self.db.begin_write()?;
        {
            let mut keys = write_txn.open_table(ENCRYPTED_KEYS)?;
            if keys.get(user_id)?.is_some() {
                return Err(StoreError::Conflict(format!("User {user_id} already has a wallet")));
            }
            keys.insert(user_id, key_json.as_slice())?;

            let mut wallets = write_txn.open_table(CRYPTO_WALLETS)?;
            for record in &addresses {
                let row_key = address_key(user_id, record.chain);
                let json = serde_json::to_vec(record)?;
                wallets.insert(row_key.as_str(), json.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(addresses)
    }

    pub fn encrypted_key(&self, user_id: &str) -> StoreResult<Option<EncryptedKeyMaterial>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENCRYPTED_KEYS)?;
        get_json(&table, user_id)
    }

    /// Swap in a re-encrypted key record, archiving the current one.
    ///
    /// The swap only happens if the stored record is still at
    /// `expected_version`, so two concurrent sweeps cannot both archive.
    pub fn replace_key(
        &self,
        user_id: &str,
        expected_version: u32,
        new_key: &EncryptedKeyMaterial,
    ) -> StoreResult<()> {
        let new_json = serde_json::to_vec(new_key)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut keys = write_txn.open_table(ENCRYPTED_KEYS)?;
            let current: EncryptedKeyMaterial = get_json(&keys, user_id)?
                .ok_or_else(|| StoreError::NotFound(format!("Key for {user_id}")))?;
            if current.key_version != expected_version {
                return Err(StoreError::Conflict(format!(
                    "Key for {user_id} is at version {}, expected {expected_version}",
                    current.key_version
                )));
            }

            let archive_key = format!(
                "{user_id}|v{}|{}",
                current.key_version,
                Utc::now().timestamp_millis()
            );
            let old_json = serde_json::to_vec(&current)?;
            let mut archive = write_txn.open_table(ENCRYPTED_KEYS_ARCHIVE)?;
            archive.insert(archive_key.as_str(), old_json.as_slice())?;

            keys.insert(user_id, new_json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Superseded key records of a user.
    pub fn archived_keys(&self, user_id: &str) -> StoreResult<Vec<EncryptedKeyMaterial>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENCRYPTED_KEYS_ARCHIVE)?;
        // '}' sorts directly after '|'
        let start = format!("{user_id}|");
        let end = format!("{user_id}}}");
        let mut out = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let entry = entry?;
            out.push(serde_json::from_slice(entry.1.value())?);
        }
        Ok(out)
    }

    /// Ids of all users holding a key record, with the record's version.
    pub fn key_versions(&self) -> StoreResult<Vec<(String, u32)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENCRYPTED_KEYS)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let key: EncryptedKeyMaterial = serde_json::from_slice(entry.1.value())?;
            out.push((entry.0.value().to_string(), key.key_version));
        }
        Ok(out)
    }

    pub fn addresses(&self, user_id: &str) -> StoreResult<Vec<CryptoAddress>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CRYPTO_WALLETS)?;
        let mut out = Vec::new();
        for chain in Chain::ALL {
            if let Some(record) = get_json(&table, &address_key(user_id, chain))? {
                out.push(record);
            }
        }
        Ok(out)
    }
}

fn address_key(user_id: &str, chain: Chain) -> String {
    format!("{user_id}|{}", chain.as_str())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::temp_storage;

    fn key_record(version: u32, marker: u8) -> EncryptedKeyMaterial {
        EncryptedKeyMaterial {
            ciphertext: vec![marker; 32],
            iv: vec![1u8; 12],
            salt: vec![2u8; 32],
            tag: vec![3u8; 16],
            key_version: version,
        }
    }

    #[test]
    fn get_or_create_is_unverified() {
        let (storage, _dir) = temp_storage();
        let user = storage.users.get_or_create("u1").unwrap();
        assert!(!user.kyc_verified);
        assert_eq!(user.tier(), KycTier::Unverified);
        assert!(storage.users.get("u1").unwrap().is_some());
    }

    #[test]
    fn kyc_flips_exactly_once() {
        let (storage, _dir) = temp_storage();
        let (user, flipped) = storage.users.mark_kyc_verified("u1", "nin").unwrap();
        assert!(flipped);
        assert!(user.kyc_verified);
        let first_at = user.kyc_verified_at;

        let (user, flipped) = storage.users.mark_kyc_verified("u1", "passport").unwrap();
        assert!(!flipped);
        assert_eq!(user.kyc_verified_at, first_at);
        assert_eq!(user.kyc_document_type.as_deref(), Some("nin"));
    }

    #[test]
    fn two_factor_enrolment_and_tier() {
        let (storage, _dir) = temp_storage();
        storage.users.mark_kyc_verified("u1", "nin").unwrap();
        assert!(storage.users.enable_two_factor("u1").is_err());

        storage
            .users
            .set_pending_two_factor("u1", key_record(1, 9))
            .unwrap();
        assert_eq!(storage.users.get("u1").unwrap().unwrap().tier(), KycTier::Verified);

        let user = storage.users.enable_two_factor("u1").unwrap();
        assert_eq!(user.tier(), KycTier::Enhanced);

        let again = storage.users.set_pending_two_factor("u1", key_record(1, 8));
        assert!(matches!(again, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn wallet_is_stored_once_with_address_per_chain() {
        let (storage, _dir) = temp_storage();
        let addr = "0x1111111111111111111111111111111111111111";
        let addresses = storage.users.store_wallet("u1", &key_record(1, 1), addr).unwrap();
        assert_eq!(addresses.len(), 3);
        assert!(addresses.iter().all(|a| a.address == addr));
        assert_eq!(storage.users.addresses("u1").unwrap().len(), 3);

        let second = storage.users.store_wallet("u1", &key_record(1, 2), addr);
        assert!(matches!(second, Err(StoreError::Conflict(_))));
        assert_eq!(
            storage.users.encrypted_key("u1").unwrap().unwrap().ciphertext,
            vec![1u8; 32]
        );
    }

    #[test]
    fn replace_key_archives_previous() {
        let (storage, _dir) = temp_storage();
        let users = &storage.users;
        users.store_wallet("u1", &key_record(1, 1), "0xabc").unwrap();
        users.store_wallet("u10", &key_record(1, 5), "0xdef").unwrap();

        users.replace_key("u1", 1, &key_record(2, 7)).unwrap();
        assert_eq!(users.encrypted_key("u1").unwrap().unwrap().key_version, 2);

        let archived = users.archived_keys("u1").unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].key_version, 1);
        assert!(users.archived_keys("u10").unwrap().is_empty());

        let stale = users.replace_key("u1", 1, &key_record(3, 9));
        assert!(matches!(stale, Err(StoreError::Conflict(_))));

        let mut versions = users.key_versions().unwrap();
        versions.sort();
        assert_eq!(versions, vec![("u1".to_string(), 2), ("u10".to_string(), 1)]);
    }
}
