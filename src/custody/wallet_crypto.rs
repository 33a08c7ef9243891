// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Custodial key generation and at-rest encryption.
//!
//! ## Scheme
//!
//! ```text
//! salt  = 32 random bytes (per record)
//! iv    = 12 random bytes (per record)
//! key   = PBKDF2-HMAC-SHA512(master_key[version] || user_id, salt, 100_000)
//! ct,tag = AES-256-GCM(key, iv, aad = "gon-custody:v{version}:{user_id}", secret)
//! ```
//!
//! Because the user id is mixed into the derived key and the AAD, a record
//! copied onto another user fails authentication instead of decrypting.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use k256::ecdsa::SigningKey;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::keys::KeyManager;
use super::CryptoError;

/// PBKDF2 iteration count.
pub const KDF_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 32;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

// =============================================================================
// Records
// =============================================================================

/// Encrypted secret as persisted. Byte fields serialize as base64.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKeyMaterial {
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    #[serde(with = "b64")]
    pub tag: Vec<u8>,
    pub key_version: u32,
}

impl fmt::Debug for EncryptedKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedKeyMaterial")
            .field("len", &self.ciphertext.len())
            .field("key_version", &self.key_version)
            .finish_non_exhaustive()
    }
}

/// Decrypted secret bytes, zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBytes([REDACTED])")
    }
}

/// Output of [`WalletCrypto::generate_wallet`].
#[derive(Debug, Clone)]
pub struct GeneratedWallet {
    pub address: Address,
    pub key: EncryptedKeyMaterial,
}

// =============================================================================
// WalletCrypto
// =============================================================================

/// Generates keypairs and seals/unseals secrets under the master keys.
#[derive(Clone)]
pub struct WalletCrypto {
    keys: Arc<KeyManager>,
    rng: SystemRandom,
}

impl WalletCrypto {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self {
            keys,
            rng: SystemRandom::new(),
        }
    }

    pub fn key_manager(&self) -> &KeyManager {
        &self.keys
    }

    /// Create a secp256k1 keypair and return its address and the sealed
    /// private key. The raw key never leaves this function.
    pub fn generate_wallet(&self, user_id: &str) -> Result<GeneratedWallet, CryptoError> {
        use k256::elliptic_curve::rand_core::OsRng;

        let signing_key = SigningKey::random(&mut OsRng);
        let address = PrivateKeySigner::from_signing_key(signing_key.clone()).address();
        let mut raw = Zeroizing::new([0u8; KEY_LEN]);
        raw.copy_from_slice(signing_key.to_bytes().as_slice());
        let key = self.encrypt(raw.as_slice(), user_id)?;

        Ok(GeneratedWallet { address, key })
    }

    /// Seal `secret` for `user_id` under the active master key.
    pub fn encrypt(&self, secret: &[u8], user_id: &str) -> Result<EncryptedKeyMaterial, CryptoError> {
        let (_, version) = self.keys.active_key()?;

        let mut salt = vec![0u8; SALT_LEN];
        let mut iv = [0u8; NONCE_LEN];
        self.rng.fill(&mut salt).map_err(|_| CryptoError::Rng)?;
        self.rng.fill(&mut iv).map_err(|_| CryptoError::Rng)?;

        let key = self.derive_key(version, user_id, &salt)?;
        let aad = aad_for(version, user_id);

        let mut in_out = secret.to_vec();
        let tag = key
            .seal_in_place_separate_tag(
                Nonce::assume_unique_for_key(iv),
                Aad::from(aad.as_bytes()),
                &mut in_out,
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(EncryptedKeyMaterial {
            ciphertext: in_out,
            iv: iv.to_vec(),
            salt,
            tag: tag.as_ref().to_vec(),
            key_version: version,
        })
    }

    /// Unseal a record for `user_id`.
    ///
    /// Any mismatch (wrong user, tampered bytes, wrong master key) surfaces
    /// as [`CryptoError::DecryptionFailed`]; an unknown version as
    /// [`CryptoError::KeyNotFound`].
    pub fn decrypt(
        &self,
        record: &EncryptedKeyMaterial,
        user_id: &str,
    ) -> Result<SecretBytes, CryptoError> {
        let iv: [u8; NONCE_LEN] = record
            .iv
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::DecryptionFailed)?;
        if record.tag.len() != TAG_LEN || record.salt.len() != SALT_LEN {
            return Err(CryptoError::DecryptionFailed);
        }

        let key = self.derive_key(record.key_version, user_id, &record.salt)?;
        let aad = aad_for(record.key_version, user_id);

        let mut in_out = SecretBytes(Vec::with_capacity(record.ciphertext.len() + TAG_LEN));
        in_out.0.extend_from_slice(&record.ciphertext);
        in_out.0.extend_from_slice(&record.tag);

        let plaintext_len = key
            .open_in_place(
                Nonce::assume_unique_for_key(iv),
                Aad::from(aad.as_bytes()),
                &mut in_out.0,
            )
            .map_err(|_| CryptoError::DecryptionFailed)?
            .len();
        in_out.0.truncate(plaintext_len);
        Ok(in_out)
    }

    /// Unseal a custodial key and build a signer for the given chain id.
    pub fn signer(
        &self,
        record: &EncryptedKeyMaterial,
        user_id: &str,
        chain_id: u64,
    ) -> Result<PrivateKeySigner, CryptoError> {
        let secret = self.decrypt(record, user_id)?;
        let signer = PrivateKeySigner::from_slice(secret.expose())
            .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))?;
        Ok(signer.with_chain_id(Some(chain_id)))
    }

    /// Re-seal a record under the active master key.
    ///
    /// The new record is decrypted once before being returned, so a
    /// rotation never persists something it cannot read back.
    pub fn reencrypt(
        &self,
        record: &EncryptedKeyMaterial,
        user_id: &str,
    ) -> Result<EncryptedKeyMaterial, CryptoError> {
        let secret = self.decrypt(record, user_id)?;
        let rotated = self.encrypt(secret.expose(), user_id)?;
        let check = self.decrypt(&rotated, user_id)?;
        if check.expose() != secret.expose() {
            return Err(CryptoError::EncryptionFailed);
        }
        Ok(rotated)
    }

    fn derive_key(&self, version: u32, user_id: &str, salt: &[u8]) -> Result<LessSafeKey, CryptoError> {
        let master = self.keys.key_by_version(version)?;

        let mut password = Zeroizing::new(Vec::with_capacity(
            master.as_bytes().len() + user_id.len(),
        ));
        password.extend_from_slice(master.as_bytes());
        password.extend_from_slice(user_id.as_bytes());

        let mut derived = Zeroizing::new([0u8; KEY_LEN]);
        let iterations = NonZeroU32::new(KDF_ITERATIONS).ok_or(CryptoError::EncryptionFailed)?;
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA512,
            iterations,
            salt,
            password.as_slice(),
            derived.as_mut_slice(),
        );

        UnboundKey::new(&AES_256_GCM, derived.as_slice())
            .map(aead::LessSafeKey::new)
            .map_err(|_| CryptoError::EncryptionFailed)
    }
}

fn aad_for(version: u32, user_id: &str) -> String {
    format!("gon-custody:v{version}:{user_id}")
}

mod b64 {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        Base64::decode_vec(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
