// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Versioned master keys.
//!
//! Master keys are supplied through the environment as hex strings,
//! `MASTER_KEY_V1`, `MASTER_KEY_V2`, and so on. `MASTER_KEY_ACTIVE_VERSION`
//! selects the one used for new encryptions; every configured version stays
//! resolvable so older ciphertexts keep decrypting until a rotation sweep
//! re-encrypts them.

use std::collections::BTreeMap;
use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::CryptoError;
use crate::config::{MASTER_KEY_ACTIVE_VERSION_ENV, MASTER_KEY_ENV_PREFIX};

/// Minimum accepted master key length in bytes.
pub const MIN_MASTER_KEY_LEN: usize = 32;

/// A master key. Never printed, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey(Vec<u8>);

impl MasterKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// Lookup of master keys by version.
#[derive(Debug, Clone)]
pub struct KeyManager {
    active_version: u32,
    keys: BTreeMap<u32, MasterKey>,
}

impl KeyManager {
    /// Build from raw key bytes. The active version must be present.
    pub fn new(active_version: u32, keys: BTreeMap<u32, Vec<u8>>) -> Result<Self, CryptoError> {
        if let Some((version, key)) = keys.iter().find(|(_, k)| k.len() < MIN_MASTER_KEY_LEN) {
            return Err(CryptoError::Config(format!(
                "master key v{version} is {} bytes, need at least {MIN_MASTER_KEY_LEN}",
                key.len()
            )));
        }
        if !keys.contains_key(&active_version) {
            return Err(CryptoError::KeyNotFound(active_version));
        }
        Ok(Self {
            active_version,
            keys: keys.into_iter().map(|(v, k)| (v, MasterKey(k))).collect(),
        })
    }

    /// Load from `MASTER_KEY_ACTIVE_VERSION` and `MASTER_KEY_V{n}`.
    pub fn from_env() -> Result<Self, CryptoError> {
        Self::from_vars(std::env::vars())
    }

    fn from_vars(vars: impl Iterator<Item = (String, String)>) -> Result<Self, CryptoError> {
        let mut active_version = None;
        let mut keys = BTreeMap::new();

        for (name, value) in vars {
            if name == MASTER_KEY_ACTIVE_VERSION_ENV {
                let version = value.trim().parse::<u32>().map_err(|_| {
                    CryptoError::Config(format!("{MASTER_KEY_ACTIVE_VERSION_ENV} is not a number"))
                })?;
                active_version = Some(version);
            } else if let Some(suffix) = name.strip_prefix(MASTER_KEY_ENV_PREFIX) {
                let Ok(version) = suffix.parse::<u32>() else {
                    continue;
                };
                let bytes = alloy::hex::decode(value.trim())
                    .map_err(|_| CryptoError::Config(format!("{name} is not valid hex")))?;
                keys.insert(version, bytes);
            }
        }

        if keys.is_empty() {
            return Err(CryptoError::Config(format!(
                "no master keys configured ({MASTER_KEY_ENV_PREFIX}<n>)"
            )));
        }

        // Default to the highest configured version
        let active_version = match active_version {
            Some(v) => v,
            None => *keys.keys().next_back().unwrap_or(&1),
        };
        Self::new(active_version, keys)
    }

    /// The key used for all new encryptions, with its version.
    pub fn active_key(&self) -> Result<(&MasterKey, u32), CryptoError> {
        let key = self.key_by_version(self.active_version)?;
        Ok((key, self.active_version))
    }

    pub fn active_version(&self) -> u32 {
        self.active_version
    }

    /// Key for a stored version. Fails for unknown or retired versions.
    pub fn key_by_version(&self, version: u32) -> Result<&MasterKey, CryptoError> {
        self.keys
            .get(&version)
            .ok_or(CryptoError::KeyNotFound(version))
    }

    pub fn versions(&self) -> impl Iterator<Item = u32> + '_ {
        self.keys.keys().copied()
    }
}
