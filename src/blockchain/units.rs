// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Conversion between ledger decimals and on-chain integer units.

use std::str::FromStr;

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;

use super::ChainError;

/// Convert a decimal amount to the smallest on-chain unit.
///
/// Amounts with more fractional digits than `decimals` are rejected rather
/// than rounded.
pub fn to_base_units(amount: Decimal, decimals: u8) -> Result<U256, ChainError> {
    if amount.is_sign_negative() {
        return Err(ChainError::InvalidAmount("amount is negative".to_string()));
    }
    let amount = amount.normalize();
    let scale = amount.scale();
    if scale > decimals as u32 {
        return Err(ChainError::InvalidAmount(format!(
            "too many decimal places (max {decimals})"
        )));
    }
    let mantissa = u128::try_from(amount.mantissa())
        .map_err(|_| ChainError::InvalidAmount("amount out of range".to_string()))?;
    let factor = U256::from(10u64).pow(U256::from(decimals as u32 - scale));
    U256::from(mantissa)
        .checked_mul(factor)
        .ok_or_else(|| ChainError::InvalidAmount("amount overflow".to_string()))
}

/// Convert on-chain units back to a decimal amount.
pub fn from_base_units(value: U256, decimals: u8) -> Result<Decimal, ChainError> {
    let formatted = format_amount(value, decimals);
    Decimal::from_str(&formatted)
        .map_err(|_| ChainError::InvalidAmount(format!("{formatted} does not fit a decimal")))
}

/// Format wei (or token units) to a human-readable amount.
pub fn format_amount(amount: U256, decimals: u8) -> String {
    if amount.is_zero() {
        return "0".to_string();
    }

    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let whole = amount / divisor;
    let remainder = amount % divisor;

    if remainder.is_zero() {
        whole.to_string()
    } else {
        let decimal_str = format!("{:0>width$}", remainder, width = decimals as usize);
        let trimmed = decimal_str.trim_end_matches('0');
        format!("{}.{}", whole, trimmed)
    }
}

/// Parse a destination address.
///
/// Requires `0x` plus 40 hex digits. Mixed-case input must carry a valid
/// EIP-55 checksum. The zero address is rejected.
pub fn parse_address(raw: &str) -> Result<Address, ChainError> {
    let raw = raw.trim();
    let invalid = || ChainError::InvalidAddress(raw.to_string());

    let hex = raw.strip_prefix("0x").ok_or_else(invalid)?;
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let mixed_case =
        hex.chars().any(|c| c.is_ascii_lowercase()) && hex.chars().any(|c| c.is_ascii_uppercase());
    let address = if mixed_case {
        Address::parse_checksummed(raw, None).map_err(|_| invalid())?
    } else {
        Address::from_str(raw).map_err(|_| invalid())?
    };

    if address == Address::ZERO {
        return Err(invalid());
    }
    Ok(address)
}
