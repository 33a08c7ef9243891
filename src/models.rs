// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Domain Models
//!
//! Currencies, chains and the lifecycle enums shared by the ledger, the
//! settlement engine and the HTTP layer. All externally visible enums derive
//! `ToSchema` so they show up in the OpenAPI document with their exact wire
//! spelling.
//!
//! ## Currency Type
//!
//! [`Currency`] is a closed set: two fiat currencies (NGN, USD), two
//! stablecoins (USDT, USDC) and three native gas tokens (ETH, BNB, MATIC).
//! Balances are kept in a typed [`WalletBalances`] record with one field per
//! currency, so there is no string-keyed balance lookup anywhere.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// =============================================================================
// Currency
// =============================================================================

/// A currency the ledger can hold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Nigerian naira (marketplace base currency)
    Ngn,
    /// US dollar (conversion pivot)
    Usd,
    /// Tether USD stablecoin
    Usdt,
    /// Circle USD stablecoin
    Usdc,
    /// Ether, native gas token of Ethereum
    Eth,
    /// BNB, native gas token of BNB Smart Chain
    Bnb,
    /// MATIC/POL, native gas token of Polygon
    Matic,
}

impl Currency {
    pub const ALL: [Currency; 7] = [
        Currency::Ngn,
        Currency::Usd,
        Currency::Usdt,
        Currency::Usdc,
        Currency::Eth,
        Currency::Bnb,
        Currency::Matic,
    ];

    /// ISO-style code as used on the wire.
    pub fn code(self) -> &'static str {
        match self {
            Currency::Ngn => "NGN",
            Currency::Usd => "USD",
            Currency::Usdt => "USDT",
            Currency::Usdc => "USDC",
            Currency::Eth => "ETH",
            Currency::Bnb => "BNB",
            Currency::Matic => "MATIC",
        }
    }

    pub fn is_fiat(self) -> bool {
        matches!(self, Currency::Ngn | Currency::Usd)
    }

    pub fn is_stablecoin(self) -> bool {
        matches!(self, Currency::Usdt | Currency::Usdc)
    }

    pub fn is_crypto(self) -> bool {
        !self.is_fiat()
    }

    /// Number of decimal places the ledger keeps for this currency.
    ///
    /// Amounts with more precision than this are rejected as input, and
    /// converted amounts are rounded to it.
    pub fn scale(self) -> u32 {
        match self {
            Currency::Ngn | Currency::Usd => 2,
            Currency::Usdt | Currency::Usdc => 6,
            Currency::Eth | Currency::Bnb | Currency::Matic => 18,
        }
    }

    /// The chain on which this currency is the native gas token, if any.
    pub fn native_chain(self) -> Option<Chain> {
        match self {
            Currency::Eth => Some(Chain::Ethereum),
            Currency::Bnb => Some(Chain::Bsc),
            Currency::Matic => Some(Chain::Polygon),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Currency::ALL
            .into_iter()
            .find(|c| c.code() == upper)
            .ok_or_else(|| format!("Unsupported currency `{s}`"))
    }
}

// =============================================================================
// Chain
// =============================================================================

/// Supported EVM networks. One custodial address is valid on all three.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Polygon,
    Bsc,
}

impl Chain {
    pub const ALL: [Chain; 3] = [Chain::Ethereum, Chain::Polygon, Chain::Bsc];

    pub fn as_str(self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Polygon => "polygon",
            Chain::Bsc => "bsc",
        }
    }

    /// Native gas token of the chain.
    pub fn native_currency(self) -> Currency {
        match self {
            Chain::Ethereum => Currency::Eth,
            Chain::Polygon => Currency::Matic,
            Chain::Bsc => Currency::Bnb,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Chain::Ethereum),
            "polygon" | "matic" => Ok(Chain::Polygon),
            "bsc" | "bnb" => Ok(Chain::Bsc),
            other => Err(format!("Unsupported network `{other}`")),
        }
    }
}

// =============================================================================
// Wallet balances
// =============================================================================

/// Per-user fiat/crypto ledger record. One field per supported currency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WalletBalances {
    #[serde(default)]
    pub ngn: Decimal,
    #[serde(default)]
    pub usd: Decimal,
    #[serde(default)]
    pub usdt: Decimal,
    #[serde(default)]
    pub usdc: Decimal,
    #[serde(default)]
    pub eth: Decimal,
    #[serde(default)]
    pub bnb: Decimal,
    #[serde(default)]
    pub matic: Decimal,
}

impl WalletBalances {
    pub fn get(&self, currency: Currency) -> Decimal {
        match currency {
            Currency::Ngn => self.ngn,
            Currency::Usd => self.usd,
            Currency::Usdt => self.usdt,
            Currency::Usdc => self.usdc,
            Currency::Eth => self.eth,
            Currency::Bnb => self.bnb,
            Currency::Matic => self.matic,
        }
    }

    pub fn get_mut(&mut self, currency: Currency) -> &mut Decimal {
        match currency {
            Currency::Ngn => &mut self.ngn,
            Currency::Usd => &mut self.usd,
            Currency::Usdt => &mut self.usdt,
            Currency::Usdc => &mut self.usdc,
            Currency::Eth => &mut self.eth,
            Currency::Bnb => &mut self.bnb,
            Currency::Matic => &mut self.matic,
        }
    }
}

// =============================================================================
// Transaction lifecycle
// =============================================================================

/// Kind of ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxKind {
    Deposit,
    Withdrawal,
    Payment,
    Refund,
}

/// Transaction status. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
}

impl TxStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

// =============================================================================
// Order lifecycle
// =============================================================================

/// Fulfilment status of an order. Wire strings are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    InTransit,
    OutForDelivery,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Position along the forward fulfilment path. Terminal exits have none.
    fn rank(self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Confirmed => Some(1),
            OrderStatus::Processing => Some(2),
            OrderStatus::Shipped => Some(3),
            OrderStatus::InTransit => Some(4),
            OrderStatus::OutForDelivery => Some(5),
            OrderStatus::Delivered => Some(6),
            OrderStatus::Cancelled | OrderStatus::Refunded => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Forward moves along the fulfilment path are allowed (skipping is
    /// fine). `Cancelled` and `Refunded` can be entered from any state that
    /// is not yet terminal.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::InTransit => "IN_TRANSIT",
            OrderStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }
}

/// Payment state of an order, tracked separately from fulfilment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// How a checkout is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Debit the buyer's stored balance in the given currency.
    Wallet { currency: Currency },
    /// Card/bank charge through the payment gateway (settles in NGN).
    Gateway,
}

// =============================================================================
// KYC tiers
// =============================================================================

/// Withdrawal tier, derived from KYC and second-factor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum KycTier {
    /// Not identity-verified: no withdrawals.
    Unverified,
    /// Identity-verified.
    Verified,
    /// Identity-verified with a confirmed second factor.
    Enhanced,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    #[test]
    fn currency_parses_case_insensitively() {
        assert_eq!("usdt".parse::<Currency>().unwrap(), Currency::Usdt);
        assert_eq!(" NGN ".parse::<Currency>().unwrap(), Currency::Ngn);
        assert!("DOGE".parse::<Currency>().is_err());
    }

    #[test]
    fn currency_serializes_as_code() {
        let json = serde_json::to_string(&Currency::Matic).unwrap();
        assert_eq!(json, r#""MATIC""#);
    }

    #[test]
    fn chain_native_currencies() {
        assert_eq!(Chain::Ethereum.native_currency(), Currency::Eth);
        assert_eq!(Chain::Polygon.native_currency(), Currency::Matic);
        assert_eq!(Chain::Bsc.native_currency(), Currency::Bnb);
        assert_eq!(Currency::Bnb.native_chain(), Some(Chain::Bsc));
        assert_eq!(Currency::Usdc.native_chain(), None);
    }

    #[test]
    fn wallet_balances_typed_access() {
        let mut balances = WalletBalances::default();
        *balances.get_mut(Currency::Usdc) += dec!(12.5);
        assert_eq!(balances.get(Currency::Usdc), dec!(12.5));
        assert_eq!(balances.get(Currency::Usdt), Decimal::ZERO);
    }

    #[test]
    fn order_status_wire_strings() {
        let json = serde_json::to_string(&OrderStatus::OutForDelivery).unwrap();
        assert_eq!(json, r#""OUT_FOR_DELIVERY""#);
        assert_eq!(OrderStatus::InTransit.as_str(), "IN_TRANSIT");
    }

    #[test]
    fn order_status_transitions() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Shipped));
        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::InTransit.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Confirmed));
        assert!(!OrderStatus::Refunded.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn payment_method_tagged_json() {
        let method: PaymentMethod =
            serde_json::from_str(r#"{"method":"wallet","currency":"NGN"}"#).unwrap();
        assert_eq!(method, PaymentMethod::Wallet { currency: Currency::Ngn });
        let method: PaymentMethod = serde_json::from_str(r#"{"method":"gateway"}"#).unwrap();
        assert_eq!(method, PaymentMethod::Gateway);
    }
}
