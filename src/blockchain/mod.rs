// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain integration for Ethereum, Polygon and BNB Smart Chain.
//!
//! This module provides:
//! - Native and ERC-20 balance queries
//! - EIP-1559 fee estimation
//! - Transfer signing and broadcasting
//! - Receipt lookups for confirmation polling
//!
//! Settlement only talks to the [`ChainRpc`] trait so tests can swap in a
//! fake chain.

pub mod client;
pub mod erc20;
pub mod types;
pub mod units;

pub use client::{ChainError, ChainRpc, EvmRpc, RpcUrls};
pub use types::*;
pub use units::{format_amount, from_base_units, parse_address, to_base_units};
