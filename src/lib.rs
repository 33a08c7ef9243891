// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! GON Settlement - Custodial Wallet & Settlement Core
//!
//! Holds one EVM key per user under versioned master keys, keeps a
//! multi-currency ledger, settles marketplace checkouts from the wallet or
//! through a card/bank gateway, and sends crypto withdrawals on Ethereum,
//! Polygon and BNB Smart Chain.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Bearer-token authentication (HS256 JWT)
//! - `blockchain` - EVM RPC, ERC-20 transfers, unit conversion
//! - `custody` - Master keys, key encryption, TOTP
//! - `limits` - Rolling-window withdrawal limits
//! - `providers` - Payment gateway and identity provider clients
//! - `rates` - Exchange rate oracle
//! - `settlement` - Checkout, refunds, top-ups and withdrawals
//! - `storage` - Embedded ledger, orders, users and audit trail (redb)
//! - `webhook` / `poller` - Asynchronous reconciliation

pub mod api;
pub mod auth;
pub mod blockchain;
pub mod config;
pub mod custody;
pub mod error;
pub mod limits;
pub mod models;
pub mod poller;
pub mod providers;
pub mod rates;
pub mod settlement;
pub mod state;
pub mod storage;
pub mod webhook;

#[cfg(test)]
mod testing;
