// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Bearer-token authentication for the settlement API.
//!
//! ## Auth Flow
//!
//! 1. The identity service issues an HS256 JWT for the user
//! 2. Clients send `Authorization: Bearer <JWT>`
//! 3. The server:
//!    - Verifies signature and expiry against `AUTH_JWT_SECRET`
//!    - Extracts:
//!      - `sub` → canonical `user_id`
//!      - `role` → [`Role`] (defaults to `client`)
//!
//! ## Security
//!
//! - All endpoints except health, docs and the gateway webhook require a token
//! - Admin endpoints additionally require the `admin` role
//! - Clock skew tolerance is 60 seconds
//! - Without `AUTH_JWT_SECRET` tokens are only decoded (development mode)

pub mod claims;
pub mod extractor;

pub use crate::error::AuthError;
pub use claims::{AuthenticatedUser, Claims, Role};
pub use extractor::{AdminOnly, Auth};
