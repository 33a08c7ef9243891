// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims and the authenticated caller.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Caller role. Admins run fulfilment, refunds and key rotation; everyone
/// else is a buyer acting on their own wallet and orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Client,
}

impl Role {
    /// Only an explicit `admin` claim (any case) grants admin.
    fn from_claim(claim: Option<&str>) -> Self {
        match claim {
            Some(role) if role.eq_ignore_ascii_case("admin") => Role::Admin,
            _ => Role::Client,
        }
    }
}

/// Claims carried by a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the canonical user identifier
    pub sub: String,

    /// Expiration timestamp
    pub exp: i64,

    #[serde(default)]
    pub iat: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Session ID, if the issuer tracks sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// `admin` or `client`; anything else is treated as `client`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Authenticated user information extracted from a verified token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    /// Canonical user ID (`sub` claim)
    pub user_id: String,

    pub role: Role,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Token expiration (Unix timestamp)
    #[serde(skip)]
    pub expires_at: i64,
}

impl AuthenticatedUser {
    pub fn from_claims(claims: Claims) -> Self {
        Self {
            role: Role::from_claim(claims.role.as_deref()),
            user_id: claims.sub,
            session_id: claims.sid,
            expires_at: claims.exp,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
