// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractor for authenticated users.
//!
//! Use the `Auth` extractor in handlers to require authentication:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> impl IntoResponse {
//!     // user is AuthenticatedUser
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use super::{AuthError, AuthenticatedUser, Claims};
use crate::state::{AppState, AuthConfig};
use crate::storage::{AuditEvent, AuditEventType};

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Extractor for authenticated users.
///
/// ## Authentication Modes
///
/// - **Production mode** (`AUTH_JWT_SECRET` set): HS256 signature and expiry
///   are verified
/// - **Development mode** (no secret): structure and expiry only
///
/// # Example
///
/// ```rust,ignore
/// async fn get_wallet(
///     Auth(user): Auth,
///     State(state): State<AppState>,
/// ) -> Result<Json<WalletOverview>, ApiError> {
///     // user.user_id contains the authenticated user's ID
/// }
/// ```
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // Already authenticated by an outer layer
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>().cloned() {
            return Ok(Auth(user));
        }

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingToken)?
            .to_str()
            .map_err(|_| AuthError::MalformedToken)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::MalformedToken)?;

        let user = verify_jwt(token, &state.auth_config)?;
        Ok(Auth(user))
    }
}

/// Longest accepted `sub` claim, in bytes.
const MAX_SUBJECT_LEN: usize = 128;

/// Verify a token and extract the user.
pub fn verify_jwt(token: &str, auth_config: &AuthConfig) -> Result<AuthenticatedUser, AuthError> {
    let user = match auth_config.jwt_secret.as_deref() {
        Some(secret) => verify_jwt_production(token, secret, auth_config.issuer.as_deref())?,
        None => verify_jwt_development(token)?,
    };
    if !is_valid_subject(&user.user_id) {
        tracing::warn!("Token subject rejected");
        return Err(AuthError::MalformedToken);
    }
    Ok(user)
}

/// User ids become storage key components; `|` separates those.
fn is_valid_subject(sub: &str) -> bool {
    !sub.is_empty()
        && sub.len() <= MAX_SUBJECT_LEN
        && !sub.chars().any(|c| c == '|' || c.is_control())
}

fn verify_jwt_production(
    token: &str,
    secret: &str,
    issuer: Option<&str>,
) -> Result<AuthenticatedUser, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = CLOCK_SKEW_LEEWAY;
    validation.validate_aud = false;
    if let Some(issuer) = issuer {
        validation.set_issuer(&[issuer]);
    }

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        jsonwebtoken::errors::ErrorKind::InvalidSignature
        | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm
        | jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::InvalidSignature,
        jsonwebtoken::errors::ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
        _ => AuthError::MalformedToken,
    })?;

    Ok(AuthenticatedUser::from_claims(token_data.claims))
}

/// Development verification (no signature check).
///
/// WARNING: only for local development.
fn verify_jwt_development(token: &str) -> Result<AuthenticatedUser, AuthError> {
    let token_data = jsonwebtoken::dangerous::insecure_decode::<Claims>(token)
        .map_err(|_| AuthError::MalformedToken)?;
    let claims = token_data.claims;

    let now = chrono::Utc::now().timestamp();
    if claims.exp > 0 && claims.exp < now - CLOCK_SKEW_LEEWAY as i64 {
        return Err(AuthError::TokenExpired);
    }

    Ok(AuthenticatedUser::from_claims(claims))
}

/// Extractor that requires admin role.
pub struct AdminOnly(pub AuthenticatedUser);

impl FromRequestParts<AppState> for AdminOnly {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(user) = Auth::from_request_parts(parts, state).await?;

        if !user.is_admin() {
            tracing::warn!(user_id = %user.user_id, path = %parts.uri.path(), "Admin route denied");
            state.engine.storage().audit.record(
                AuditEvent::new(AuditEventType::PermissionDenied)
                    .with_user(&user.user_id)
                    .with_resource("route", parts.uri.path())
                    .failed("admin role required"),
            );
            return Err(AuthError::AdminRequired);
        }

        Ok(AdminOnly(user))
    }
}

/// Sign an HS256 token for tests.
#[cfg(test)]
pub(crate) fn sign_token(secret: &str, user_id: &str, role: Option<&str>, exp: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub: user_id.to_string(),
        exp,
        iat: chrono::Utc::now().timestamp(),
        iss: None,
        sid: Some("sess_123".into()),
        role: role.map(str::to_string),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
