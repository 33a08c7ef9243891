// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::settlement::SettlementError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

/// Error body returned by every endpoint.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    /// Human-readable message
    pub error: String,
    /// Stable machine-readable reason code
    pub error_code: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    pub fn unprocessable(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "Internal error")
    }
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        let status = match &e {
            SettlementError::InvalidAddress(_)
            | SettlementError::InvalidAmount(_)
            | SettlementError::UnsupportedCurrency(_)
            | SettlementError::UnsupportedNetwork(_)
            | SettlementError::InvalidRequest(_) => StatusCode::BAD_REQUEST,

            SettlementError::InvalidTwoFactorCode | SettlementError::TwoFactorRequired => {
                StatusCode::UNAUTHORIZED
            }
            SettlementError::KycRequired | SettlementError::KycRejected => StatusCode::FORBIDDEN,

            SettlementError::NotFound(_) => StatusCode::NOT_FOUND,
            SettlementError::StaleCart(_)
            | SettlementError::OutOfStock { .. }
            | SettlementError::InvalidState(_) => StatusCode::CONFLICT,
            SettlementError::LimitExceeded(_)
            | SettlementError::InsufficientFunds { .. }
            | SettlementError::InsufficientGas
            | SettlementError::InsufficientBalance => StatusCode::UNPROCESSABLE_ENTITY,

            SettlementError::BroadcastFailed | SettlementError::UpstreamUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            SettlementError::IntegrityFailure | SettlementError::Internal(_) => {
                error!(error = ?e, "Request failed with internal error");
                return Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.code(), "Internal error");
            }
        };
        Self::new(status, e.code(), e.to_string())
    }
}

/// Bearer-token failures, raised by the `Auth` and `AdminOnly` extractors.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Bearer token required")]
    MissingToken,

    #[error("Bearer token is malformed")]
    MalformedToken,

    #[error("Bearer token signature is invalid")]
    InvalidSignature,

    #[error("Bearer token has expired")]
    TokenExpired,

    #[error("Bearer token is not yet valid")]
    TokenNotYetValid,

    #[error("Admin role required")]
    AdminRequired,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "MISSING_TOKEN",
            AuthError::MalformedToken => "MALFORMED_TOKEN",
            AuthError::InvalidSignature => "INVALID_TOKEN",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::TokenNotYetValid => "TOKEN_NOT_YET_VALID",
            AuthError::AdminRequired => "ADMIN_REQUIRED",
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        let status = match e {
            AuthError::AdminRequired => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        };
        Self::new(status, e.code(), e.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            error_code: self.code.to_string(),
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Currency;
    use axum::body::to_bytes;

    #[test]
    fn constructors_set_status_and_code() {
        let nf = ApiError::not_found("missing");
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
        assert_eq!(nf.code, "NOT_FOUND");
        assert_eq!(nf.message, "missing");

        let bad = ApiError::bad_request("bad");
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);

        let unp = ApiError::unprocessable("LIMIT_EXCEEDED", "too much");
        assert_eq!(unp.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(unp.code, "LIMIT_EXCEEDED");
    }

    #[test]
    fn settlement_errors_follow_the_taxonomy() {
        let cases = [
            (SettlementError::InvalidAmount("x".into()), StatusCode::BAD_REQUEST),
            (SettlementError::InvalidAddress("x".into()), StatusCode::BAD_REQUEST),
            (SettlementError::InvalidTwoFactorCode, StatusCode::UNAUTHORIZED),
            (SettlementError::KycRequired, StatusCode::FORBIDDEN),
            (SettlementError::OutOfStock { product_id: "p".into() }, StatusCode::CONFLICT),
            (
                SettlementError::InsufficientFunds { currency: Currency::Ngn },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (SettlementError::LimitExceeded("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (SettlementError::UpstreamUnavailable("Rates"), StatusCode::SERVICE_UNAVAILABLE),
            (SettlementError::IntegrityFailure, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            let code = error.code();
            let api: ApiError = error.into();
            assert_eq!(api.status, status, "{code}");
            assert_eq!(api.code, code);
        }
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let api: ApiError = SettlementError::Internal("redb: table corrupted".into()).into();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.message, "Internal error");
    }

    #[test]
    fn auth_errors_are_401_except_admin_required() {
        for e in [
            AuthError::MissingToken,
            AuthError::MalformedToken,
            AuthError::InvalidSignature,
            AuthError::TokenExpired,
            AuthError::TokenNotYetValid,
        ] {
            let code = e.code();
            let api: ApiError = e.into();
            assert_eq!(api.status, StatusCode::UNAUTHORIZED, "{code}");
            assert_eq!(api.code, code);
        }

        let api: ApiError = AuthError::AdminRequired.into();
        assert_eq!(api.status, StatusCode::FORBIDDEN);
        assert_eq!(api.code, "ADMIN_REQUIRED");
    }

    #[tokio::test]
    async fn expired_token_response_uses_the_common_body() {
        let response = AuthError::TokenExpired.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":"Bearer token has expired","error_code":"TOKEN_EXPIRED"}"#);
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":"bad data","error_code":"INVALID_REQUEST"}"#);
    }
}
