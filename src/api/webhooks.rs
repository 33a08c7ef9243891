// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Payment gateway webhook receiver.
//!
//! The body is taken as raw bytes: the signature covers the exact bytes
//! the gateway sent. Every authenticated delivery is acknowledged with 200,
//! including ones that could not be applied, so the gateway does not retry
//! events this service has already logged. Only a signature failure is
//! rejected.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::{
    error::ApiError,
    state::AppState,
    webhook::{WebhookError, SIGNATURE_HEADER},
};

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    /// `applied`, `duplicate`, `ignored` or `error`.
    pub status: String,
}

#[utoipa::path(
    post,
    path = "/v1/webhooks/payments",
    tag = "Webhooks",
    params(("x-paystack-signature" = String, Header, description = "Hex HMAC-SHA512 of the raw body")),
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Delivery acknowledged", body = WebhookAck),
        (status = 401, description = "Signature missing or invalid")
    )
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAck>), ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let status = match state.webhooks.handle(&body, signature).await {
        Ok(outcome) => outcome.as_str(),
        Err(WebhookError::InvalidSignature) => {
            return Err(ApiError::new(
                StatusCode::UNAUTHORIZED,
                "INVALID_SIGNATURE",
                "Webhook signature missing or invalid",
            ));
        }
        Err(e) => {
            error!(error = %e, "Webhook delivery could not be applied");
            "error"
        }
    };

    Ok((
        StatusCode::OK,
        Json(WebhookAck {
            status: status.to_string(),
        }),
    ))
}
