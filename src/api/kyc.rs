// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity verification. A first successful verification provisions the
//! user's custodial wallet.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::Auth,
    error::ApiError,
    providers::DocumentType,
    settlement::KycOutcome,
    state::AppState,
};

/// Request to verify the caller's identity.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct KycVerifyRequest {
    /// Kind of government document.
    pub document_type: DocumentType,
    /// Document number as printed.
    pub document_number: String,
}

#[utoipa::path(
    post,
    path = "/v1/kyc/verify",
    tag = "KYC",
    security(("bearer_auth" = [])),
    request_body = KycVerifyRequest,
    responses(
        (status = 200, description = "Identity verified; wallet provisioned", body = KycOutcome),
        (status = 400, description = "Malformed document number"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Verification rejected"),
        (status = 503, description = "Identity provider unavailable")
    )
)]
pub async fn verify_kyc(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<KycVerifyRequest>,
) -> Result<(StatusCode, Json<KycOutcome>), ApiError> {
    if request.document_number.trim().is_empty() {
        return Err(ApiError::bad_request("document_number is required"));
    }
    let outcome = state
        .engine
        .verify_kyc(&user.user_id, request.document_type, request.document_number.trim())
        .await?;
    Ok((StatusCode::OK, Json(outcome)))
}
