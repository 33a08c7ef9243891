// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! TOTP enrolment. Once enabled, withdrawals require a current code.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::Auth,
    error::ApiError,
    models::KycTier,
    settlement::TwoFactorSetup,
    state::AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfirmTwoFactorRequest {
    /// Six-digit code from the authenticator app.
    pub code: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConfirmTwoFactorResponse {
    pub enabled: bool,
    pub kyc_tier: KycTier,
}

/// Start enrolment. The secret is shown only in this response.
#[utoipa::path(
    post,
    path = "/v1/2fa/setup",
    tag = "Two-Factor",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Secret and otpauth:// URI", body = TwoFactorSetup),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn setup(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<TwoFactorSetup>, ApiError> {
    Ok(Json(state.engine.setup_two_factor(&user.user_id)?))
}

#[utoipa::path(
    post,
    path = "/v1/2fa/confirm",
    tag = "Two-Factor",
    security(("bearer_auth" = [])),
    request_body = ConfirmTwoFactorRequest,
    responses(
        (status = 200, description = "Second factor enabled", body = ConfirmTwoFactorResponse),
        (status = 401, description = "Invalid code"),
        (status = 409, description = "No enrolment in progress or already enabled")
    )
)]
pub async fn confirm(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<ConfirmTwoFactorRequest>,
) -> Result<Json<ConfirmTwoFactorResponse>, ApiError> {
    let kyc_tier = state
        .engine
        .confirm_two_factor(&user.user_id, request.code.trim())?;
    Ok(Json(ConfirmTwoFactorResponse {
        enabled: true,
        kyc_tier,
    }))
}
