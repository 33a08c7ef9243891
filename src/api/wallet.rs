// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The caller's wallet: balances, custodial addresses and gateway top-ups.

use axum::{extract::State, http::StatusCode, Json};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::Auth,
    error::ApiError,
    settlement::{TopupInit, WalletOverview},
    state::AppState,
};

/// Request to fund the NGN balance through the payment gateway.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopupRequest {
    /// Amount in NGN, at most two decimal places.
    #[schema(value_type = String, example = "5000.00")]
    pub amount: Decimal,
    /// Address the gateway sends its receipt to.
    pub email: String,
}

#[utoipa::path(
    get,
    path = "/v1/wallet",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Balances and custodial addresses", body = WalletOverview),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn get_wallet(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<WalletOverview>, ApiError> {
    Ok(Json(state.engine.wallet_overview(&user.user_id)?))
}

#[utoipa::path(
    post,
    path = "/v1/wallet/topup",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    request_body = TopupRequest,
    responses(
        (status = 201, description = "Charge opened; pay at the authorization URL", body = TopupInit),
        (status = 400, description = "Invalid amount or email"),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Payment gateway unavailable")
    )
)]
pub async fn topup(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<TopupRequest>,
) -> Result<(StatusCode, Json<TopupInit>), ApiError> {
    let init = state
        .engine
        .initiate_topup(&user.user_id, request.amount, &request.email)
        .await?;
    Ok((StatusCode::CREATED, Json(init)))
}
