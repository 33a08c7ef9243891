// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};

use crate::{
    auth::Auth,
    error::ApiError,
    settlement::{WithdrawalReceipt, WithdrawalRequest},
    state::AppState,
};

/// Send crypto from the caller's custodial address to an external address.
///
/// The balance is debited when the transfer is broadcast. The returned
/// transaction stays `PENDING` until the chain confirms it.
#[utoipa::path(
    post,
    path = "/v1/withdrawals",
    tag = "Withdrawals",
    security(("bearer_auth" = [])),
    request_body = WithdrawalRequest,
    responses(
        (status = 202, description = "Transfer broadcast", body = WithdrawalReceipt),
        (status = 400, description = "Invalid amount, address, currency or network"),
        (status = 401, description = "Missing or invalid two-factor code"),
        (status = 403, description = "Identity verification required"),
        (status = 422, description = "Limit exceeded or insufficient funds"),
        (status = 503, description = "Broadcast failed; balance restored")
    )
)]
pub async fn withdraw(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<WithdrawalRequest>,
) -> Result<(StatusCode, Json<WithdrawalReceipt>), ApiError> {
    let receipt = state.engine.withdraw(&user.user_id, request).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}
