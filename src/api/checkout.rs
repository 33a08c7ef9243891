// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};

use crate::{
    auth::Auth,
    error::ApiError,
    settlement::{CheckoutReceipt, CheckoutRequest},
    state::AppState,
};

/// Price the cart, reserve stock and pay from the wallet or via the
/// payment gateway.
///
/// Wallet payments settle immediately. Gateway payments return an
/// authorization URL and the order stays `PENDING` until the gateway
/// confirms the charge.
#[utoipa::path(
    post,
    path = "/v1/checkout",
    tag = "Checkout",
    security(("bearer_auth" = [])),
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order placed", body = CheckoutReceipt),
        (status = 400, description = "Invalid cart"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Stale cart or out of stock"),
        (status = 422, description = "Insufficient funds"),
        (status = 503, description = "Payment gateway unavailable")
    )
)]
pub async fn checkout(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutReceipt>), ApiError> {
    let receipt = state.engine.checkout(&user.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}
