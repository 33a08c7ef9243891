// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{auth::Auth, error::ApiError, settlement::TransactionPage, state::AppState};

/// Query parameters for the transaction history.
#[derive(Debug, Deserialize, IntoParams)]
pub struct TransactionListQuery {
    /// Cursor from a previous page's `next_cursor`.
    pub cursor: Option<String>,
    /// Maximum number of results (default 20, at most 100).
    #[param(default = 20)]
    pub limit: Option<usize>,
}

/// The caller's transactions, newest first.
#[utoipa::path(
    get,
    path = "/v1/transactions",
    tag = "Transactions",
    params(TransactionListQuery),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Transaction history", body = TransactionPage),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_transactions(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(query): Query<TransactionListQuery>,
) -> Result<Json<TransactionPage>, ApiError> {
    let page = state
        .engine
        .list_transactions(&user.user_id, query.cursor.as_deref(), query.limit)?;
    Ok(Json(page))
}
