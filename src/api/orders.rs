// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Order reads for buyers; fulfilment and refunds for admins.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::{AdminOnly, Auth},
    error::ApiError,
    models::OrderStatus,
    settlement::{OrderPage, RefundReceipt},
    state::AppState,
    storage::Order,
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct OrderListQuery {
    /// Cursor from a previous page's `next_cursor`.
    pub cursor: Option<String>,
    /// Maximum number of results (default 20, at most 100).
    pub limit: Option<usize>,
}

/// Admin request to move an order along its fulfilment path.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
    /// Shown on the tracking timeline.
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RefundRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/orders",
    tag = "Orders",
    params(OrderListQuery),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "The caller's orders, newest first", body = OrderPage),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_orders(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<OrderPage>, ApiError> {
    let page = state
        .engine
        .list_orders(&user.user_id, query.cursor.as_deref(), query.limit)?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/v1/orders/{order_id}",
    tag = "Orders",
    params(("order_id" = String, Path, description = "Order identifier")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Order with tracking events", body = Order),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Order not found")
    )
)]
pub async fn get_order(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.engine.get_order(&user.user_id, &order_id)?))
}

#[utoipa::path(
    post,
    path = "/v1/orders/{order_id}/status",
    tag = "Orders",
    params(("order_id" = String, Path, description = "Order identifier")),
    security(("bearer_auth" = [])),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Order updated", body = Order),
        (status = 400, description = "Refunds go through the refund endpoint"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Transition not allowed")
    )
)]
pub async fn update_order_status(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<Order>, ApiError> {
    let order = state.engine.update_order_status(
        &admin.user_id,
        &order_id,
        request.status,
        request.note,
    )?;
    Ok(Json(order))
}

#[utoipa::path(
    post,
    path = "/v1/orders/{order_id}/refund",
    tag = "Orders",
    params(("order_id" = String, Path, description = "Order identifier")),
    security(("bearer_auth" = [])),
    request_body = RefundRequest,
    responses(
        (status = 200, description = "Order refunded", body = RefundReceipt),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Order is not paid or already refunded")
    )
)]
pub async fn refund_order(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<RefundReceipt>, ApiError> {
    let receipt = state
        .engine
        .refund_order(&admin.user_id, &order_id, request.reason)?;
    Ok(Json(receipt))
}
