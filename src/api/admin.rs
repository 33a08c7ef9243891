// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin-only operational endpoints: master key rotation and the audit
//! trail.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::AdminOnly,
    custody::{rotate_keys, RotationReport},
    error::ApiError,
    settlement::SettlementError,
    state::AppState,
    storage::{AuditEvent, AuditEventType},
};

const DEFAULT_AUDIT_LIMIT: usize = 100;
const MAX_AUDIT_LIMIT: usize = 1000;

/// Query parameters for audit log queries.
#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditQueryParams {
    /// Filter by user ID.
    pub user_id: Option<String>,
    /// Maximum number of results (default 100).
    pub limit: Option<usize>,
}

/// Response for audit log queries.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuditLogResponse {
    /// Audit events, newest first.
    pub events: Vec<AuditEvent>,
    pub total: usize,
}

/// Re-encrypt every custodial key under the active master key version.
#[utoipa::path(
    post,
    path = "/v1/admin/keys/rotate",
    tag = "Admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Rotation sweep summary", body = RotationReport),
        (status = 403, description = "Admin role required")
    )
)]
pub async fn rotate_master_keys(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
) -> Result<Json<RotationReport>, ApiError> {
    let engine = state.engine.clone();
    let report = tokio::task::spawn_blocking(move || {
        let storage = engine.storage();
        rotate_keys(engine.crypto(), &storage.users, &storage.audit)
    })
    .await
    .map_err(|e| ApiError::from(SettlementError::Internal(e.to_string())))?;

    state.engine.storage().audit.record(
        AuditEvent::new(AuditEventType::KeyRotationRequested)
            .with_user(&admin.user_id)
            .with_details(serde_json::json!({
                "rotated": report.rotated,
                "failed": report.failed,
            })),
    );
    Ok(Json(report))
}

#[utoipa::path(
    get,
    path = "/v1/admin/audit",
    tag = "Admin",
    params(AuditQueryParams),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Audit events", body = AuditLogResponse),
        (status = 403, description = "Admin role required")
    )
)]
pub async fn audit_log(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Query(query): Query<AuditQueryParams>,
) -> Result<Json<AuditLogResponse>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);
    let audit = &state.engine.storage().audit;
    let events = match query.user_id.as_deref() {
        Some(user_id) => audit.search_by_user(user_id, limit),
        None => audit.recent(limit),
    }
    .map_err(SettlementError::from)?;

    Ok(Json(AuditLogResponse {
        total: events.len(),
        events,
    }))
}
