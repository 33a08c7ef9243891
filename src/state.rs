// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use crate::settlement::SettlementEngine;
use crate::webhook::WebhookReconciler;

/// Bearer-token verification settings.
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// HS256 secret. `None` selects development mode: tokens are decoded
    /// without signature verification.
    pub jwt_secret: Option<String>,
    /// Expected `iss` claim, if any.
    pub issuer: Option<String>,
}

impl AuthConfig {
    pub fn hs256(secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: Some(secret.into()),
            issuer: None,
        }
    }

    pub fn is_production(&self) -> bool {
        self.jwt_secret.is_some()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: SettlementEngine,
    pub webhooks: WebhookReconciler,
    pub auth_config: AuthConfig,
}

impl AppState {
    pub fn new(
        engine: SettlementEngine,
        webhook_secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            webhooks: WebhookReconciler::new(engine.clone(), webhook_secret),
            engine,
            auth_config: AuthConfig::default(),
        }
    }

    pub fn with_auth_config(mut self, auth_config: AuthConfig) -> Self {
        self.auth_config = auth_config;
        self
    }
}
