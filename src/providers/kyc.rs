// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity verification provider.
//!
//! Anything other than an explicit `verified: true` is a rejection.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

/// Government identity documents accepted for verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Nin,
    Bvn,
    Passport,
    DriversLicense,
    VotersCard,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Nin => "nin",
            DocumentType::Bvn => "bvn",
            DocumentType::Passport => "passport",
            DocumentType::DriversLicense => "drivers_license",
            DocumentType::VotersCard => "voters_card",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityVerification {
    pub verified: bool,
    /// Provider claims (name, date of birth, ...). Never logged.
    pub claims: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum KycError {
    #[error("identity provider not configured")]
    NotConfigured,

    #[error("identity provider request failed: {0}")]
    Request(String),

    #[error("identity provider response was invalid: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(
        &self,
        document_type: DocumentType,
        document_number: &str,
    ) -> Result<IdentityVerification, KycError>;
}

/// HTTP client for the identity provider.
#[derive(Debug, Clone)]
pub struct HttpIdentityVerifier {
    base_url: String,
    api_key: String,
    http: Client,
}

impl HttpIdentityVerifier {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, KycError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KycError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
        })
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(
        &self,
        document_type: DocumentType,
        document_number: &str,
    ) -> Result<IdentityVerification, KycError> {
        let response = self
            .http
            .post(format!("{}/v1/verify", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&json!({
                "document_type": document_type.as_str(),
                "document_number": document_number,
            }))
            .send()
            .await
            .map_err(|e| KycError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(KycError::Request(format!("provider returned {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| KycError::InvalidResponse(e.to_string()))?;

        // 4xx bodies (unknown document, bad format) count as a plain rejection
        let verified = status.is_success() && body.get("verified").and_then(Value::as_bool) == Some(true);
        Ok(IdentityVerification {
            verified,
            claims: body.get("claims").cloned().unwrap_or(Value::Null),
        })
    }
}
