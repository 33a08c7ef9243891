// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! External collaborators: payment gateway and identity verification.

pub mod gateway;
pub mod kyc;

pub use gateway::{
    ChargeInit, ChargeRequest, ChargeStatus, ChargeVerification, GatewayError,
    HttpPaymentGateway, PaymentGateway,
};
pub use kyc::{DocumentType, HttpIdentityVerifier, IdentityVerification, IdentityVerifier, KycError};

use async_trait::async_trait;

/// Stand-in for a provider without credentials. Every call fails as
/// not configured, which settlement reports as an upstream outage.
pub struct Unconfigured;

#[async_trait]
impl PaymentGateway for Unconfigured {
    async fn initiate_charge(&self, _charge: &ChargeRequest) -> Result<ChargeInit, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn verify_charge(&self, _reference: &str) -> Result<ChargeVerification, GatewayError> {
        Err(GatewayError::NotConfigured)
    }
}

#[async_trait]
impl IdentityVerifier for Unconfigured {
    async fn verify(
        &self,
        _document_type: DocumentType,
        _document_number: &str,
    ) -> Result<IdentityVerification, KycError> {
        Err(KycError::NotConfigured)
    }
}
