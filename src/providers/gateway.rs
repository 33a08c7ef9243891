// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Card/bank payment gateway (Paystack-compatible API).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::info;

use crate::models::Currency;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    Pending,
    Success,
    Failed,
}

/// A charge to open with the gateway.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// Our reference; the gateway echoes it back in webhooks.
    pub reference: String,
    pub amount_minor: u64,
    pub currency: Currency,
    pub email: String,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct ChargeInit {
    pub reference: String,
    /// Hosted payment page for the customer.
    pub authorization_url: Option<String>,
}

/// Server-side view of a charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeVerification {
    pub status: ChargeStatus,
    pub amount_minor: u64,
    pub currency: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway not configured")]
    NotConfigured,

    #[error("gateway request failed: {0}")]
    Request(String),

    #[error("gateway rejected the request: {0}")]
    Rejected(String),

    #[error("gateway response was invalid: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate_charge(&self, charge: &ChargeRequest) -> Result<ChargeInit, GatewayError>;

    async fn verify_charge(&self, reference: &str) -> Result<ChargeVerification, GatewayError>;
}

/// Convert a decimal amount to the currency's minor unit (kobo, cents).
pub fn to_minor_units(amount: Decimal, currency: Currency) -> Option<u64> {
    let factor = Decimal::from(10u64.checked_pow(currency.scale())?);
    let minor = amount.checked_mul(factor)?;
    if minor.fract() != Decimal::ZERO {
        return None;
    }
    minor.to_u64()
}

pub fn from_minor_units(minor: u64, currency: Currency) -> Decimal {
    Decimal::from(minor) / Decimal::from(10u64.pow(currency.scale()))
}

/// HTTP client for the gateway.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    base_url: String,
    secret_key: String,
    http: Client,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            http,
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, GatewayError> {
        let response = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        if !status.is_success() || body.get("status").and_then(Value::as_bool) == Some(false) {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(if status.is_server_error() {
                GatewayError::Request(format!("{status}: {message}"))
            } else {
                GatewayError::Rejected(message)
            });
        }

        body.get("data")
            .cloned()
            .ok_or_else(|| GatewayError::InvalidResponse("missing data".to_string()))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn initiate_charge(&self, charge: &ChargeRequest) -> Result<ChargeInit, GatewayError> {
        let payload = json!({
            "reference": charge.reference,
            "amount": charge.amount_minor,
            "currency": charge.currency.code(),
            "email": charge.email,
            "metadata": charge.metadata,
        });

        let data = self
            .send(
                self.http
                    .post(format!("{}/transaction/initialize", self.base_url))
                    .json(&payload),
            )
            .await?;

        let reference = data
            .get("reference")
            .and_then(Value::as_str)
            .unwrap_or(&charge.reference)
            .to_string();
        info!(reference = %reference, amount_minor = charge.amount_minor, "Gateway charge initiated");

        Ok(ChargeInit {
            reference,
            authorization_url: data
                .get("authorization_url")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn verify_charge(&self, reference: &str) -> Result<ChargeVerification, GatewayError> {
        let encoded: String = url::form_urlencoded::byte_serialize(reference.as_bytes()).collect();
        let data = self
            .send(
                self.http
                    .get(format!("{}/transaction/verify/{}", self.base_url, encoded)),
            )
            .await?;
        parse_verification(&data)
    }
}

fn parse_verification(data: &Value) -> Result<ChargeVerification, GatewayError> {
    let raw_status = data
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidResponse("missing charge status".to_string()))?;
    let amount_minor = data
        .get("amount")
        .and_then(Value::as_u64)
        .ok_or_else(|| GatewayError::InvalidResponse("missing charge amount".to_string()))?;
    let currency = data
        .get("currency")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidResponse("missing charge currency".to_string()))?;

    Ok(ChargeVerification {
        status: map_charge_status(raw_status),
        amount_minor,
        currency: currency.to_ascii_uppercase(),
    })
}

pub fn map_charge_status(raw_status: &str) -> ChargeStatus {
    match raw_status.to_ascii_lowercase().as_str() {
        "success" => ChargeStatus::Success,
        "failed" | "abandoned" | "reversed" => ChargeStatus::Failed,
        _ => ChargeStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use rust_decimal::dec;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn gateway(base: &str) -> HttpPaymentGateway {
        HttpPaymentGateway::new(base, "sk_test", Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn charge_status_mapping_is_stable() {
        assert_eq!(map_charge_status("success"), ChargeStatus::Success);
        assert_eq!(map_charge_status("abandoned"), ChargeStatus::Failed);
        assert_eq!(map_charge_status("failed"), ChargeStatus::Failed);
        assert_eq!(map_charge_status("ongoing"), ChargeStatus::Pending);
    }

    #[test]
    fn minor_units() {
        assert_eq!(to_minor_units(dec!(17500), Currency::Ngn), Some(1_750_000));
        assert_eq!(to_minor_units(dec!(10.5), Currency::Usd), Some(1050));
        assert_eq!(to_minor_units(dec!(0.001), Currency::Ngn), None);
        assert_eq!(to_minor_units(dec!(-1), Currency::Ngn), None);
        assert_eq!(from_minor_units(1_750_000, Currency::Ngn), dec!(17500));
    }

    #[tokio::test]
    async fn initiate_sends_bearer_and_reads_reference() {
        let router = Router::new().route(
            "/transaction/initialize",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer sk_test");
                assert_eq!(body["amount"], 1_750_000);
                assert_eq!(body["currency"], "NGN");
                Json(json!({
                    "status": true,
                    "data": {
                        "reference": body["reference"],
                        "authorization_url": "https://checkout.example/abc"
                    }
                }))
            }),
        );
        let base = serve(router).await;

        let init = gateway(&base)
            .initiate_charge(&ChargeRequest {
                reference: "ref-1".into(),
                amount_minor: 1_750_000,
                currency: Currency::Ngn,
                email: "u1@example.com".into(),
                metadata: json!({"purpose": "wallet_topup"}),
            })
            .await
            .unwrap();
        assert_eq!(init.reference, "ref-1");
        assert_eq!(
            init.authorization_url.as_deref(),
            Some("https://checkout.example/abc")
        );
    }

    #[tokio::test]
    async fn verify_parses_charge() {
        let router = Router::new().route(
            "/transaction/verify/{reference}",
            get(|Path(reference): Path<String>| async move {
                Json(json!({
                    "status": true,
                    "data": {"reference": reference, "status": "success", "amount": 500000, "currency": "ngn"}
                }))
            }),
        );
        let base = serve(router).await;

        let verification = gateway(&base).verify_charge("ref-2").await.unwrap();
        assert_eq!(
            verification,
            ChargeVerification {
                status: ChargeStatus::Success,
                amount_minor: 500_000,
                currency: "NGN".into(),
            }
        );
    }

    #[tokio::test]
    async fn rejection_and_outage_are_distinguished() {
        let router = Router::new()
            .route(
                "/transaction/verify/{reference}",
                get(|| async {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(json!({"status": false, "message": "Transaction reference not found"})),
                    )
                }),
            )
            .route(
                "/transaction/initialize",
                post(|| async {
                    (
                        StatusCode::BAD_GATEWAY,
                        Json(json!({"status": false, "message": "upstream"})),
                    )
                }),
            );
        let base = serve(router).await;
        let gateway = gateway(&base);

        assert!(matches!(
            gateway.verify_charge("nope").await,
            Err(GatewayError::Rejected(_))
        ));
        let charge = ChargeRequest {
            reference: "r".into(),
            amount_minor: 1,
            currency: Currency::Ngn,
            email: "e@example.com".into(),
            metadata: Value::Null,
        };
        assert!(matches!(
            gateway.initiate_charge(&charge).await,
            Err(GatewayError::Request(_))
        ));
    }
}
