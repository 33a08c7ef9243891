// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{AuthenticatedUser, Role},
    custody::RotationReport,
    error::ErrorBody,
    models::{
        Chain, Currency, KycTier, OrderStatus, PaymentMethod, PaymentStatus, TxKind, TxStatus,
        WalletBalances,
    },
    providers::DocumentType,
    rates::RateSource,
    settlement::{
        CartLine, CheckoutReceipt, CheckoutRequest, KycOutcome, OrderPage, RefundReceipt,
        TopupInit, TransactionPage, TwoFactorSetup, WalletOverview, WithdrawalReceipt,
        WithdrawalRequest,
    },
    state::AppState,
    storage::{
        AuditEvent, AuditEventType, CryptoAddress, Order, OrderLine, TrackingEvent,
        TransactionRecord,
    },
};

pub mod admin;
pub mod checkout;
pub mod health;
pub mod kyc;
pub mod orders;
pub mod rates;
pub mod transactions;
pub mod two_factor;
pub mod wallet;
pub mod webhooks;
pub mod withdrawals;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/kyc/verify", post(kyc::verify_kyc))
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/topup", post(wallet::topup))
        .route("/transactions", get(transactions::list_transactions))
        .route("/rates", get(rates::get_rates))
        .route("/checkout", post(checkout::checkout))
        .route("/orders", get(orders::list_orders))
        .route("/orders/{order_id}", get(orders::get_order))
        .route("/orders/{order_id}/status", post(orders::update_order_status))
        .route("/orders/{order_id}/refund", post(orders::refund_order))
        .route("/withdrawals", post(withdrawals::withdraw))
        .route("/2fa/setup", post(two_factor::setup))
        .route("/2fa/confirm", post(two_factor::confirm))
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        .route("/admin/keys/rotate", post(admin::rotate_master_keys))
        .route("/admin/audit", get(admin::audit_log));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "GON Settlement API",
        description = "Custodial wallets, checkout settlement and crypto withdrawals."
    ),
    modifiers(&SecurityAddon),
    paths(
        health::health,
        health::liveness,
        health::readiness,
        kyc::verify_kyc,
        wallet::get_wallet,
        wallet::topup,
        transactions::list_transactions,
        rates::get_rates,
        checkout::checkout,
        orders::list_orders,
        orders::get_order,
        orders::update_order_status,
        orders::refund_order,
        withdrawals::withdraw,
        two_factor::setup,
        two_factor::confirm,
        webhooks::payment_webhook,
        admin::rotate_master_keys,
        admin::audit_log,
    ),
    components(schemas(
        ErrorBody,
        AuthenticatedUser,
        Role,
        Currency,
        Chain,
        KycTier,
        TxKind,
        TxStatus,
        OrderStatus,
        PaymentStatus,
        PaymentMethod,
        WalletBalances,
        DocumentType,
        RateSource,
        CryptoAddress,
        TransactionRecord,
        Order,
        OrderLine,
        TrackingEvent,
        AuditEvent,
        AuditEventType,
        RotationReport,
        CartLine,
        CheckoutRequest,
        CheckoutReceipt,
        KycOutcome,
        OrderPage,
        RefundReceipt,
        TopupInit,
        TransactionPage,
        TwoFactorSetup,
        WalletOverview,
        WithdrawalRequest,
        WithdrawalReceipt,
        health::ReadyResponse,
        health::HealthChecks,
        health::HealthResponse,
        kyc::KycVerifyRequest,
        wallet::TopupRequest,
        rates::RatesResponse,
        rates::RateQuote,
        orders::UpdateOrderStatusRequest,
        orders::RefundRequest,
        two_factor::ConfirmTwoFactorRequest,
        two_factor::ConfirmTwoFactorResponse,
        webhooks::WebhookAck,
        admin::AuditLogResponse,
    )),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "KYC", description = "Identity verification and wallet provisioning"),
        (name = "Wallet", description = "Balances, addresses and top-ups"),
        (name = "Transactions", description = "Ledger history"),
        (name = "Rates", description = "Conversion rates"),
        (name = "Checkout", description = "Order placement and payment"),
        (name = "Orders", description = "Order tracking, fulfilment and refunds"),
        (name = "Withdrawals", description = "On-chain crypto withdrawals"),
        (name = "Two-Factor", description = "TOTP enrolment"),
        (name = "Webhooks", description = "Payment gateway callbacks"),
        (name = "Admin", description = "Operational endpoints")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::extractor::sign_token;
    use crate::state::AuthConfig;
    use crate::testing::Harness;
    use crate::webhook::{sign, SIGNATURE_HEADER};
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use rust_decimal::dec;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const JWT_SECRET: &str = "router-test-secret";
    const WEBHOOK_SECRET: &str = "router-webhook-secret";

    fn app(h: &Harness) -> Router {
        router(
            AppState::new(h.engine.clone(), WEBHOOK_SECRET)
                .with_auth_config(AuthConfig::hs256(JWT_SECRET)),
        )
    }

    fn token(user_id: &str, role: &str) -> String {
        sign_token(
            JWT_SECRET,
            user_id,
            Some(role),
            chrono::Utc::now().timestamp() + 3600,
        )
    }

    fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(t) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, bearer: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let h = Harness::new();
        let _ = app(&h).into_make_service();
    }

    #[tokio::test]
    async fn health_and_docs_are_public() {
        let h = Harness::new();

        let (status, body) = send(app(&h), get("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["database"], "ok");
        assert_eq!(body["checks"]["auth_mode"], "production");

        let (status, _) = send(app(&h), get("/health/live", None)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, doc) = send(app(&h), get("/api-doc/openapi.json", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(doc["paths"]["/v1/withdrawals"].is_object());
        assert!(doc["components"]["securitySchemes"]["bearer_auth"].is_object());
    }

    #[tokio::test]
    async fn protected_routes_require_a_token() {
        let h = Harness::new();
        let (status, body) = send(app(&h), get("/v1/wallet", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "MISSING_TOKEN");
    }

    #[tokio::test]
    async fn wallet_checkout_over_http() {
        let h = Harness::new();
        h.fund("buyer", Currency::Ngn, dec!(100000));
        h.product("lamp", dec!(7500), 5);
        let buyer = token("buyer", "client");

        let (status, body) = send(
            app(&h),
            post_json(
                "/v1/checkout",
                Some(&buyer),
                json!({
                    "lines": [{ "product_id": "lamp", "quantity": 2, "unit_price": "7500" }],
                    "payment": { "method": "wallet", "currency": "NGN" },
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["order"]["status"], "CONFIRMED");
        let order_id = body["order"]["id"].as_str().unwrap().to_string();

        let (status, wallet) = send(app(&h), get("/v1/wallet", Some(&buyer))).await;
        assert_eq!(status, StatusCode::OK);
        let ngn: rust_decimal::Decimal = wallet["balances"]["ngn"].as_str().unwrap().parse().unwrap();
        assert_eq!(ngn, dec!(82500));

        let (status, order) =
            send(app(&h), get(&format!("/v1/orders/{order_id}"), Some(&buyer))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(order["id"], order_id);

        let (status, _) = send(
            app(&h),
            get(&format!("/v1/orders/{order_id}"), Some(&token("other", "client"))),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_routes_reject_clients() {
        let h = Harness::new();
        let (status, body) = send(
            app(&h),
            post_json(
                "/v1/orders/any/status",
                Some(&token("buyer", "client")),
                json!({ "status": "SHIPPED" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error_code"], "ADMIN_REQUIRED");

        let (status, body) = send(
            app(&h),
            post_json(
                "/v1/orders/any/status",
                Some(&token("ops", "admin")),
                json!({ "status": "SHIPPED" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn settlement_errors_carry_reason_codes() {
        let h = Harness::new();
        let (status, body) = send(
            app(&h),
            post_json(
                "/v1/withdrawals",
                Some(&token("u1", "client")),
                json!({
                    "currency": "USDT",
                    "chain": "ethereum",
                    "amount": "10",
                    "destination": "0x1111111111111111111111111111111111111111",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error_code"], "KYC_REQUIRED");
    }

    #[tokio::test]
    async fn webhook_requires_signature_and_acknowledges() {
        let h = Harness::new();
        let payload = json!({ "event": "subscription.create", "data": { "reference": "s1" } })
            .to_string();

        let unsigned = Request::builder()
            .method("POST")
            .uri("/v1/webhooks/payments")
            .body(Body::from(payload.clone()))
            .unwrap();
        let (status, body) = send(app(&h), unsigned).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "INVALID_SIGNATURE");

        let signed = Request::builder()
            .method("POST")
            .uri("/v1/webhooks/payments")
            .header(SIGNATURE_HEADER, sign(WEBHOOK_SECRET.as_bytes(), payload.as_bytes()))
            .body(Body::from(payload))
            .unwrap();
        let (status, body) = send(app(&h), signed).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ignored");
    }

    #[tokio::test]
    async fn rates_are_served_without_auth() {
        let h = Harness::new();
        let (status, body) = send(app(&h), get("/v1/rates", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "fixed");
        assert_eq!(body["degraded"], false);
    }
}
