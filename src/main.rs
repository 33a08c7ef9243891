// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gon_settlement::{
    api::router,
    blockchain::{EvmRpc, RpcUrls},
    config::{AppConfig, RateOracleMode, LOG_FORMAT_ENV},
    custody::{rotate_keys, KeyManager, WalletCrypto},
    poller::ConfirmationPoller,
    providers::{
        HttpIdentityVerifier, HttpPaymentGateway, IdentityVerifier, PaymentGateway, Unconfigured,
    },
    rates::{
        live::{DEFAULT_CRYPTO_RATES_URL, DEFAULT_FIAT_RATES_URL},
        ExchangeRateOracle, FixedRateOracle, LiveRateOracle,
    },
    settlement::{Collaborators, SettlementEngine},
    state::{AppState, AuthConfig},
    storage::Storage,
};

/// How long fetched live rates are served before a refresh.
const RATE_TTL: std::time::Duration = std::time::Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] gon_settlement::config::ConfigError),

    #[error("master keys: {0}")]
    Keys(#[from] gon_settlement::custody::CryptoError),

    #[error("storage: {0}")]
    Storage(#[from] gon_settlement::storage::StoreError),

    #[error("{0}")]
    Init(String),

    #[error("server: {0}")]
    Server(#[from] std::io::Error),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "GON settlement server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), StartupError> {
    // Install the ring crypto provider for rustls (must be done before any TLS operations)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| StartupError::Init("failed to install rustls crypto provider".into()))?;

    let config = AppConfig::from_env()?;

    let auth_config = match config.jwt_secret.clone() {
        Some(secret) => AuthConfig::hs256(secret),
        None if cfg!(feature = "dev") => {
            warn!("AUTH_JWT_SECRET not set; bearer tokens are NOT signature-checked (development mode)");
            AuthConfig::default()
        }
        None => {
            return Err(StartupError::Init(
                "AUTH_JWT_SECRET is required unless built with the `dev` feature".into(),
            ))
        }
    };

    let keys = Arc::new(KeyManager::from_env()?);
    info!(
        active_version = keys.active_version(),
        versions = keys.versions().count(),
        "Master keys loaded"
    );
    let crypto = WalletCrypto::new(keys);

    std::fs::create_dir_all(&config.data_dir)?;
    let storage = Storage::open(&config.database_path())?;
    info!(path = %config.database_path().display(), "Database opened");

    // Re-seal anything still under a retired master key version
    let report = rotate_keys(&crypto, &storage.users, &storage.audit);
    if report.failed > 0 {
        warn!(failed = report.failed, "Some custodial keys could not be rotated");
    }

    let rates: Arc<dyn ExchangeRateOracle> = match config.rate_oracle {
        RateOracleMode::Live => Arc::new(
            LiveRateOracle::new(
                config
                    .crypto_rates_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CRYPTO_RATES_URL.to_string()),
                config
                    .fiat_rates_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FIAT_RATES_URL.to_string()),
                config.external_timeout,
                RATE_TTL,
            )
            .map_err(|e| StartupError::Init(format!("rate oracle: {e}")))?,
        ),
        RateOracleMode::Fixed => Arc::new(FixedRateOracle::defaults()),
    };

    let chain = Arc::new(
        EvmRpc::new(
            RpcUrls {
                ethereum: config.ethereum_rpc_url.clone(),
                polygon: config.polygon_rpc_url.clone(),
                bsc: config.bsc_rpc_url.clone(),
            },
            config.external_timeout,
        )
        .map_err(|e| StartupError::Init(format!("chain RPC: {e}")))?,
    );

    let gateway: Arc<dyn PaymentGateway> = match &config.gateway {
        Some(gw) => Arc::new(
            HttpPaymentGateway::new(&gw.base_url, &gw.secret_key, config.external_timeout)
                .map_err(|e| StartupError::Init(format!("payment gateway: {e}")))?,
        ),
        None => {
            warn!("GATEWAY_SECRET_KEY not set; top-ups and gateway checkout are disabled");
            Arc::new(Unconfigured)
        }
    };

    let kyc: Arc<dyn IdentityVerifier> = match &config.kyc {
        Some(kyc) => Arc::new(
            HttpIdentityVerifier::new(&kyc.base_url, &kyc.api_key, config.external_timeout)
                .map_err(|e| StartupError::Init(format!("identity provider: {e}")))?,
        ),
        None => {
            warn!("KYC provider not configured; identity verification is disabled");
            Arc::new(Unconfigured)
        }
    };

    let engine = SettlementEngine::new(
        storage,
        crypto,
        config.settlement.clone(),
        Collaborators {
            rates,
            chain,
            gateway,
            kyc,
        },
    );

    let shutdown = CancellationToken::new();
    let poller = ConfirmationPoller::new(engine.clone(), config.confirmation_poll_interval);
    let poller_task = tokio::spawn(poller.run(shutdown.clone()));

    let state = AppState::new(engine, config.webhook_secret.clone()).with_auth_config(auth_config);
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| StartupError::Init(format!("invalid bind address: {e}")))?;

    let handle = axum_server::Handle::new();
    tokio::spawn(shutdown_signal(handle.clone(), shutdown.clone()));

    match &config.tls {
        Some((cert, key)) => {
            let tls = RustlsConfig::from_pem_file(cert, key).await?;
            info!(%addr, "GON settlement server listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            warn!("TLS_CERT_PATH/TLS_KEY_PATH not set; serving plain HTTP");
            info!(%addr, "GON settlement server listening on http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    shutdown.cancel();
    if let Err(e) = poller_task.await {
        warn!(error = %e, "Confirmation poller task ended abnormally");
    }
    info!("GON settlement server stopped");
    Ok(())
}

async fn shutdown_signal(handle: axum_server::Handle<SocketAddr>, shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
    shutdown.cancel();
    handle.graceful_shutdown(Some(std::time::Duration::from_secs(10)));
}
