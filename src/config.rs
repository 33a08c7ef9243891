// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the application. Configuration is loaded from the environment
//! once at startup into [`AppConfig`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding the redb database | `/data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files; HTTPS when both are set | Plain HTTP |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `MASTER_KEY_V{n}` | Hex master key, version `n`, at least 32 bytes | Required |
//! | `MASTER_KEY_ACTIVE_VERSION` | Version used for new encryptions | Highest configured |
//! | `AUTH_JWT_SECRET` | HS256 secret for bearer tokens | Development mode |
//! | `GATEWAY_BASE_URL` | Payment gateway API | `https://api.paystack.co` |
//! | `GATEWAY_SECRET_KEY` | Payment gateway API key | Gateway disabled |
//! | `GATEWAY_WEBHOOK_SECRET` | Shared secret for webhook signatures | Required |
//! | `KYC_BASE_URL` / `KYC_API_KEY` | Identity verification provider | KYC disabled |
//! | `ETHEREUM_RPC_URL` / `POLYGON_RPC_URL` / `BSC_RPC_URL` | Chain RPC endpoints | Public endpoints |
//! | `CRYPTO_RATES_URL` / `FIAT_RATES_URL` | Rate feeds | CoinGecko / open.er-api |
//! | `RATE_ORACLE` | `live` or `fixed` | `live` |
//! | `SHIPPING_FEE_NGN` | Flat shipping fee added to every order | `2500` |
//! | `PRICE_TOLERANCE_BPS` | Allowed cart price drift, basis points | `0` |
//! | `EXTERNAL_CALL_TIMEOUT_SECS` | Timeout for every outbound call | `15` |
//! | `CONFIRMATION_POLL_SECS` | Chain confirmation poll interval | `30` |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;

/// Environment variable name for the data directory path.
///
/// # Default
/// `/data`
pub const DATA_DIR_ENV: &str = "DATA_DIR";

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";

/// Environment variable for log output format.
///
/// Values: `json` (structured, for log aggregators) or `pretty`.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Selects the master key version used for new encryptions.
pub const MASTER_KEY_ACTIVE_VERSION_ENV: &str = "MASTER_KEY_ACTIVE_VERSION";

/// Prefix of versioned master keys: `MASTER_KEY_V1`, `MASTER_KEY_V2`, ...
///
/// Old versions must stay configured until every record sealed under them
/// has been rotated.
pub const MASTER_KEY_ENV_PREFIX: &str = "MASTER_KEY_V";

/// HS256 secret for bearer tokens. When unset the server runs in
/// development mode and only decodes token structure.
pub const AUTH_JWT_SECRET_ENV: &str = "AUTH_JWT_SECRET";

pub const GATEWAY_BASE_URL_ENV: &str = "GATEWAY_BASE_URL";
pub const GATEWAY_SECRET_KEY_ENV: &str = "GATEWAY_SECRET_KEY";

/// Shared secret for webhook HMAC-SHA512 signatures. Mandatory.
pub const GATEWAY_WEBHOOK_SECRET_ENV: &str = "GATEWAY_WEBHOOK_SECRET";

pub const KYC_BASE_URL_ENV: &str = "KYC_BASE_URL";
pub const KYC_API_KEY_ENV: &str = "KYC_API_KEY";

pub const ETHEREUM_RPC_URL_ENV: &str = "ETHEREUM_RPC_URL";
pub const POLYGON_RPC_URL_ENV: &str = "POLYGON_RPC_URL";
pub const BSC_RPC_URL_ENV: &str = "BSC_RPC_URL";

pub const CRYPTO_RATES_URL_ENV: &str = "CRYPTO_RATES_URL";
pub const FIAT_RATES_URL_ENV: &str = "FIAT_RATES_URL";
pub const RATE_ORACLE_ENV: &str = "RATE_ORACLE";

pub const SHIPPING_FEE_NGN_ENV: &str = "SHIPPING_FEE_NGN";
pub const PRICE_TOLERANCE_BPS_ENV: &str = "PRICE_TOLERANCE_BPS";
pub const EXTERNAL_CALL_TIMEOUT_SECS_ENV: &str = "EXTERNAL_CALL_TIMEOUT_SECS";
pub const CONFIRMATION_POLL_SECS_ENV: &str = "CONFIRMATION_POLL_SECS";

pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.paystack.co";
pub const DEFAULT_SHIPPING_FEE_NGN: i64 = 2_500;

/// Name of the redb file inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "settlement.redb";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateOracleMode {
    Live,
    Fixed,
}

/// Payment gateway credentials.
#[derive(Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub secret_key: String,
}

/// Identity provider credentials.
#[derive(Clone)]
pub struct KycConfig {
    pub base_url: String,
    pub api_key: String,
}

/// Settlement-level knobs.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub shipping_fee_ngn: Decimal,
    /// Allowed difference between the client-seen and current unit price.
    pub price_tolerance_bps: u32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            shipping_fee_ngn: Decimal::from(DEFAULT_SHIPPING_FEE_NGN),
            price_tolerance_bps: 0,
        }
    }
}

/// Typed configuration, read once at startup.
#[derive(Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub tls: Option<(PathBuf, PathBuf)>,
    pub jwt_secret: Option<String>,
    pub webhook_secret: String,
    pub gateway: Option<GatewayConfig>,
    pub kyc: Option<KycConfig>,
    pub ethereum_rpc_url: Option<String>,
    pub polygon_rpc_url: Option<String>,
    pub bsc_rpc_url: Option<String>,
    pub crypto_rates_url: Option<String>,
    pub fiat_rates_url: Option<String>,
    pub rate_oracle: RateOracleMode,
    pub settlement: SettlementConfig,
    pub external_timeout: Duration,
    pub confirmation_poll_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let webhook_secret = get(GATEWAY_WEBHOOK_SECRET_ENV)
            .ok_or(ConfigError::Missing(GATEWAY_WEBHOOK_SECRET_ENV))?;

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some((PathBuf::from(cert), PathBuf::from(key))),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    name: TLS_CERT_PATH_ENV,
                    reason: format!("{TLS_CERT_PATH_ENV} and {TLS_KEY_PATH_ENV} must be set together"),
                })
            }
        };

        let gateway = get(GATEWAY_SECRET_KEY_ENV).map(|secret_key| GatewayConfig {
            base_url: get(GATEWAY_BASE_URL_ENV)
                .unwrap_or_else(|| DEFAULT_GATEWAY_BASE_URL.to_string()),
            secret_key,
        });

        let kyc = match (get(KYC_BASE_URL_ENV), get(KYC_API_KEY_ENV)) {
            (Some(base_url), Some(api_key)) => Some(KycConfig { base_url, api_key }),
            _ => None,
        };

        let rate_oracle = match get(RATE_ORACLE_ENV).as_deref() {
            None | Some("live") => RateOracleMode::Live,
            Some("fixed") => RateOracleMode::Fixed,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: RATE_ORACLE_ENV,
                    reason: format!("expected `live` or `fixed`, got `{other}`"),
                })
            }
        };

        let shipping_fee_ngn = match get(SHIPPING_FEE_NGN_ENV) {
            Some(raw) => raw
                .parse::<Decimal>()
                .ok()
                .filter(|d| *d >= Decimal::ZERO)
                .ok_or_else(|| ConfigError::Invalid {
                    name: SHIPPING_FEE_NGN_ENV,
                    reason: format!("`{raw}` is not a non-negative amount"),
                })?,
            None => Decimal::from(DEFAULT_SHIPPING_FEE_NGN),
        };

        Ok(Self {
            data_dir: PathBuf::from(get(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.into())),
            host: get(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(get(PORT_ENV), PORT_ENV, 8080)?,
            tls,
            jwt_secret: get(AUTH_JWT_SECRET_ENV),
            webhook_secret,
            gateway,
            kyc,
            ethereum_rpc_url: get(ETHEREUM_RPC_URL_ENV),
            polygon_rpc_url: get(POLYGON_RPC_URL_ENV),
            bsc_rpc_url: get(BSC_RPC_URL_ENV),
            crypto_rates_url: get(CRYPTO_RATES_URL_ENV),
            fiat_rates_url: get(FIAT_RATES_URL_ENV),
            rate_oracle,
            settlement: SettlementConfig {
                shipping_fee_ngn,
                price_tolerance_bps: parse_or(get(PRICE_TOLERANCE_BPS_ENV), PRICE_TOLERANCE_BPS_ENV, 0)?,
            },
            external_timeout: Duration::from_secs(parse_or(
                get(EXTERNAL_CALL_TIMEOUT_SECS_ENV),
                EXTERNAL_CALL_TIMEOUT_SECS_ENV,
                15,
            )?),
            confirmation_poll_interval: Duration::from_secs(parse_or(
                get(CONFIRMATION_POLL_SECS_ENV),
                CONFIRMATION_POLL_SECS_ENV,
                30,
            )?),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

fn parse_or<T: std::str::FromStr>(
    raw: Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            name,
            reason: format!("`{raw}` is not a valid value"),
        }),
        None => Ok(default),
    }
}
