// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process fakes for the chain, gateway and identity provider, plus a
//! harness that wires them into a [`SettlementEngine`] over a throwaway
//! database.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::blockchain::{ChainError, ChainRpc, FeeEstimate, TransferRequest, TxReceipt};
use crate::config::SettlementConfig;
use crate::custody::{totp, KeyManager, WalletCrypto};
use crate::models::{Chain, Currency, TxKind};
use crate::providers::{
    ChargeInit, ChargeRequest, ChargeStatus, ChargeVerification, DocumentType, GatewayError,
    IdentityVerification, IdentityVerifier, KycError, PaymentGateway,
};
use crate::rates::FixedRateOracle;
use crate::settlement::{Collaborators, SettlementEngine};
use crate::storage::{temp_storage, NewTransaction, Product};

pub const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

// =============================================================================
// Chain
// =============================================================================

pub struct FakeChainState {
    pub native_balance: U256,
    pub token_balance: U256,
    pub fee: FeeEstimate,
    pub fail_broadcast: bool,
    pub receipts: HashMap<String, TxReceipt>,
    pub sent: Vec<TransferRequest>,
}

pub struct FakeChain {
    pub state: Mutex<FakeChainState>,
}

impl FakeChain {
    /// 10 native units, 1,000,000 token units (6 decimals), 21k gas at 1 gwei.
    pub fn funded() -> Self {
        Self {
            state: Mutex::new(FakeChainState {
                native_balance: U256::from(10 * ONE_ETHER),
                token_balance: U256::from(1_000_000_000_000u64),
                fee: FeeEstimate {
                    gas_limit: 21_000,
                    max_fee_per_gas: 1_000_000_000,
                    max_priority_fee_per_gas: 1_000_000_000,
                },
                fail_broadcast: false,
                receipts: HashMap::new(),
                sent: Vec::new(),
            }),
        }
    }

    pub fn set(&self, f: impl FnOnce(&mut FakeChainState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn sent(&self) -> Vec<TransferRequest> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn confirm(&self, tx_hash: &str, success: bool) {
        self.set(|s| {
            s.receipts.insert(
                tx_hash.to_string(),
                TxReceipt {
                    tx_hash: tx_hash.to_string(),
                    block_number: 1,
                    gas_used: 21_000,
                    success,
                },
            );
        });
    }
}

#[async_trait]
impl ChainRpc for FakeChain {
    async fn native_balance(&self, _chain: Chain, _owner: Address) -> Result<U256, ChainError> {
        Ok(self.state.lock().unwrap().native_balance)
    }

    async fn token_balance(
        &self,
        _chain: Chain,
        _token: Address,
        _owner: Address,
    ) -> Result<U256, ChainError> {
        Ok(self.state.lock().unwrap().token_balance)
    }

    async fn estimate_fee(&self, _transfer: &TransferRequest) -> Result<FeeEstimate, ChainError> {
        Ok(self.state.lock().unwrap().fee.clone())
    }

    async fn broadcast(
        &self,
        signer: PrivateKeySigner,
        transfer: &TransferRequest,
        _fee: &FeeEstimate,
    ) -> Result<String, ChainError> {
        assert_eq!(signer.address(), transfer.from, "signer must own the source address");
        let mut state = self.state.lock().unwrap();
        if state.fail_broadcast {
            return Err(ChainError::Broadcast("nonce too low".into()));
        }
        state.sent.push(transfer.clone());
        Ok(format!("0x{:064x}", state.sent.len()))
    }

    async fn receipt(&self, _chain: Chain, tx_hash: &str) -> Result<Option<TxReceipt>, ChainError> {
        Ok(self.state.lock().unwrap().receipts.get(tx_hash).cloned())
    }
}

// =============================================================================
// Gateway
// =============================================================================

#[derive(Default)]
pub struct FakeGateway {
    pub fail_initiate: Mutex<bool>,
    pub charges: Mutex<Vec<ChargeRequest>>,
    /// Overrides for `verify_charge`; otherwise the recorded charge succeeds.
    pub verifications: Mutex<HashMap<String, ChargeVerification>>,
}

impl FakeGateway {
    pub fn last_charge(&self) -> Option<ChargeRequest> {
        self.charges.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn initiate_charge(&self, charge: &ChargeRequest) -> Result<ChargeInit, GatewayError> {
        if *self.fail_initiate.lock().unwrap() {
            return Err(GatewayError::Request("connection reset".into()));
        }
        self.charges.lock().unwrap().push(charge.clone());
        Ok(ChargeInit {
            reference: charge.reference.clone(),
            authorization_url: Some(format!("https://pay.example/{}", charge.reference)),
        })
    }

    async fn verify_charge(&self, reference: &str) -> Result<ChargeVerification, GatewayError> {
        if let Some(v) = self.verifications.lock().unwrap().get(reference) {
            return Ok(v.clone());
        }
        self.charges
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.reference == reference)
            .map(|c| ChargeVerification {
                status: ChargeStatus::Success,
                amount_minor: c.amount_minor,
                currency: c.currency.code().to_string(),
            })
            .ok_or_else(|| GatewayError::Rejected("Transaction reference not found".into()))
    }
}

// =============================================================================
// Identity provider
// =============================================================================

pub struct FakeVerifier {
    pub verified: Mutex<bool>,
    pub calls: AtomicUsize,
}

impl Default for FakeVerifier {
    fn default() -> Self {
        Self {
            verified: Mutex::new(true),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IdentityVerifier for FakeVerifier {
    async fn verify(
        &self,
        _document_type: DocumentType,
        _document_number: &str,
    ) -> Result<IdentityVerification, KycError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(IdentityVerification {
            verified: *self.verified.lock().unwrap(),
            claims: serde_json::json!({"first_name": "Test"}),
        })
    }
}

// =============================================================================
// Harness
// =============================================================================

pub fn test_crypto() -> WalletCrypto {
    let keys = BTreeMap::from([(1u32, vec![7u8; 32])]);
    WalletCrypto::new(Arc::new(KeyManager::new(1, keys).unwrap()))
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

pub struct Harness {
    pub engine: SettlementEngine,
    pub chain: Arc<FakeChain>,
    pub gateway: Arc<FakeGateway>,
    pub kyc: Arc<FakeVerifier>,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let (storage, dir) = temp_storage();
        let chain = Arc::new(FakeChain::funded());
        let gateway = Arc::new(FakeGateway::default());
        let kyc = Arc::new(FakeVerifier::default());
        let engine = SettlementEngine::new(
            storage,
            test_crypto(),
            SettlementConfig::default(),
            Collaborators {
                rates: Arc::new(FixedRateOracle::defaults()),
                chain: chain.clone(),
                gateway: gateway.clone(),
                kyc: kyc.clone(),
            },
        );
        Self {
            engine,
            chain,
            gateway,
            kyc,
            _dir: dir,
        }
    }

    pub fn fund(&self, user_id: &str, currency: Currency, amount: Decimal) {
        self.engine
            .storage()
            .ledger
            .credit(NewTransaction::new(user_id, TxKind::Deposit, currency, amount).completed())
            .unwrap();
        self.engine.touched(user_id);
    }

    pub fn product(&self, id: &str, price: Decimal, stock: u32) {
        self.engine
            .storage()
            .orders
            .upsert_product(&Product {
                id: id.to_string(),
                name: format!("Product {id}"),
                price,
                stock,
                active: true,
            })
            .unwrap();
    }

    pub fn stock(&self, id: &str) -> u32 {
        self.engine
            .storage()
            .orders
            .get_product(id)
            .unwrap()
            .unwrap()
            .stock
    }

    pub fn balance(&self, user_id: &str, currency: Currency) -> Decimal {
        self.engine.balance(user_id, currency).unwrap()
    }

    /// KYC-verify a user, which also provisions the custodial wallet.
    pub async fn verified_user(&self, user_id: &str) {
        self.engine
            .verify_kyc(user_id, DocumentType::Nin, "12345678901")
            .await
            .unwrap();
    }

    /// Current TOTP code for a user's enrolled secret.
    pub fn totp_code(&self, user_id: &str) -> String {
        let user = self.engine.storage().users.get(user_id).unwrap().unwrap();
        let record = user.two_factor.unwrap().secret;
        let secret = self
            .engine
            .crypto()
            .decrypt(&record, &crate::settlement::identity::totp_context(user_id))
            .unwrap();
        format!("{:06}", totp::code_at(secret.expose(), unix_now()))
    }

    /// Enrol and confirm a second factor.
    pub fn enable_two_factor(&self, user_id: &str) {
        self.engine.setup_two_factor(user_id).unwrap();
        let code = self.totp_code(user_id);
        self.engine.confirm_two_factor(user_id, &code).unwrap();
    }
}
