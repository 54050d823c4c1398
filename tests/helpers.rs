//! Shared test helpers for unit tests
//!
//! This module provides helper functions used by the integration tests.
//!
//! The module is organized into several categories:
//! - **Constants**: Dummy secrets, hash locks, and heights used across tests
//! - **Key and Address Builders**: Deterministic keys and derived addresses
//! - **Component Builders**: Wiring a full state machine against a mock server
//! - **Mock Server Setup**: Esplora endpoint stubs
//! - **Record Helpers**: Walking a stored swap along the happy path

use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{Address, Network, PublicKey};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use swap_coordinator::btc::engine::{ResolverKey, TxEngine};
use swap_coordinator::btc::monitor::UtxoMonitor;
use swap_coordinator::btc::provider::EsploraProvider;
use swap_coordinator::swap::machine::CreateSwapRequest;
use swap_coordinator::swap::reveal::{RevealGate, SecretVault};
use swap_coordinator::{SwapState, SwapStateMachine, SwapStore, SwapType};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Resolver signing key used by every test engine (32 bytes, value 1)
pub const DUMMY_RESOLVER_KEY_HEX: &str =
    "0000000000000000000000000000000000000000000000000000000000000001";

/// Maker address on the EVM side
pub const DUMMY_MAKER_ADDR_EVM: &str = "0x00000000000000000000000000000000000000a1";

/// Someone who is not the maker
pub const DUMMY_STRANGER_ADDR_EVM: &str = "0x00000000000000000000000000000000000000b2";

/// EVM escrow deposit transaction hash
pub const DUMMY_EVM_DEPOSIT_TX: &str =
    "0x00000000000000000000000000000000000000000000000000000000000000c3";

/// Swap amount used by default requests, comfortably above dust
pub const DUMMY_AMOUNT_SATS: u64 = 100_000;

/// HTLC timeout height used by default requests
pub const DUMMY_TIMEOUT_HEIGHT: u32 = 1_000;

/// Confirmation depth test machines require
pub const CONFIRMATIONS_REQUIRED: u64 = 3;

/// Dust floor test machines use
pub const DUST_FLOOR_SATS: u64 = 546;

// ============================================================================
// KEY AND ADDRESS BUILDERS
// ============================================================================

/// Derives a valid testnet P2PKH address from a deterministic key byte.
///
/// Addresses carry a checksum, so hardcoded dummy strings would fail to
/// parse; deriving them keeps every test address genuinely valid.
pub fn test_p2pkh_address(key_byte: u8) -> String {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[key_byte; 32]).unwrap();
    let public = PublicKey::new(secret.public_key(&secp));
    Address::p2pkh(&public, Network::Testnet).to_string()
}

/// Maker's Bitcoin redeem destination.
pub fn recipient_address() -> String {
    test_p2pkh_address(2)
}

/// Resolver's reclaim destination.
pub fn resolver_address() -> String {
    test_p2pkh_address(1)
}

// ============================================================================
// COMPONENT BUILDERS
// ============================================================================

/// Fully wired coordinator components sharing one store and vault.
pub struct TestContext {
    pub machine: SwapStateMachine,
    pub gate: RevealGate,
    pub store: SwapStore,
    pub vault: SecretVault,
}

/// Builds a state machine, reveal gate, store, and vault against the given
/// mock Esplora base URL.
///
/// # Arguments
///
/// * `base_url` - Mock server URI
/// * `sweep_deadline_secs` - Inactivity budget; 0 makes every sweep fire
pub fn build_test_context(base_url: &str, sweep_deadline_secs: i64) -> TestContext {
    let provider = EsploraProvider::new(base_url, 5_000).unwrap();
    let monitor = UtxoMonitor::new(provider.clone());
    let key = ResolverKey::from_hex(DUMMY_RESOLVER_KEY_HEX).unwrap();
    let resolver_pubkey_hash = key.pubkey_hash();
    let engine = TxEngine::new(provider, key, Network::Testnet, 10, 300, DUST_FLOOR_SATS);

    let store = SwapStore::new();
    let vault = SecretVault::new();
    let machine = SwapStateMachine::new(
        store.clone(),
        vault.clone(),
        monitor,
        engine,
        None,
        Network::Testnet,
        resolver_pubkey_hash,
        resolver_address(),
        CONFIRMATIONS_REQUIRED,
        DUST_FLOOR_SATS,
        sweep_deadline_secs,
    );
    let gate = RevealGate::new(store.clone(), vault.clone(), None);

    TestContext {
        machine,
        gate,
        store,
        vault,
    }
}

/// Default native-leg swap request.
pub fn native_swap_request() -> CreateSwapRequest {
    CreateSwapRequest {
        swap_type: SwapType::Native,
        amount: "1000000000000000000".to_string(),
        from_chain: "sepolia".to_string(),
        to_chain: "bitcoin".to_string(),
        from_token: "ETH".to_string(),
        to_token: "BTC".to_string(),
        user_address: DUMMY_MAKER_ADDR_EVM.to_string(),
        evm_chain_id: 11155111,
        evm_escrow_address: None,
        btc_amount: DUMMY_AMOUNT_SATS,
        btc_recipient_address: recipient_address(),
        timeout_block: DUMMY_TIMEOUT_HEIGHT,
        expires_in_secs: 3_600,
    }
}

// ============================================================================
// MOCK SERVER SETUP
// ============================================================================

/// Stubs the UTXO listing for an address.
pub async fn mount_utxos(server: &MockServer, address: &str, utxos: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/address/{}/utxo", address)))
        .respond_with(ResponseTemplate::new(200).set_body_json(utxos))
        .mount(server)
        .await;
}

/// Stubs the chain tip height.
pub async fn mount_tip(server: &MockServer, height: u64) {
    Mock::given(method("GET"))
        .and(path("/blocks/tip/height"))
        .respond_with(ResponseTemplate::new(200).set_body_string(height.to_string()))
        .mount(server)
        .await;
}

/// Stubs the raw-transaction endpoint for a txid.
pub async fn mount_raw_tx(server: &MockServer, txid: &str, raw_hex: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/tx/{}/hex", txid)))
        .respond_with(ResponseTemplate::new(200).set_body_string(raw_hex.to_string()))
        .mount(server)
        .await;
}

/// Stubs a successful broadcast.
pub async fn mount_broadcast_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/tx"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "0000000000000000000000000000000000000000000000000000000000000000",
        ))
        .mount(server)
        .await;
}

/// A single confirmed UTXO as the provider would report it.
pub fn confirmed_utxo(txid: &str, vout: u32, value: u64, block_height: u64) -> serde_json::Value {
    json!([{
        "txid": txid,
        "vout": vout,
        "value": value,
        "status": { "confirmed": true, "block_height": block_height }
    }])
}

/// Counts broadcast attempts the mock server has seen.
pub async fn broadcast_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.to_string() == "POST" && r.url.path() == "/tx")
        .count()
}

// ============================================================================
// RECORD HELPERS
// ============================================================================

/// Happy-path order of non-terminal states.
const HAPPY_PATH: [SwapState; 9] = [
    SwapState::Created,
    SwapState::WaitingForDeposit,
    SwapState::EvmDepositDetected,
    SwapState::EvmDepositConfirmed,
    SwapState::BtcHtlcCreated,
    SwapState::BtcDepositDetected,
    SwapState::BtcDepositConfirmed,
    SwapState::SecretRequested,
    SwapState::SecretRevealed,
];

/// Walks a stored swap along the happy path up to `target`, bypassing the
/// chain. Useful for tests that exercise a late-stage operation without
/// mocking every earlier step.
pub async fn advance_to(store: &SwapStore, htlc_hash: &str, target: SwapState) {
    let mut current = store.get(htlc_hash).await.unwrap().state;
    while current != target {
        let index = HAPPY_PATH.iter().position(|s| *s == current).unwrap();
        let next = HAPPY_PATH[index + 1];
        store
            .update_if_state(htlc_hash, current, next, |_| {})
            .await
            .unwrap();
        current = next;
    }
}
