//! Unit tests for the swap state machine
//!
//! These tests verify creation-time validation, EVM-side notifications,
//! HTLC derivation, funding progression, and the concurrency guarantee
//! that a decided spend is broadcast at most once.

use bitcoin::{Network, ScriptBuf};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use swap_coordinator::swap::reveal::parse_hash_lock;
use swap_coordinator::{SwapState, SwapType};

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{
    broadcast_count, build_test_context, confirmed_utxo, mount_broadcast_ok, mount_raw_tx,
    mount_tip, mount_utxos, native_swap_request, DUMMY_EVM_DEPOSIT_TX, DUMMY_MAKER_ADDR_EVM,
    DUMMY_TIMEOUT_HEIGHT,
};

// ============================================================================
// CREATION TESTS
// ============================================================================

/// Test that a new swap starts in CREATED with a parseable hash lock
/// What is tested: record shape, initial state, no secret on the record
#[tokio::test]
async fn create_swap_starts_in_created() {
    let server = MockServer::start().await;
    let ctx = build_test_context(&server.uri(), 1_800);

    let record = ctx.machine.create_swap(native_swap_request()).await.unwrap();
    assert_eq!(record.state, SwapState::Created);
    assert_eq!(record.swap_type, SwapType::Native);
    assert!(record.secret.is_none());
    assert!(parse_hash_lock(&record.htlc_hash).is_ok());
}

/// Test that a below-dust swap amount is rejected at creation
#[tokio::test]
async fn create_swap_rejects_dust_amount() {
    let server = MockServer::start().await;
    let ctx = build_test_context(&server.uri(), 1_800);

    let mut request = native_swap_request();
    request.btc_amount = 500;
    let err = ctx.machine.create_swap(request).await.unwrap_err();
    assert_eq!(err.code(), "DUST_OUTPUT");
}

/// Test that a P2SH recipient is rejected at creation, not at redeem time
/// Why: Only P2PKH and P2WPKH recipients can appear in the HTLC script
#[tokio::test]
async fn create_swap_rejects_unsupported_recipient() {
    let server = MockServer::start().await;
    let ctx = build_test_context(&server.uri(), 1_800);

    let p2sh = bitcoin::Address::p2sh(&ScriptBuf::new(), Network::Testnet)
        .unwrap()
        .to_string();
    let mut request = native_swap_request();
    request.btc_recipient_address = p2sh;
    let err = ctx.machine.create_swap(request).await.unwrap_err();
    assert_eq!(err.code(), "UNSUPPORTED_ADDRESS_TYPE");
}

/// Test that a lightning swap without a configured node is rejected
#[tokio::test]
async fn create_lightning_swap_without_node_is_rejected() {
    let server = MockServer::start().await;
    let ctx = build_test_context(&server.uri(), 1_800);

    let mut request = native_swap_request();
    request.swap_type = SwapType::Lightning;
    let err = ctx.machine.create_swap(request).await.unwrap_err();
    assert_eq!(err.code(), "LIGHTNING_NODE_ERROR");
}

// ============================================================================
// EVM NOTIFICATION TESTS
// ============================================================================

/// Test the EVM deposit notifications walk the record forward
/// What is tested: CREATED -> ... -> EVM_DEPOSIT_CONFIRMED with the txid kept
#[tokio::test]
async fn evm_notifications_advance_the_record() {
    let server = MockServer::start().await;
    let ctx = build_test_context(&server.uri(), 1_800);

    let record = ctx.machine.create_swap(native_swap_request()).await.unwrap();
    ctx.machine
        .record_evm_deposit(&record.htlc_hash, DUMMY_EVM_DEPOSIT_TX)
        .await
        .unwrap();
    ctx.machine
        .confirm_evm_deposit(&record.htlc_hash, 7_654_321)
        .await
        .unwrap();

    let updated = ctx.store.get(&record.htlc_hash).await.unwrap();
    assert_eq!(updated.state, SwapState::EvmDepositConfirmed);
    assert_eq!(updated.evm_tx_hash.as_deref(), Some(DUMMY_EVM_DEPOSIT_TX));
    assert_eq!(updated.evm_block_number, Some(7_654_321));
}

/// Test that confirming a deposit that was never detected is rejected
/// What is tested: EVM_DEPOSIT_DETECTED is a hard prerequisite
#[tokio::test]
async fn confirm_without_detection_is_rejected() {
    let server = MockServer::start().await;
    let ctx = build_test_context(&server.uri(), 1_800);

    let record = ctx.machine.create_swap(native_swap_request()).await.unwrap();
    let err = ctx
        .machine
        .confirm_evm_deposit(&record.htlc_hash, 7_654_321)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE_TRANSITION");

    // The rejected transition must leave the record untouched.
    let unchanged = ctx.store.get(&record.htlc_hash).await.unwrap();
    assert_eq!(unchanged.state, SwapState::Created);
    assert_eq!(unchanged.updated_at, record.updated_at);
}

// ============================================================================
// BITCOIN LEG TESTS
// ============================================================================

/// Test that driving a confirmed EVM deposit derives the HTLC
/// What is tested: P2SH address and redeem script land on the record
#[tokio::test]
async fn drive_derives_htlc_after_evm_confirmation() {
    let server = MockServer::start().await;
    let ctx = build_test_context(&server.uri(), 1_800);

    let record = ctx.machine.create_swap(native_swap_request()).await.unwrap();
    ctx.machine
        .record_evm_deposit(&record.htlc_hash, DUMMY_EVM_DEPOSIT_TX)
        .await
        .unwrap();
    ctx.machine
        .confirm_evm_deposit(&record.htlc_hash, 7_654_321)
        .await
        .unwrap();

    let state = ctx.machine.drive(&record.htlc_hash).await.unwrap();
    assert_eq!(state, SwapState::BtcHtlcCreated);

    let updated = ctx.store.get(&record.htlc_hash).await.unwrap();
    let address = updated.btc_htlc_address.unwrap();
    assert!(address.starts_with('2'), "testnet P2SH address expected");
    assert!(updated.btc_htlc_script.is_some());
}

/// Test funding progression: detection below the depth, confirmation at it
/// What is tested: BTC_HTLC_CREATED -> DETECTED -> (hold) -> CONFIRMED
#[tokio::test]
async fn funding_is_detected_then_confirmed_at_depth() {
    let server = MockServer::start().await;
    let ctx = build_test_context(&server.uri(), 1_800);

    let record = ctx.machine.create_swap(native_swap_request()).await.unwrap();
    ctx.machine
        .record_evm_deposit(&record.htlc_hash, DUMMY_EVM_DEPOSIT_TX)
        .await
        .unwrap();
    ctx.machine
        .confirm_evm_deposit(&record.htlc_hash, 7_654_321)
        .await
        .unwrap();
    ctx.machine.drive(&record.htlc_hash).await.unwrap();
    let address = ctx
        .store
        .get(&record.htlc_hash)
        .await
        .unwrap()
        .btc_htlc_address
        .unwrap();

    // One confirmation: detected, not yet final.
    mount_utxos(&server, &address, confirmed_utxo(&"ee".repeat(32), 0, 100_000, 100)).await;
    mount_tip(&server, 100).await;
    assert_eq!(
        ctx.machine.drive(&record.htlc_hash).await.unwrap(),
        SwapState::BtcDepositDetected
    );
    assert_eq!(
        ctx.store.get(&record.htlc_hash).await.unwrap().current_confirmations,
        1
    );

    // One block deeper but still short of the depth: the state holds while
    // the observed count advances on the record.
    server.reset().await;
    mount_utxos(&server, &address, confirmed_utxo(&"ee".repeat(32), 0, 100_000, 100)).await;
    mount_tip(&server, 101).await;
    assert_eq!(
        ctx.machine.drive(&record.htlc_hash).await.unwrap(),
        SwapState::BtcDepositDetected
    );
    assert_eq!(
        ctx.store.get(&record.htlc_hash).await.unwrap().current_confirmations,
        2
    );

    // Tip advances to the required depth.
    server.reset().await;
    mount_utxos(&server, &address, confirmed_utxo(&"ee".repeat(32), 0, 100_000, 100)).await;
    mount_tip(&server, 102).await;
    assert_eq!(
        ctx.machine.drive(&record.htlc_hash).await.unwrap(),
        SwapState::BtcDepositConfirmed
    );

    let updated = ctx.store.get(&record.htlc_hash).await.unwrap();
    assert_eq!(updated.btc_tx_id.as_deref(), Some("ee".repeat(32).as_str()));
    assert_eq!(updated.btc_funded_amount, Some(100_000));
    assert_eq!(updated.current_confirmations, 3);
}

/// Test that a provider outage is absorbed without failing the swap
/// What is tested: drive returns the unchanged state and logs an event
/// Why: A chain-data hiccup must never be terminal for a funded swap
#[tokio::test]
async fn provider_outage_is_absorbed() {
    let server = MockServer::start().await;
    let ctx = build_test_context(&server.uri(), 1_800);

    let record = ctx.machine.create_swap(native_swap_request()).await.unwrap();
    ctx.machine
        .record_evm_deposit(&record.htlc_hash, DUMMY_EVM_DEPOSIT_TX)
        .await
        .unwrap();
    ctx.machine
        .confirm_evm_deposit(&record.htlc_hash, 7_654_321)
        .await
        .unwrap();
    ctx.machine.drive(&record.htlc_hash).await.unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("outage"))
        .mount(&server)
        .await;

    let state = ctx.machine.drive(&record.htlc_hash).await.unwrap();
    assert_eq!(state, SwapState::BtcHtlcCreated);

    let events = ctx.store.events_for(&record.htlc_hash).await;
    assert!(events.iter().any(|e| e.event_type == "provider_error"));
}

// ============================================================================
// TIMEOUT AND CONCURRENCY TESTS
// ============================================================================

/// Test that the sweep moves a stalled swap into SWAP_TIMEOUT
#[tokio::test]
async fn sweep_times_out_stalled_swaps() {
    let server = MockServer::start().await;
    // Deadline 0: every swap counts as stalled immediately.
    let ctx = build_test_context(&server.uri(), 0);

    let record = ctx.machine.create_swap(native_swap_request()).await.unwrap();
    let swept = ctx.machine.sweep_timeouts().await;
    assert_eq!(swept, vec![record.htlc_hash.clone()]);
    assert_eq!(
        ctx.store.get(&record.htlc_hash).await.unwrap().state,
        SwapState::SwapTimeout
    );
}

/// Test that the sweep measures age from creation, not from the last write
/// Why: A swap crawling forward one transition at a time must still hit
/// the deadline instead of resetting its clock on every update
#[tokio::test]
async fn sweep_age_is_measured_from_creation() {
    let server = MockServer::start().await;
    let ctx = build_test_context(&server.uri(), 1);

    let record = ctx.machine.create_swap(native_swap_request()).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(700)).await;
    // Progress refreshes updated_at but must not extend the deadline.
    ctx.machine
        .record_evm_deposit(&record.htlc_hash, DUMMY_EVM_DEPOSIT_TX)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    let swept = ctx.machine.sweep_timeouts().await;
    assert_eq!(swept, vec![record.htlc_hash.clone()]);
    assert_eq!(
        ctx.store.get(&record.htlc_hash).await.unwrap().state,
        SwapState::SwapTimeout
    );
}

/// Test that a timeout before the Bitcoin leg exists fails the swap
/// What is tested: SWAP_TIMEOUT with nothing to reclaim ends in SWAP_FAILED
#[tokio::test]
async fn timeout_without_funding_fails_without_reclaim() {
    let server = MockServer::start().await;
    let ctx = build_test_context(&server.uri(), 0);

    let record = ctx.machine.create_swap(native_swap_request()).await.unwrap();
    ctx.machine.sweep_timeouts().await;

    let state = ctx.machine.drive(&record.htlc_hash).await.unwrap();
    assert_eq!(state, SwapState::SwapFailed);
    let events = ctx.store.events_for(&record.htlc_hash).await;
    assert!(events.iter().any(|e| e.event_type == "nothing_to_reclaim"));
}

/// Test that concurrent drives of a timed-out swap broadcast exactly once
/// What is tested: two racing drive() calls, one reclaim hits the network
/// Why: A double spend attempt would burn fees and trip relay rejection
#[tokio::test]
async fn concurrent_timeout_drives_broadcast_once() {
    let server = MockServer::start().await;
    let ctx = build_test_context(&server.uri(), 0);

    // Walk a funded swap into SWAP_TIMEOUT.
    let record = ctx.machine.create_swap(native_swap_request()).await.unwrap();
    ctx.machine
        .record_evm_deposit(&record.htlc_hash, DUMMY_EVM_DEPOSIT_TX)
        .await
        .unwrap();
    ctx.machine
        .confirm_evm_deposit(&record.htlc_hash, 7_654_321)
        .await
        .unwrap();
    ctx.machine.drive(&record.htlc_hash).await.unwrap();
    let stored = ctx.store.get(&record.htlc_hash).await.unwrap();
    let address = stored.btc_htlc_address.clone().unwrap();
    let script = ScriptBuf::from_bytes(hex::decode(stored.btc_htlc_script.unwrap()).unwrap());

    // Real funding transaction paying the HTLC, so signing verification passes.
    let htlc_addr: bitcoin::Address = address
        .parse::<bitcoin::Address<bitcoin::address::NetworkUnchecked>>()
        .unwrap()
        .require_network(Network::Testnet)
        .unwrap();
    assert_eq!(
        htlc_addr.script_pubkey(),
        bitcoin::Address::p2sh(&script, Network::Testnet)
            .unwrap()
            .script_pubkey()
    );
    let funding = bitcoin::Transaction {
        version: bitcoin::transaction::Version::TWO,
        lock_time: bitcoin::absolute::LockTime::ZERO,
        input: vec![bitcoin::TxIn::default()],
        output: vec![bitcoin::TxOut {
            value: bitcoin::Amount::from_sat(100_000),
            script_pubkey: htlc_addr.script_pubkey(),
        }],
    };
    let funding_txid = funding.txid().to_string();

    mount_utxos(&server, &address, confirmed_utxo(&funding_txid, 0, 100_000, 100)).await;
    mount_tip(&server, u64::from(DUMMY_TIMEOUT_HEIGHT) + 5).await;
    mount_raw_tx(
        &server,
        &funding_txid,
        &bitcoin::consensus::encode::serialize_hex(&funding),
    )
    .await;
    mount_broadcast_ok(&server).await;

    ctx.machine.drive(&record.htlc_hash).await.unwrap(); // detected
    ctx.machine.drive(&record.htlc_hash).await.unwrap(); // confirmed
    ctx.machine.sweep_timeouts().await;

    let (a, b) = tokio::join!(
        ctx.machine.drive(&record.htlc_hash),
        ctx.machine.drive(&record.htlc_hash),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(
        ctx.store.get(&record.htlc_hash).await.unwrap().state,
        SwapState::SwapReclaimed
    );
    assert_eq!(broadcast_count(&server).await, 1);

    let updated = ctx.store.get(&record.htlc_hash).await.unwrap();
    assert!(updated.claim_tx_hash.is_some());
}

/// Test that the drive after disclosure broadcasts the redeem exactly once
/// What is tested: two racing drive() calls in SECRET_REVEALED, one redeem
/// hits the network, the completed record carries its txid
/// Why: The redeem pays the maker; a double broadcast would burn fees and
/// trip relay rejection just like a double reclaim
#[tokio::test]
async fn concurrent_reveal_drives_redeem_once() {
    let server = MockServer::start().await;
    let ctx = build_test_context(&server.uri(), 1_800);

    // Walk a funded swap to BTC_DEPOSIT_CONFIRMED.
    let record = ctx.machine.create_swap(native_swap_request()).await.unwrap();
    ctx.machine
        .record_evm_deposit(&record.htlc_hash, DUMMY_EVM_DEPOSIT_TX)
        .await
        .unwrap();
    ctx.machine
        .confirm_evm_deposit(&record.htlc_hash, 7_654_321)
        .await
        .unwrap();
    ctx.machine.drive(&record.htlc_hash).await.unwrap();
    let stored = ctx.store.get(&record.htlc_hash).await.unwrap();
    let address = stored.btc_htlc_address.clone().unwrap();

    let htlc_addr: bitcoin::Address = address
        .parse::<bitcoin::Address<bitcoin::address::NetworkUnchecked>>()
        .unwrap()
        .require_network(Network::Testnet)
        .unwrap();
    let funding = bitcoin::Transaction {
        version: bitcoin::transaction::Version::TWO,
        lock_time: bitcoin::absolute::LockTime::ZERO,
        input: vec![bitcoin::TxIn::default()],
        output: vec![bitcoin::TxOut {
            value: bitcoin::Amount::from_sat(100_000),
            script_pubkey: htlc_addr.script_pubkey(),
        }],
    };
    let funding_txid = funding.txid().to_string();

    mount_utxos(&server, &address, confirmed_utxo(&funding_txid, 0, 100_000, 100)).await;
    mount_tip(&server, 102).await;
    mount_raw_tx(
        &server,
        &funding_txid,
        &bitcoin::consensus::encode::serialize_hex(&funding),
    )
    .await;
    mount_broadcast_ok(&server).await;

    ctx.machine.drive(&record.htlc_hash).await.unwrap(); // detected
    ctx.machine.drive(&record.htlc_hash).await.unwrap(); // confirmed
    ctx.gate
        .reveal(&record.htlc_hash, DUMMY_MAKER_ADDR_EVM)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        ctx.machine.drive(&record.htlc_hash),
        ctx.machine.drive(&record.htlc_hash),
    );
    assert!(a.is_ok() && b.is_ok());

    let updated = ctx.store.get(&record.htlc_hash).await.unwrap();
    assert_eq!(updated.state, SwapState::SwapCompleted);
    assert!(updated.claim_tx_hash.is_some());
    assert_eq!(broadcast_count(&server).await, 1);
}
