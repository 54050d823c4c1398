//! End-to-end lifecycle scenarios
//!
//! Two scenarios drive a swap through the full state machine against a
//! mock Esplora server: the cooperative path from creation to completion,
//! and the abandonment path from funding to timeout reclaim.

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, Network, Transaction, TxIn, TxOut};
use wiremock::MockServer;

use swap_coordinator::btc::script::sha256;
use swap_coordinator::swap::reveal::parse_hash_lock;
use swap_coordinator::SwapState;

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{
    broadcast_count, build_test_context, confirmed_utxo, mount_broadcast_ok, mount_raw_tx,
    mount_tip, mount_utxos, native_swap_request, TestContext, DUMMY_EVM_DEPOSIT_TX,
    DUMMY_MAKER_ADDR_EVM, DUMMY_TIMEOUT_HEIGHT,
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Walks a fresh swap to BTC_HTLC_CREATED and returns its HTLC address.
async fn open_swap(ctx: &TestContext) -> (String, String) {
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
    (record.htlc_hash, stored.btc_htlc_address.unwrap())
}

/// Builds a real funding transaction paying the HTLC address.
fn fund(address: &str, amount: u64) -> Transaction {
    let htlc_addr = address
        .parse::<Address<bitcoin::address::NetworkUnchecked>>()
        .unwrap()
        .require_network(Network::Testnet)
        .unwrap();
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn::default()],
        output: vec![TxOut {
            value: Amount::from_sat(amount),
            script_pubkey: htlc_addr.script_pubkey(),
        }],
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

/// Cooperative swap from creation to completion
/// What is tested: every happy-path transition in order, disclosure gated
/// on confirmation, completion once the maker sweeps the HTLC
#[tokio::test]
async fn cooperative_swap_completes() {
    let server = MockServer::start().await;
    let ctx = build_test_context(&server.uri(), 1_800);
    let (htlc_hash, address) = open_swap(&ctx).await;

    // Resolver funds the HTLC; three confirmations arrive.
    let funding = fund(&address, 100_000);
    let funding_txid = funding.txid().to_string();
    mount_utxos(&server, &address, confirmed_utxo(&funding_txid, 0, 100_000, 100)).await;
    mount_tip(&server, 102).await;

    assert_eq!(
        ctx.machine.drive(&htlc_hash).await.unwrap(),
        SwapState::BtcDepositDetected
    );
    assert_eq!(
        ctx.machine.drive(&htlc_hash).await.unwrap(),
        SwapState::BtcDepositConfirmed
    );

    // Maker asks for and receives the secret.
    let revealed = ctx.gate.reveal(&htlc_hash, DUMMY_MAKER_ADDR_EVM).await.unwrap();
    let secret = parse_hash_lock(&revealed.secret).unwrap();
    assert_eq!(sha256(&secret), parse_hash_lock(&htlc_hash).unwrap());

    // Maker sweeps the HTLC before the coordinator's own redeem runs; the
    // next drive observes the spent output and completes without a
    // broadcast of its own.
    server.reset().await;
    mount_utxos(&server, &address, serde_json::json!([])).await;
    assert_eq!(
        ctx.machine.drive(&htlc_hash).await.unwrap(),
        SwapState::SwapCompleted
    );
    assert_eq!(broadcast_count(&server).await, 0);
    let events = ctx.store.events_for(&htlc_hash).await;
    assert!(events.iter().any(|e| e.event_type == "htlc_already_swept"));

    // The audit trail holds the full transition history.
    let events = ctx.store.events_for(&htlc_hash).await;
    let transitions: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == "state_transition")
        .filter_map(|e| e.to_state)
        .collect();
    assert_eq!(
        transitions,
        vec![
            SwapState::WaitingForDeposit,
            SwapState::EvmDepositDetected,
            SwapState::EvmDepositConfirmed,
            SwapState::BtcHtlcCreated,
            SwapState::BtcDepositDetected,
            SwapState::BtcDepositConfirmed,
            SwapState::SecretRevealed,
            SwapState::SwapCompleted,
        ]
    );
}

/// Abandoned swap from funding to timeout reclaim
/// What is tested: sweep into SWAP_TIMEOUT, reclaim waits for the timeout
/// height, then broadcasts exactly once and records the spend txid
#[tokio::test]
async fn abandoned_swap_is_reclaimed_after_timeout() {
    let server = MockServer::start().await;
    // Deadline 0 makes the swap sweepable as soon as it stalls.
    let ctx = build_test_context(&server.uri(), 0);
    let (htlc_hash, address) = open_swap(&ctx).await;

    let funding = fund(&address, 100_000);
    let funding_txid = funding.txid().to_string();
    mount_utxos(&server, &address, confirmed_utxo(&funding_txid, 0, 100_000, 100)).await;
    mount_tip(&server, 102).await;

    ctx.machine.drive(&htlc_hash).await.unwrap();
    ctx.machine.drive(&htlc_hash).await.unwrap();
    assert_eq!(
        ctx.store.get(&htlc_hash).await.unwrap().state,
        SwapState::BtcDepositConfirmed
    );

    // The maker never claims; the sweep times the swap out.
    let swept = ctx.machine.sweep_timeouts().await;
    assert_eq!(swept, vec![htlc_hash.clone()]);

    // Timeout height not reached yet: the reclaim holds.
    assert_eq!(
        ctx.machine.drive(&htlc_hash).await.unwrap(),
        SwapState::SwapTimeout
    );
    assert_eq!(broadcast_count(&server).await, 0);

    // Chain passes the timeout height; the reclaim goes out.
    server.reset().await;
    mount_utxos(&server, &address, confirmed_utxo(&funding_txid, 0, 100_000, 100)).await;
    mount_tip(&server, u64::from(DUMMY_TIMEOUT_HEIGHT) + 1).await;
    mount_raw_tx(&server, &funding_txid, &serialize_hex(&funding)).await;
    mount_broadcast_ok(&server).await;

    assert_eq!(
        ctx.machine.drive(&htlc_hash).await.unwrap(),
        SwapState::SwapReclaimed
    );
    assert_eq!(broadcast_count(&server).await, 1);

    let record = ctx.store.get(&htlc_hash).await.unwrap();
    assert!(record.claim_tx_hash.is_some());
    // The secret was never disclosed.
    assert!(record.secret.is_none());

    // A reclaimed swap is terminal; further drives are no-ops.
    assert_eq!(
        ctx.machine.drive(&htlc_hash).await.unwrap(),
        SwapState::SwapReclaimed
    );
    assert_eq!(broadcast_count(&server).await, 1);
}
