//! Test module organization
//!
//! This module re-exports test helpers for use in test files.

mod helpers;

#[allow(unused_imports)]
pub use helpers::{
    advance_to, broadcast_count, build_test_context, confirmed_utxo, mount_broadcast_ok,
    mount_raw_tx, mount_tip, mount_utxos, native_swap_request, recipient_address,
    resolver_address, test_p2pkh_address, TestContext, CONFIRMATIONS_REQUIRED,
    DUMMY_AMOUNT_SATS, DUMMY_EVM_DEPOSIT_TX, DUMMY_MAKER_ADDR_EVM, DUMMY_RESOLVER_KEY_HEX,
    DUMMY_STRANGER_ADDR_EVM, DUMMY_TIMEOUT_HEIGHT, DUST_FLOOR_SATS,
};
