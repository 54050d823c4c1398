//! Hash-Lock Script Builder
//!
//! Constructs the two-branch HTLC redeem script and derives the P2SH
//! funding address. The builder is a pure function of its inputs: the same
//! hash lock, key hashes, and timeout height always produce the same script
//! bytes and the same address, so any party can verify the contract
//! independently.
//!
//! Script structure:
//! ```text
//! OP_IF
//!   OP_SHA256 <hash_lock> OP_EQUALVERIFY
//!   OP_DUP OP_HASH160 <recipient_pkh> OP_EQUALVERIFY OP_CHECKSIG
//! OP_ELSE
//!   <timeout_height> OP_CHECKLOCKTIMEVERIFY OP_DROP
//!   OP_DUP OP_HASH160 <resolver_pkh> OP_EQUALVERIFY OP_CHECKSIG
//! OP_ENDIF
//! ```
//!
//! The timeout branch uses an absolute-height locktime check so the UTXO
//! cannot be reclaimed before `timeout_height`.

use bitcoin::blockdata::opcodes::all::{
    OP_CHECKSIG, OP_CLTV, OP_DROP, OP_DUP, OP_ELSE, OP_ENDIF, OP_EQUALVERIFY, OP_HASH160, OP_IF,
    OP_SHA256,
};
use bitcoin::blockdata::script::Builder;
use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network, ScriptBuf};
use sha2::{Digest, Sha256};

use crate::error::{Result, SwapError};

// ============================================================================
// SCRIPT PARAMETERS
// ============================================================================

/// Inputs for the HTLC redeem script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtlcScriptParams {
    /// SHA-256 of the swap secret; the hash lock shared across both chains
    pub hash_lock: [u8; 32],
    /// 20-byte public-key hash of the recipient (secret branch)
    pub recipient_pubkey_hash: [u8; 20],
    /// 20-byte public-key hash of the resolver (timeout branch)
    pub resolver_pubkey_hash: [u8; 20],
    /// Absolute block height after which the resolver may reclaim
    pub timeout_height: u32,
}

impl HtlcScriptParams {
    /// Builds the HTLC redeem script for these parameters.
    pub fn redeem_script(&self) -> ScriptBuf {
        Builder::new()
            .push_opcode(OP_IF)
            .push_opcode(OP_SHA256)
            .push_slice(self.hash_lock)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(self.recipient_pubkey_hash)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ELSE)
            .push_int(i64::from(self.timeout_height))
            .push_opcode(OP_CLTV)
            .push_opcode(OP_DROP)
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(self.resolver_pubkey_hash)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ENDIF)
            .into_script()
    }

    /// Derives the P2SH funding address wrapping the redeem script.
    ///
    /// # Arguments
    ///
    /// * `network` - Network to encode the address for
    ///
    /// # Returns
    ///
    /// * `Ok(Address)` - Funding address for the HTLC
    /// * `Err(SwapError)` - Script exceeds the P2SH size limit
    pub fn funding_address(&self, network: Network) -> Result<Address> {
        let script = self.redeem_script();
        Address::p2sh(&script, network).map_err(|e| SwapError::TxBuild(e.to_string()))
    }
}

// ============================================================================
// ADDRESS HELPERS
// ============================================================================

/// Extracts the 20-byte public-key hash from a Bitcoin address string.
///
/// Only P2PKH and P2WPKH addresses carry a plain public-key hash; any other
/// address type (P2SH, P2TR, P2WSH) cannot be used as an HTLC branch key
/// and is rejected.
///
/// # Arguments
///
/// * `addr` - Address string to decode
/// * `network` - Network the address must belong to
///
/// # Returns
///
/// * `Ok([u8; 20])` - The public-key hash
/// * `Err(SwapError::UnsupportedAddressType)` - Address is not P2PKH/P2WPKH
pub fn address_pubkey_hash(addr: &str, network: Network) -> Result<[u8; 20]> {
    let address = addr
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|_| SwapError::MissingField(format!("invalid bitcoin address '{}'", addr)))?
        .require_network(network)
        .map_err(|_| {
            SwapError::MissingField(format!("address '{}' is not valid for this network", addr))
        })?;

    let script_pubkey = address.script_pubkey();
    let bytes = script_pubkey.as_bytes();
    let mut pkh = [0u8; 20];

    if script_pubkey.is_p2pkh() {
        // OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG
        pkh.copy_from_slice(&bytes[3..23]);
        Ok(pkh)
    } else if script_pubkey.is_p2wpkh() {
        // OP_0 <20 bytes>
        pkh.copy_from_slice(&bytes[2..22]);
        Ok(pkh)
    } else {
        Err(SwapError::UnsupportedAddressType(addr.to_string()))
    }
}

/// Computes the SHA-256 hash of arbitrary bytes.
///
/// Used both to derive the hash lock from the secret at swap creation and
/// to verify any preimage presented later.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
