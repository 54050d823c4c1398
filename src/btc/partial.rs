//! Partial-Fill Script Extension
//!
//! Generalizes the hash-lock builder to a swap whose Bitcoin leg is split
//! across N independent secrets, each unlocking its own amount, with one
//! shared timeout branch for the resolver.
//!
//! Native script has no opcode that compares the spent value against a
//! per-secret amount, so a single multi-branch script cannot enforce that
//! the amount released matches the amount agreed for a given secret. The
//! adopted design therefore derives one isolated HTLC address per partial
//! secret: the resolver funds each address with exactly the agreed amount,
//! which turns amount correctness into a per-output funding obligation the
//! recipient can verify on-chain. The multi-branch script remains available
//! as a documented alternative constructor.

use bitcoin::blockdata::opcodes::all::{
    OP_CHECKSIG, OP_CLTV, OP_DEPTH, OP_DROP, OP_DUP, OP_ELSE, OP_ENDIF, OP_EQUAL, OP_EQUALVERIFY,
    OP_HASH160, OP_IF, OP_PUSHNUM_1, OP_SHA256,
};
use bitcoin::blockdata::script::Builder;
use bitcoin::{Address, Network, ScriptBuf};
use rand::RngCore;

use crate::btc::script::{sha256, HtlcScriptParams};
use crate::error::{Result, SwapError};

// ============================================================================
// SECRET GENERATION
// ============================================================================

/// A partial-fill secret together with its SHA-256 hash lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialSecret {
    /// 32-byte preimage, confidential until its part is claimed
    pub secret: [u8; 32],
    /// SHA-256 of `secret`
    pub hash: [u8; 32],
}

/// Generates `count` independent secrets for partial fills.
pub fn generate_partial_fill_secrets(count: u32) -> Vec<PartialSecret> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let mut secret = [0u8; 32];
            rng.fill_bytes(&mut secret);
            PartialSecret {
                secret,
                hash: sha256(&secret),
            }
        })
        .collect()
}

// ============================================================================
// AMOUNT SPLITTING
// ============================================================================

/// Splits a total amount evenly across `parts`, honoring a minimum-part floor.
///
/// The remainder of the integer division is assigned to the first part, so
/// the parts always sum to `total`.
///
/// # Arguments
///
/// * `total` - Total amount in satoshis
/// * `parts` - Number of partial fills
/// * `min` - Minimum satoshi value any part may have
///
/// # Returns
///
/// * `Ok(Vec<u64>)` - Per-part amounts, `parts` entries summing to `total`
/// * `Err(SwapError::PartCountInvalid)` - Zero parts, or part size below the floor
pub fn calculate_partial_fill_amounts(total: u64, parts: u32, min: u64) -> Result<Vec<u64>> {
    if parts == 0 {
        return Err(SwapError::PartCountInvalid { total, parts, min });
    }

    let base = total / u64::from(parts);
    if base < min {
        return Err(SwapError::PartCountInvalid { total, parts, min });
    }

    let mut amounts = vec![base; parts as usize];
    amounts[0] += total - base * u64::from(parts);
    Ok(amounts)
}

// ============================================================================
// PER-SECRET ADDRESS DERIVATION (adopted design)
// ============================================================================

/// One fillable part of a split Bitcoin leg.
#[derive(Debug, Clone)]
pub struct PartialFillLeg {
    /// P2SH funding address for this part
    pub address: Address,
    /// Redeem script bytes for this part
    pub script: ScriptBuf,
    /// Hash lock of the partial secret
    pub secret_hash: [u8; 32],
    /// Amount in satoshis the resolver must fund this address with
    pub amount: u64,
}

/// Derives one isolated HTLC address per partial secret.
///
/// Each part reuses the standard two-branch script with its own hash lock;
/// all parts share the recipient, resolver, and timeout height. The
/// resolver must fund each address with exactly its `amount` — that
/// obligation is what replaces on-chain amount enforcement.
///
/// # Arguments
///
/// * `secret_hashes` - Hash lock per part
/// * `amounts` - Agreed amount per part; must be the same length
/// * `recipient_pubkey_hash` - Recipient key hash (secret branches)
/// * `resolver_pubkey_hash` - Resolver key hash (timeout branches)
/// * `timeout_height` - Shared absolute timeout height
/// * `network` - Network to encode addresses for
pub fn partial_fill_addresses(
    secret_hashes: &[[u8; 32]],
    amounts: &[u64],
    recipient_pubkey_hash: [u8; 20],
    resolver_pubkey_hash: [u8; 20],
    timeout_height: u32,
    network: Network,
) -> Result<Vec<PartialFillLeg>> {
    if secret_hashes.len() != amounts.len() {
        return Err(SwapError::MissingField(
            "secret hash and amount lists must have the same length".to_string(),
        ));
    }

    secret_hashes
        .iter()
        .zip(amounts.iter())
        .map(|(hash, amount)| {
            let params = HtlcScriptParams {
                hash_lock: *hash,
                recipient_pubkey_hash,
                resolver_pubkey_hash,
                timeout_height,
            };
            Ok(PartialFillLeg {
                address: params.funding_address(network)?,
                script: params.redeem_script(),
                secret_hash: *hash,
                amount: *amount,
            })
        })
        .collect()
}

// ============================================================================
// MULTI-SECRET SCRIPT (documented alternative)
// ============================================================================

/// Builds a single redeem script with N secret branches and one shared
/// timeout branch.
///
/// The spender selects the timeout path by presenting a single witness item
/// (probed via `OP_DEPTH`), or a secret path by presenting signature,
/// pubkey, and preimage. Each secret branch checks the preimage against its
/// own hash lock.
///
/// This script CANNOT enforce that the value released for a given secret
/// matches that secret's agreed amount — there is no value-comparison
/// opcode — so a spender with any one secret can sweep the whole output.
/// Funding one shared output with this script is only safe when all parts
/// belong to the same recipient. Prefer `partial_fill_addresses`.
pub fn build_multi_secret_script(
    secret_hashes: &[[u8; 32]],
    recipient_pubkey_hash: [u8; 20],
    resolver_pubkey_hash: [u8; 20],
    timeout_height: u32,
) -> ScriptBuf {
    let mut builder = Builder::new()
        .push_opcode(OP_DEPTH)
        .push_opcode(OP_PUSHNUM_1)
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        // Timeout path: single witness item (resolver signature)
        .push_int(i64::from(timeout_height))
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(resolver_pubkey_hash)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        // Secret paths: hash the presented preimage once, compare per branch
        .push_opcode(OP_DUP)
        .push_opcode(OP_SHA256);

    for hash in secret_hashes {
        builder = builder
            .push_opcode(OP_DUP)
            .push_slice(*hash)
            .push_opcode(OP_EQUAL)
            .push_opcode(OP_IF)
            .push_opcode(OP_DROP)
            .push_opcode(OP_DROP)
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(recipient_pubkey_hash)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ELSE);
    }

    // Close the per-secret OP_ELSE chain: no hash matched, fail the spend
    builder = builder.push_opcode(OP_DROP).push_opcode(OP_DROP).push_int(0);
    for _ in secret_hashes {
        builder = builder.push_opcode(OP_ENDIF);
    }

    builder.push_opcode(OP_ENDIF).into_script()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_assigns_remainder_to_first_part() {
        let amounts = calculate_partial_fill_amounts(103, 3, 10).unwrap();
        assert_eq!(amounts, vec![35, 34, 34]);
        assert_eq!(amounts.iter().sum::<u64>(), 103);
    }

    #[test]
    fn split_below_floor_is_rejected() {
        let err = calculate_partial_fill_amounts(20, 3, 10).unwrap_err();
        assert_eq!(err.code(), "PART_COUNT_INVALID");
    }

    #[test]
    fn split_zero_parts_is_rejected() {
        let err = calculate_partial_fill_amounts(100, 0, 10).unwrap_err();
        assert_eq!(err.code(), "PART_COUNT_INVALID");
    }

    #[test]
    fn generated_secrets_hash_to_their_lock() {
        for part in generate_partial_fill_secrets(4) {
            assert_eq!(sha256(&part.secret), part.hash);
        }
    }

    #[test]
    fn per_secret_addresses_are_distinct() {
        let secrets = generate_partial_fill_secrets(3);
        let hashes: Vec<[u8; 32]> = secrets.iter().map(|s| s.hash).collect();
        let legs = partial_fill_addresses(
            &hashes,
            &[35, 34, 34],
            [0x11; 20],
            [0x22; 20],
            2_500_000,
            Network::Testnet,
        )
        .unwrap();

        assert_eq!(legs.len(), 3);
        assert_ne!(legs[0].address, legs[1].address);
        assert_ne!(legs[1].address, legs[2].address);
    }

    #[test]
    fn multi_secret_script_embeds_every_hash() {
        let secrets = generate_partial_fill_secrets(3);
        let hashes: Vec<[u8; 32]> = secrets.iter().map(|s| s.hash).collect();
        let script =
            build_multi_secret_script(&hashes, [0x11; 20], [0x22; 20], 2_500_000);
        let bytes = script.as_bytes();

        for hash in &hashes {
            assert!(bytes.windows(32).any(|w| w == hash.as_slice()));
        }
    }
}
