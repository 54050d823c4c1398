//! Bitcoin Transaction Engine
//!
//! Builds, signs, and broadcasts the two spends of a funded HTLC: the
//! redeem transaction (secret branch) and the reclaim transaction (timeout
//! branch). Both are legacy P2SH spends whose script_sig carries the
//! signature, public key, branch selector, and the full redeem script.
//!
//! Construction and broadcast are deliberately separate stages: a prepared
//! transaction's id is already known before it leaves the process, so the
//! state machine can durably record the outcome first and ship the bytes
//! after.
//!
//! Fee model: fixed fee rate times a conservative size estimate. Live
//! fee-market estimation can replace this without touching any caller.

use bitcoin::absolute::LockTime;
use bitcoin::blockdata::opcodes::{OP_FALSE, OP_TRUE};
use bitcoin::blockdata::script::Builder;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::address::NetworkUnchecked;
use bitcoin::script::PushBytesBuf;
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Txid, Witness,
};

use crate::btc::monitor::{FundingCheck, FundingUtxo, UtxoMonitor};
use crate::btc::provider::EsploraProvider;
use crate::error::{Result, SwapError};

// ============================================================================
// SIGNING CAPABILITY
// ============================================================================

/// Resolver signing capability.
///
/// Constructed once from configuration and handed to the engine explicitly;
/// the key never lives in module-level state.
#[derive(Clone)]
pub struct ResolverKey {
    secret: SecretKey,
    public: PublicKey,
}

impl ResolverKey {
    /// Builds the capability from a 32-byte hex-encoded secret key.
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let stripped = key_hex.strip_prefix("0x").unwrap_or(key_hex);
        let bytes = hex::decode(stripped)
            .map_err(|_| SwapError::MissingField("resolver key is not hex".to_string()))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|_| SwapError::MissingField("resolver key is not a valid key".to_string()))?;

        let secp = Secp256k1::new();
        let public = PublicKey::new(secret.public_key(&secp));
        Ok(Self { secret, public })
    }

    /// 20-byte hash of the resolver's public key, for the timeout branch.
    pub fn pubkey_hash(&self) -> [u8; 20] {
        self.public.pubkey_hash().to_byte_array()
    }

    /// Resolver's P2PKH address on the given network.
    pub fn p2pkh_address(&self, network: Network) -> Address {
        Address::p2pkh(&self.public, network)
    }
}

impl std::fmt::Debug for ResolverKey {
    // Never print the secret key material
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverKey")
            .field("public", &self.public)
            .finish()
    }
}

// ============================================================================
// PREPARED TRANSACTIONS
// ============================================================================

/// A fully signed transaction that has not been broadcast yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTx {
    /// Transaction ID (known before broadcast)
    pub txid: String,
    /// Hex-encoded consensus serialization
    pub raw_hex: String,
    /// Output value in satoshis after the fee
    pub output_value: u64,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Builds and broadcasts HTLC redeem and reclaim transactions.
#[derive(Debug)]
pub struct TxEngine {
    provider: EsploraProvider,
    monitor: UtxoMonitor,
    key: ResolverKey,
    network: Network,
    fee_sats: u64,
    dust_floor: u64,
    secp: Secp256k1<All>,
}

impl TxEngine {
    /// Creates a new engine.
    ///
    /// # Arguments
    ///
    /// * `provider` - Chain-data/broadcast provider client
    /// * `key` - Resolver signing capability
    /// * `network` - Bitcoin network for address handling
    /// * `fee_rate_sat_vb` - Fixed fee rate in sat/vB
    /// * `tx_size_estimate_vb` - Conservative P2SH-spend size estimate
    /// * `dust_floor` - Minimum relayable output value in satoshis
    pub fn new(
        provider: EsploraProvider,
        key: ResolverKey,
        network: Network,
        fee_rate_sat_vb: u64,
        tx_size_estimate_vb: u64,
        dust_floor: u64,
    ) -> Self {
        Self {
            monitor: UtxoMonitor::new(provider.clone()),
            provider,
            key,
            network,
            fee_sats: fee_rate_sat_vb * tx_size_estimate_vb,
            dust_floor,
            secp: Secp256k1::new(),
        }
    }

    /// Builds and signs the redeem transaction (secret branch).
    ///
    /// Spends the HTLC funding output to `recipient_address`, worth the
    /// funded amount minus the fixed fee.
    ///
    /// # Arguments
    ///
    /// * `htlc_address` - Funded HTLC address
    /// * `redeem_script` - The HTLC redeem script
    /// * `secret` - 32-byte preimage of the hash lock
    /// * `recipient_address` - Destination for the redeemed funds
    ///
    /// # Returns
    ///
    /// * `Ok(PreparedTx)` - Signed transaction ready to broadcast
    /// * `Err(SwapError)` - `HtlcNotFunded`, `DustOutput`, or a build failure
    pub async fn prepare_redeem(
        &self,
        htlc_address: &str,
        redeem_script: &ScriptBuf,
        secret: &[u8; 32],
        recipient_address: &str,
    ) -> Result<PreparedTx> {
        let funding = self.funded_utxo(htlc_address).await?;
        self.verify_funding_output(&funding, redeem_script).await?;

        self.build_branch_spend(
            &funding,
            redeem_script,
            recipient_address,
            LockTime::ZERO,
            Some(*secret),
            true,
        )
    }

    /// Builds, signs, and broadcasts the redeem transaction.
    pub async fn redeem(
        &self,
        htlc_address: &str,
        redeem_script: &ScriptBuf,
        secret: &[u8; 32],
        recipient_address: &str,
    ) -> Result<String> {
        let prepared = self
            .prepare_redeem(htlc_address, redeem_script, secret, recipient_address)
            .await?;
        self.broadcast(&prepared).await
    }

    /// Builds and signs the reclaim transaction (timeout branch).
    ///
    /// Only constructible once the chain tip has reached the HTLC's timeout
    /// height; the transaction's lock time is set to the current height so
    /// the CLTV check in the script passes.
    ///
    /// # Arguments
    ///
    /// * `htlc_address` - Funded HTLC address
    /// * `redeem_script` - The HTLC redeem script
    /// * `timeout_height` - The script's absolute timeout height
    /// * `destination_address` - Destination for the reclaimed funds
    ///
    /// # Returns
    ///
    /// * `Ok(PreparedTx)` - Signed transaction ready to broadcast
    /// * `Err(SwapError::TimeoutNotReached)` - Tip is still below the timeout
    pub async fn prepare_reclaim(
        &self,
        htlc_address: &str,
        redeem_script: &ScriptBuf,
        timeout_height: u64,
        destination_address: &str,
    ) -> Result<PreparedTx> {
        let current = self.monitor.tip_height().await?;
        if current < timeout_height {
            return Err(SwapError::TimeoutNotReached {
                current,
                timeout: timeout_height,
            });
        }

        let funding = self.funded_utxo(htlc_address).await?;
        self.verify_funding_output(&funding, redeem_script).await?;

        let lock_time = LockTime::from_height(current as u32)
            .map_err(|e| SwapError::TxBuild(e.to_string()))?;

        self.build_branch_spend(
            &funding,
            redeem_script,
            destination_address,
            lock_time,
            None,
            false,
        )
    }

    /// Builds, signs, and broadcasts the reclaim transaction.
    pub async fn reclaim(
        &self,
        htlc_address: &str,
        redeem_script: &ScriptBuf,
        timeout_height: u64,
        destination_address: &str,
    ) -> Result<String> {
        let prepared = self
            .prepare_reclaim(htlc_address, redeem_script, timeout_height, destination_address)
            .await?;
        self.broadcast(&prepared).await
    }

    /// Broadcasts a prepared transaction, returning the network's txid.
    pub async fn broadcast(&self, prepared: &PreparedTx) -> Result<String> {
        let txid = self.provider.broadcast(&prepared.raw_hex).await?;
        tracing::info!("broadcast transaction {}", txid);
        Ok(txid)
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    /// Resolves the HTLC's funding UTXO, failing if none exists.
    async fn funded_utxo(&self, htlc_address: &str) -> Result<FundingUtxo> {
        match self.monitor.check_funding(htlc_address).await {
            FundingCheck::Funded(utxo) => Ok(utxo),
            FundingCheck::NotFunded => Err(SwapError::HtlcNotFunded(htlc_address.to_string())),
            FundingCheck::ProviderError(e) => Err(SwapError::Provider(e)),
        }
    }

    /// Checks that the funding output actually pays into the P2SH wrap of
    /// the redeem script, catching monitor/record mismatches before signing.
    async fn verify_funding_output(
        &self,
        funding: &FundingUtxo,
        redeem_script: &ScriptBuf,
    ) -> Result<()> {
        let raw = self.provider.get_raw_tx(&funding.txid).await?;
        let tx: Transaction = bitcoin::consensus::encode::deserialize(&raw)
            .map_err(|e| SwapError::Provider(format!("undecodable funding tx: {}", e)))?;

        let output = tx
            .output
            .get(funding.vout as usize)
            .ok_or_else(|| SwapError::TxBuild("funding vout out of range".to_string()))?;

        let expected = Address::p2sh(redeem_script, self.network)
            .map_err(|e| SwapError::TxBuild(e.to_string()))?
            .script_pubkey();
        if output.script_pubkey != expected {
            return Err(SwapError::TxBuild(
                "funding output does not match the HTLC redeem script".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds and signs a one-input one-output spend of the HTLC through
    /// the given branch.
    ///
    /// `secret` is the preimage for the secret branch, absent for the
    /// timeout branch. `secret_branch` selects the script branch via
    /// OP_TRUE/OP_FALSE.
    fn build_branch_spend(
        &self,
        funding: &FundingUtxo,
        redeem_script: &ScriptBuf,
        destination: &str,
        lock_time: LockTime,
        secret: Option<[u8; 32]>,
        secret_branch: bool,
    ) -> Result<PreparedTx> {
        if funding.amount <= self.fee_sats {
            return Err(SwapError::DustOutput {
                value: 0,
                floor: self.dust_floor,
            });
        }
        let output_value = funding.amount - self.fee_sats;
        if output_value < self.dust_floor {
            return Err(SwapError::DustOutput {
                value: output_value,
                floor: self.dust_floor,
            });
        }

        let destination = destination
            .parse::<Address<NetworkUnchecked>>()
            .map_err(|_| SwapError::MissingField(format!("invalid address '{}'", destination)))?
            .require_network(self.network)
            .map_err(|_| {
                SwapError::MissingField(format!(
                    "address '{}' is not valid for this network",
                    destination
                ))
            })?;

        let outpoint = OutPoint {
            txid: funding
                .txid
                .parse::<Txid>()
                .map_err(|_| SwapError::TxBuild("unparseable funding txid".to_string()))?,
            vout: funding.vout,
        };

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time,
            input: vec![TxIn {
                previous_output: outpoint,
                script_sig: ScriptBuf::new(),
                // RBF-enabled and locktime-active
                sequence: Sequence::from_consensus(0xfffffffe),
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(output_value),
                script_pubkey: destination.script_pubkey(),
            }],
        };

        // Sign over the redeem script with SIGHASH_ALL
        let sighash = SighashCache::new(&tx)
            .legacy_signature_hash(0, redeem_script, EcdsaSighashType::All.to_u32())
            .map_err(|e| SwapError::TxBuild(e.to_string()))?;
        let message = Message::from_digest(sighash.to_byte_array());
        let signature = self.secp.sign_ecdsa(&message, &self.key.secret);

        let mut sig_bytes = signature.serialize_der().to_vec();
        sig_bytes.push(EcdsaSighashType::All.to_u32() as u8);
        let sig_push = PushBytesBuf::try_from(sig_bytes)
            .map_err(|_| SwapError::TxBuild("signature too long for script push".to_string()))?;
        let pubkey_push = PushBytesBuf::try_from(self.key.public.to_bytes())
            .map_err(|_| SwapError::TxBuild("pubkey too long for script push".to_string()))?;
        let script_push = PushBytesBuf::try_from(redeem_script.to_bytes())
            .map_err(|_| SwapError::TxBuild("redeem script too long for script push".to_string()))?;

        // script_sig: <sig> <pubkey> [<secret>] <branch selector> <redeem script>
        let mut builder = Builder::new().push_slice(sig_push).push_slice(pubkey_push);
        if let Some(preimage) = secret {
            builder = builder.push_slice(preimage);
        }
        builder = builder.push_opcode(if secret_branch { OP_TRUE } else { OP_FALSE });
        tx.input[0].script_sig = builder.push_slice(script_push).into_script();

        Ok(PreparedTx {
            txid: tx.txid().to_string(),
            raw_hex: serialize_hex(&tx),
            output_value,
        })
    }
}
