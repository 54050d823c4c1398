//! Swap State Machine
//!
//! Drives swap records through the lifecycle table. Each call to
//! [`SwapStateMachine::drive`] observes the chain-data provider, decides at
//! most one forward transition, and commits it through the store's
//! compare-and-swap. Fund-moving transitions are committed before the
//! transaction is broadcast: the txid of a signed transaction is stable, so
//! a record always points at its spend before the network can see it, and
//! two racing drivers can never both reach the broadcast.

use chrono::{Duration, Utc};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use bitcoin::{Network, ScriptBuf};

use crate::btc::engine::TxEngine;
use crate::btc::monitor::{FundingCheck, FundingUtxo, UtxoMonitor};
use crate::btc::partial::{
    calculate_partial_fill_amounts, generate_partial_fill_secrets, partial_fill_addresses,
    PartialFillLeg,
};
use crate::btc::script::{address_pubkey_hash, sha256, HtlcScriptParams};
use crate::error::{ErrorKind, Result, SwapError};
use crate::lightning::{InvoiceState, LndClient};
use crate::storage::{SwapEvent, SwapStore};
use crate::swap::reveal::{parse_hash_lock, SecretVault};
use crate::swap::{SwapRecord, SwapState, SwapType};

// ============================================================================
// REQUESTS
// ============================================================================

/// Parameters for opening a new EVM-to-Bitcoin swap.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateSwapRequest {
    /// Which Bitcoin-side mechanism to use
    pub swap_type: SwapType,
    /// Escrowed amount on the source chain, as a decimal string
    pub amount: String,
    /// Source chain label (e.g. "sepolia")
    pub from_chain: String,
    /// Destination chain label (e.g. "bitcoin" or "lightning")
    pub to_chain: String,
    /// Asset locked on the source chain
    pub from_token: String,
    /// Asset delivered on the destination chain
    pub to_token: String,
    /// Maker address on the EVM chain; the only party the secret may go to
    pub user_address: String,
    /// EVM chain id of the source escrow
    pub evm_chain_id: u64,
    /// Escrow contract expected to hold the EVM-side lock
    pub evm_escrow_address: Option<String>,
    /// Bitcoin amount in satoshis
    pub btc_amount: u64,
    /// Maker's Bitcoin address (P2PKH or P2WPKH)
    pub btc_recipient_address: String,
    /// Block height after which the resolver may reclaim
    pub timeout_block: u32,
    /// Wall-clock lifetime of the swap in seconds
    pub expires_in_secs: i64,
}

// ============================================================================
// STATE MACHINE
// ============================================================================

/// Coordinates swap progress against the Bitcoin chain and the store.
#[derive(Debug, Clone)]
pub struct SwapStateMachine {
    store: SwapStore,
    vault: SecretVault,
    monitor: UtxoMonitor,
    engine: Arc<TxEngine>,
    lnd: Option<LndClient>,
    network: Network,
    resolver_pubkey_hash: [u8; 20],
    resolver_address: String,
    confirmations_required: u64,
    dust_floor: u64,
    sweep_deadline: Duration,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SwapStateMachine {
    /// Creates a state machine over the given components.
    ///
    /// # Arguments
    ///
    /// * `store` - Swap record store
    /// * `vault` - Secret vault shared with the reveal gate
    /// * `monitor` - HTLC funding monitor
    /// * `engine` - Transaction construction and broadcast
    /// * `lnd` - Lightning client, if the deployment supports invoice swaps
    /// * `network` - Bitcoin network
    /// * `resolver_pubkey_hash` - HASH160 of the resolver's public key
    /// * `resolver_address` - Destination for reclaimed funds
    /// * `confirmations_required` - Depth before a deposit counts as final
    /// * `dust_floor` - Network dust floor in satoshis
    /// * `sweep_deadline_secs` - Maximum swap age before it times out
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SwapStore,
        vault: SecretVault,
        monitor: UtxoMonitor,
        engine: TxEngine,
        lnd: Option<LndClient>,
        network: Network,
        resolver_pubkey_hash: [u8; 20],
        resolver_address: String,
        confirmations_required: u64,
        dust_floor: u64,
        sweep_deadline_secs: i64,
    ) -> Self {
        Self {
            store,
            vault,
            monitor,
            engine: Arc::new(engine),
            lnd,
            network,
            resolver_pubkey_hash,
            resolver_address,
            confirmations_required,
            dust_floor,
            sweep_deadline: Duration::seconds(sweep_deadline_secs),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    // ------------------------------------------------------------------
    // swap creation and EVM-side notifications
    // ------------------------------------------------------------------

    /// Opens a new swap: generates the secret, derives the hash lock, and
    /// stores the record in `CREATED`.
    ///
    /// The secret never appears in the returned record; it stays in the
    /// vault until authorized disclosure.
    pub async fn create_swap(&self, request: CreateSwapRequest) -> Result<SwapRecord> {
        if request.user_address.trim().is_empty() {
            return Err(SwapError::MissingField("user_address".to_string()));
        }
        if request.amount.trim().is_empty()
            || !request.amount.chars().all(|c| c.is_ascii_digit())
        {
            return Err(SwapError::MissingField(
                "amount must be a decimal string".to_string(),
            ));
        }
        if request.btc_amount < self.dust_floor {
            return Err(SwapError::DustOutput {
                value: request.btc_amount,
                floor: self.dust_floor,
            });
        }
        if request.swap_type == SwapType::Native {
            // Fails early on taproot/P2SH recipients instead of at redeem time.
            address_pubkey_hash(&request.btc_recipient_address, self.network)?;
        } else if self.lnd.is_none() {
            return Err(SwapError::Lightning(
                "no lightning node configured".to_string(),
            ));
        }
        if request.expires_in_secs <= 0 {
            return Err(SwapError::MissingField(
                "expires_in_secs must be positive".to_string(),
            ));
        }

        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let htlc_hash = format!("0x{}", hex::encode(sha256(&secret)));

        let now = Utc::now();
        let record = SwapRecord {
            id: uuid::Uuid::new_v4().to_string(),
            htlc_hash: htlc_hash.clone(),
            secret_hash: htlc_hash.clone(),
            state: SwapState::Created,
            swap_type: request.swap_type,
            amount: request.amount,
            from_chain: request.from_chain,
            to_chain: request.to_chain,
            from_token: request.from_token,
            to_token: request.to_token,
            user_address: request.user_address,
            evm_chain_id: request.evm_chain_id,
            evm_escrow_address: request.evm_escrow_address,
            evm_tx_hash: None,
            evm_block_number: None,
            btc_amount: request.btc_amount,
            btc_recipient_address: request.btc_recipient_address,
            btc_htlc_address: None,
            btc_htlc_script: None,
            timeout_block: request.timeout_block,
            btc_tx_id: None,
            btc_tx_vout: None,
            btc_funded_amount: None,
            btc_block_height: None,
            confirmations_required: self.confirmations_required,
            current_confirmations: 0,
            claim_tx_hash: None,
            lightning_invoice: None,
            lightning_payment_hash: None,
            lightning_preimage: None,
            secret: None,
            secret_revealed_at: None,
            secret_revealed_to: None,
            error_message: None,
            error_details: None,
            expires_at: now + Duration::seconds(request.expires_in_secs),
            created_at: now,
            updated_at: now,
        };

        self.vault.register(&htlc_hash, secret).await;
        self.store.insert(record.clone()).await?;
        tracing::info!(htlc_hash = %htlc_hash, swap_id = %record.id, "swap created");
        Ok(record)
    }

    /// Records a detected EVM escrow deposit.
    pub async fn record_evm_deposit(&self, htlc_hash: &str, deposit_txid: &str) -> Result<()> {
        let lock = self.lock_for(htlc_hash).await;
        let _guard = lock.lock().await;

        // A freshly created swap may not have been driven yet.
        let record = self.store.get(htlc_hash).await?;
        if record.state == SwapState::Created {
            self.store
                .update_if_state(
                    htlc_hash,
                    SwapState::Created,
                    SwapState::WaitingForDeposit,
                    |_| {},
                )
                .await?;
        }

        let txid = deposit_txid.to_string();
        self.store
            .update_if_state(
                htlc_hash,
                SwapState::WaitingForDeposit,
                SwapState::EvmDepositDetected,
                |r| r.evm_tx_hash = Some(txid),
            )
            .await?;
        Ok(())
    }

    /// Records that the EVM deposit has reached finality.
    pub async fn confirm_evm_deposit(&self, htlc_hash: &str, block_number: u64) -> Result<()> {
        let lock = self.lock_for(htlc_hash).await;
        let _guard = lock.lock().await;

        self.store
            .update_if_state(
                htlc_hash,
                SwapState::EvmDepositDetected,
                SwapState::EvmDepositConfirmed,
                |r| r.evm_block_number = Some(block_number),
            )
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // driving
    // ------------------------------------------------------------------

    /// Advances a swap by at most one transition.
    ///
    /// Transient provider failures are absorbed (the swap is retried on the
    /// next poll); any other failure marks the swap `SWAP_FAILED` and is
    /// returned to the caller.
    pub async fn drive(&self, htlc_hash: &str) -> Result<SwapState> {
        let lock = self.lock_for(htlc_hash).await;
        let _guard = lock.lock().await;

        let record = self.store.get(htlc_hash).await?;
        match self.step(&record).await {
            Ok(state) => Ok(state),
            Err(e) if e.kind() == ErrorKind::Transient => {
                self.append_note(htlc_hash, "provider_error", &e.to_string())
                    .await;
                tracing::warn!(htlc_hash, error = %e, "transient failure, will retry");
                Ok(record.state)
            }
            Err(e) => {
                tracing::error!(htlc_hash, error = %e, "swap failed");
                let message = e.to_string();
                let details = serde_json::json!({ "code": e.code() });
                let _ = self
                    .store
                    .update_if_state(htlc_hash, record.state, SwapState::SwapFailed, |r| {
                        r.error_message = Some(message.clone());
                        r.error_details = Some(details.clone());
                    })
                    .await;
                self.append_note(htlc_hash, "swap_failed", &format!("{}: {}", e.code(), e))
                    .await;
                Err(e)
            }
        }
    }

    /// Drives every active swap once, concurrently. Per-swap locks keep the
    /// concurrency safe; the outcomes come back in listing order.
    pub async fn drive_all(&self) -> Vec<(String, Result<SwapState>)> {
        let records = self.store.list_active().await;
        let drives = records.iter().map(|r| self.drive(&r.htlc_hash));
        let outcomes = futures::future::join_all(drives).await;
        records
            .into_iter()
            .map(|r| r.htlc_hash)
            .zip(outcomes)
            .collect()
    }

    /// Moves expired or overaged swaps to `SWAP_TIMEOUT`.
    ///
    /// A swap times out when its wall-clock deadline has passed or when its
    /// age since creation exceeds the sweep deadline, whichever comes
    /// first. Swaps whose secret is already out are exempt: reclaiming
    /// against a known secret would race the maker's redeem.
    pub async fn sweep_timeouts(&self) -> Vec<String> {
        let now = Utc::now();
        let mut swept = Vec::new();

        for record in self.store.list_active().await {
            if matches!(
                record.state,
                SwapState::SwapTimeout | SwapState::SecretRevealed
            ) {
                continue;
            }
            let overaged = now - record.created_at >= self.sweep_deadline;
            if !record.is_expired(now) && !overaged {
                continue;
            }

            let lock = self.lock_for(&record.htlc_hash).await;
            let _guard = lock.lock().await;
            let result = self
                .store
                .update_if_state(&record.htlc_hash, record.state, SwapState::SwapTimeout, |_| {})
                .await;
            if result.is_ok() {
                tracing::warn!(htlc_hash = %record.htlc_hash, from = %record.state, "swap timed out");
                swept.push(record.htlc_hash);
            }
        }
        swept
    }

    // ------------------------------------------------------------------
    // partial fills
    // ------------------------------------------------------------------

    /// Plans a partial-fill funding layout: one isolated HTLC address per
    /// part, each under its own secret. The secrets are registered in the
    /// vault under their hash locks.
    pub async fn plan_partial_fills(
        &self,
        total_sats: u64,
        parts: u32,
        recipient_address: &str,
        timeout_height: u32,
    ) -> Result<Vec<PartialFillLeg>> {
        let amounts = calculate_partial_fill_amounts(total_sats, parts, self.dust_floor)?;
        let secrets = generate_partial_fill_secrets(parts);
        let hashes: Vec<[u8; 32]> = secrets.iter().map(|s| s.hash).collect();
        let recipient_pkh = address_pubkey_hash(recipient_address, self.network)?;

        let legs = partial_fill_addresses(
            &hashes,
            &amounts,
            recipient_pkh,
            self.resolver_pubkey_hash,
            timeout_height,
            self.network,
        )?;

        for s in &secrets {
            let key = format!("0x{}", hex::encode(s.hash));
            self.vault.register(&key, s.secret).await;
        }
        Ok(legs)
    }

    // ------------------------------------------------------------------
    // per-state decisions
    // ------------------------------------------------------------------

    async fn step(&self, record: &SwapRecord) -> Result<SwapState> {
        match record.state {
            SwapState::Created => {
                let updated = self
                    .store
                    .update_if_state(
                        &record.htlc_hash,
                        SwapState::Created,
                        SwapState::WaitingForDeposit,
                        |_| {},
                    )
                    .await?;
                Ok(updated.state)
            }

            // EVM-side progress arrives via record_evm_deposit /
            // confirm_evm_deposit from the embedding service.
            SwapState::WaitingForDeposit | SwapState::EvmDepositDetected => Ok(record.state),

            SwapState::EvmDepositConfirmed => self.open_btc_leg(record).await,
            SwapState::BtcHtlcCreated => self.watch_for_deposit(record).await,
            SwapState::BtcDepositDetected => self.watch_for_confirmation(record).await,

            // Waiting on the maker to request / receive the secret.
            SwapState::BtcDepositConfirmed | SwapState::SecretRequested => Ok(record.state),

            SwapState::SecretRevealed => self.complete_swap(record).await,
            SwapState::SwapTimeout => self.reclaim(record).await,

            SwapState::SwapCompleted | SwapState::SwapFailed | SwapState::SwapReclaimed => {
                Ok(record.state)
            }
        }
    }

    /// Opens the Bitcoin leg: derives the HTLC address for native swaps, or
    /// creates a held invoice for lightning swaps.
    async fn open_btc_leg(&self, record: &SwapRecord) -> Result<SwapState> {
        match record.swap_type {
            SwapType::Native => {
                let params = HtlcScriptParams {
                    hash_lock: parse_hash_lock(&record.htlc_hash)?,
                    recipient_pubkey_hash: address_pubkey_hash(
                        &record.btc_recipient_address,
                        self.network,
                    )?,
                    resolver_pubkey_hash: self.resolver_pubkey_hash,
                    timeout_height: record.timeout_block,
                };
                let script = params.redeem_script();
                let address = params.funding_address(self.network)?.to_string();
                let script_hex = hex::encode(script.as_bytes());

                let updated = self
                    .store
                    .update_if_state(
                        &record.htlc_hash,
                        SwapState::EvmDepositConfirmed,
                        SwapState::BtcHtlcCreated,
                        |r| {
                            r.btc_htlc_address = Some(address.clone());
                            r.btc_htlc_script = Some(script_hex.clone());
                        },
                    )
                    .await?;
                tracing::info!(htlc_hash = %record.htlc_hash, address = %address, "HTLC address derived");
                Ok(updated.state)
            }
            SwapType::Lightning => {
                let lnd = self.lightning()?;
                let hash = parse_hash_lock(&record.htlc_hash)?;
                let invoice = lnd
                    .create_held_invoice(&hash, record.btc_amount, &format!("swap {}", record.id))
                    .await?;

                let request = invoice.payment_request.clone();
                let payment_hash = record.htlc_hash.clone();
                let updated = self
                    .store
                    .update_if_state(
                        &record.htlc_hash,
                        SwapState::EvmDepositConfirmed,
                        SwapState::BtcHtlcCreated,
                        |r| {
                            r.lightning_invoice = Some(request.clone());
                            r.lightning_payment_hash = Some(payment_hash.clone());
                        },
                    )
                    .await?;
                tracing::info!(htlc_hash = %record.htlc_hash, "held invoice created");
                Ok(updated.state)
            }
        }
    }

    /// `BTC_HTLC_CREATED`: waits for funds to arrive on the Bitcoin leg.
    async fn watch_for_deposit(&self, record: &SwapRecord) -> Result<SwapState> {
        match record.swap_type {
            SwapType::Native => {
                let address = self.htlc_address(record)?;
                match self.monitor.check_funding(address).await {
                    FundingCheck::Funded(utxo) => {
                        let updated = self
                            .store
                            .update_if_state(
                                &record.htlc_hash,
                                SwapState::BtcHtlcCreated,
                                SwapState::BtcDepositDetected,
                                |r| apply_funding(r, &utxo),
                            )
                            .await?;
                        tracing::info!(
                            htlc_hash = %record.htlc_hash,
                            txid = %utxo.txid,
                            amount = utxo.amount,
                            "HTLC funding detected"
                        );
                        Ok(updated.state)
                    }
                    FundingCheck::NotFunded => Ok(record.state),
                    FundingCheck::ProviderError(msg) => Err(SwapError::Provider(msg)),
                }
            }
            SwapType::Lightning => {
                let lnd = self.lightning()?;
                let hash = parse_hash_lock(&record.htlc_hash)?;
                let status = lnd.get_invoice(&hash).await?;
                match status.state {
                    InvoiceState::Accepted | InvoiceState::Settled => {
                        let updated = self
                            .store
                            .update_if_state(
                                &record.htlc_hash,
                                SwapState::BtcHtlcCreated,
                                SwapState::BtcDepositDetected,
                                |r| r.btc_funded_amount = Some(r.btc_amount),
                            )
                            .await?;
                        Ok(updated.state)
                    }
                    InvoiceState::Canceled => Err(SwapError::HtlcNotFunded(
                        "held invoice was canceled".to_string(),
                    )),
                    InvoiceState::Open => Ok(record.state),
                }
            }
        }
    }

    /// `BTC_DEPOSIT_DETECTED`: waits for the deposit to reach the required
    /// confirmation depth. A held invoice in `ACCEPTED` is already final.
    async fn watch_for_confirmation(&self, record: &SwapRecord) -> Result<SwapState> {
        match record.swap_type {
            SwapType::Native => {
                let address = self.htlc_address(record)?;
                match self.monitor.check_funding(address).await {
                    FundingCheck::Funded(utxo) => {
                        if utxo.confirmations < self.confirmations_required {
                            // Progress below the required depth still belongs
                            // on the record for anyone polling its status.
                            let depth = utxo.confirmations;
                            self.store
                                .update_fields(&record.htlc_hash, record.state, |r| {
                                    r.current_confirmations =
                                        r.current_confirmations.max(depth);
                                })
                                .await?;
                            return Ok(record.state);
                        }
                        let updated = self
                            .store
                            .update_if_state(
                                &record.htlc_hash,
                                SwapState::BtcDepositDetected,
                                SwapState::BtcDepositConfirmed,
                                |r| apply_funding(r, &utxo),
                            )
                            .await?;
                        tracing::info!(
                            htlc_hash = %record.htlc_hash,
                            confirmations = utxo.confirmations,
                            "HTLC funding confirmed"
                        );
                        Ok(updated.state)
                    }
                    // A detected deposit that vanished means a reorg or an
                    // unexpected spend; the swap cannot proceed safely.
                    FundingCheck::NotFunded => Err(SwapError::HtlcNotFunded(
                        self.htlc_address(record)?.to_string(),
                    )),
                    FundingCheck::ProviderError(msg) => Err(SwapError::Provider(msg)),
                }
            }
            SwapType::Lightning => {
                let updated = self
                    .store
                    .update_if_state(
                        &record.htlc_hash,
                        SwapState::BtcDepositDetected,
                        SwapState::BtcDepositConfirmed,
                        |_| {},
                    )
                    .await?;
                Ok(updated.state)
            }
        }
    }

    /// `SECRET_REVEALED`: broadcasts the redeem to the maker's address
    /// (native) or waits for the invoice settlement to land (lightning),
    /// then completes.
    ///
    /// Like the reclaim, the redeem is signed first, its txid committed to
    /// the record, and only then broadcast, so two racing drivers can never
    /// both reach the network.
    async fn complete_swap(&self, record: &SwapRecord) -> Result<SwapState> {
        if record.swap_type == SwapType::Lightning {
            let lnd = self.lightning()?;
            let hash = parse_hash_lock(&record.htlc_hash)?;
            if !lnd.get_invoice(&hash).await?.settled {
                return Ok(record.state);
            }
            let updated = self
                .store
                .update_if_state(
                    &record.htlc_hash,
                    SwapState::SecretRevealed,
                    SwapState::SwapCompleted,
                    |_| {},
                )
                .await?;
            tracing::info!(htlc_hash = %record.htlc_hash, "swap completed");
            return Ok(updated.state);
        }

        let address = self.htlc_address(record)?.to_string();
        let script_hex = record
            .btc_htlc_script
            .as_deref()
            .ok_or_else(|| SwapError::MissingField("btc_htlc_script".to_string()))?;
        let script_bytes = hex::decode(script_hex)
            .map_err(|_| SwapError::TxBuild("stored redeem script is not hex".to_string()))?;
        let script = ScriptBuf::from_bytes(script_bytes);
        let secret_hex = record
            .secret
            .as_deref()
            .ok_or_else(|| SwapError::MissingField("secret".to_string()))?;
        let secret = parse_hash_lock(secret_hex)?;

        let prepared = match self
            .engine
            .prepare_redeem(&address, &script, &secret, &record.btc_recipient_address)
            .await
        {
            Ok(prepared) => prepared,
            // The maker already swept the output with the disclosed secret;
            // the swap is complete without a redeem of our own.
            Err(SwapError::HtlcNotFunded(_)) => {
                let updated = self
                    .store
                    .update_if_state(
                        &record.htlc_hash,
                        SwapState::SecretRevealed,
                        SwapState::SwapCompleted,
                        |_| {},
                    )
                    .await?;
                self.append_note(&record.htlc_hash, "htlc_already_swept", "maker redeemed the HTLC output directly")
                    .await;
                return Ok(updated.state);
            }
            Err(e) => return Err(e),
        };

        let txid = prepared.txid.clone();
        let updated = self
            .store
            .update_if_state(
                &record.htlc_hash,
                SwapState::SecretRevealed,
                SwapState::SwapCompleted,
                |r| r.claim_tx_hash = Some(txid.clone()),
            )
            .await?;

        if let Err(e) = self.engine.broadcast(&prepared).await {
            tracing::error!(htlc_hash = %record.htlc_hash, error = %e, "redeem broadcast failed");
            self.append_note(
                &record.htlc_hash,
                "broadcast_failed",
                &format!("{}; raw tx: {}", e, prepared.raw_hex),
            )
            .await;
        } else {
            tracing::info!(
                htlc_hash = %record.htlc_hash,
                txid = %prepared.txid,
                "redeem broadcast, swap completed"
            );
        }
        Ok(updated.state)
    }

    /// `SWAP_TIMEOUT`: recovers the resolver's funds.
    ///
    /// The reclaim transaction is signed first, its txid committed to the
    /// record, and only then broadcast. A broadcast failure leaves the
    /// record in `SWAP_RECLAIMED` pointing at the signed transaction, with
    /// the raw hex preserved in the event log for manual rebroadcast.
    async fn reclaim(&self, record: &SwapRecord) -> Result<SwapState> {
        if record.swap_type == SwapType::Lightning {
            // An unsettled held invoice never moved the resolver's funds;
            // the node cancels it at expiry.
            let updated = self
                .store
                .update_if_state(
                    &record.htlc_hash,
                    SwapState::SwapTimeout,
                    SwapState::SwapReclaimed,
                    |_| {},
                )
                .await?;
            self.append_note(&record.htlc_hash, "invoice_abandoned", "held invoice left to expire at the node")
                .await;
            return Ok(updated.state);
        }

        let (address, script) = match (&record.btc_htlc_address, &record.btc_htlc_script) {
            (Some(addr), Some(script_hex)) => {
                let bytes = hex::decode(script_hex)
                    .map_err(|_| SwapError::TxBuild("stored redeem script is not hex".to_string()))?;
                (addr.clone(), ScriptBuf::from_bytes(bytes))
            }
            // Timed out before the HTLC existed; nothing to recover.
            _ => {
                let updated = self
                    .store
                    .update_if_state(
                        &record.htlc_hash,
                        SwapState::SwapTimeout,
                        SwapState::SwapFailed,
                        |_| {},
                    )
                    .await?;
                self.append_note(&record.htlc_hash, "nothing_to_reclaim", "timed out before the Bitcoin leg was funded")
                    .await;
                return Ok(updated.state);
            }
        };

        let prepared = match self
            .engine
            .prepare_reclaim(
                &address,
                &script,
                u64::from(record.timeout_block),
                &self.resolver_address,
            )
            .await
        {
            Ok(prepared) => prepared,
            // Wall-clock deadline passed but the locktime height has not;
            // stay in SWAP_TIMEOUT and retry on the next poll.
            Err(SwapError::TimeoutNotReached { current, timeout }) => {
                tracing::debug!(
                    htlc_hash = %record.htlc_hash,
                    current,
                    timeout,
                    "reclaim waiting for timeout height"
                );
                return Ok(record.state);
            }
            // The HTLC was already swept. If the maker redeemed, the secret
            // is on-chain and the resolver's EVM claim covers the loss; the
            // swap itself cannot be recovered here.
            Err(SwapError::HtlcNotFunded(_)) => {
                let updated = self
                    .store
                    .update_if_state(
                        &record.htlc_hash,
                        SwapState::SwapTimeout,
                        SwapState::SwapFailed,
                        |_| {},
                    )
                    .await?;
                self.append_note(&record.htlc_hash, "nothing_to_reclaim", "HTLC output already spent")
                    .await;
                return Ok(updated.state);
            }
            Err(e) => return Err(e),
        };

        let txid = prepared.txid.clone();
        let updated = self
            .store
            .update_if_state(
                &record.htlc_hash,
                SwapState::SwapTimeout,
                SwapState::SwapReclaimed,
                |r| r.claim_tx_hash = Some(txid.clone()),
            )
            .await?;

        if let Err(e) = self.engine.broadcast(&prepared).await {
            tracing::error!(htlc_hash = %record.htlc_hash, error = %e, "reclaim broadcast failed");
            self.append_note(
                &record.htlc_hash,
                "broadcast_failed",
                &format!("{}; raw tx: {}", e, prepared.raw_hex),
            )
            .await;
        } else {
            tracing::info!(
                htlc_hash = %record.htlc_hash,
                txid = %prepared.txid,
                "reclaim broadcast"
            );
        }
        Ok(updated.state)
    }

    // ------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------

    async fn lock_for(&self, htlc_hash: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(htlc_hash.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn htlc_address<'a>(&self, record: &'a SwapRecord) -> Result<&'a str> {
        record
            .btc_htlc_address
            .as_deref()
            .ok_or_else(|| SwapError::MissingField("btc_htlc_address".to_string()))
    }

    fn lightning(&self) -> Result<&LndClient> {
        self.lnd
            .as_ref()
            .ok_or_else(|| SwapError::Lightning("no lightning node configured".to_string()))
    }

    async fn append_note(&self, htlc_hash: &str, event_type: &str, details: &str) {
        self.store
            .append_event(SwapEvent {
                htlc_hash: htlc_hash.to_string(),
                event_type: event_type.to_string(),
                from_state: None,
                to_state: None,
                details: Some(details.to_string()),
                created_at: Utc::now(),
            })
            .await;
    }
}

fn apply_funding(record: &mut SwapRecord, utxo: &FundingUtxo) {
    record.btc_tx_id = Some(utxo.txid.clone());
    record.btc_tx_vout = Some(utxo.vout);
    record.btc_funded_amount = Some(utxo.amount);
    record.btc_block_height = utxo.block_height;
    // Observed depth never goes backwards, even across a shallow reorg.
    record.current_confirmations = record.current_confirmations.max(utxo.confirmations);
}
