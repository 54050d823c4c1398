//! Bitcoin chain-data and broadcast provider client
//!
//! Thin REST client for an Esplora-style provider. The coordinator needs
//! exactly four calls from the outside world: unspent outputs for an
//! address, the current tip height, a raw transaction by id, and
//! transaction broadcast. Everything else the core does is computed
//! locally.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{Result, SwapError};

// ============================================================================
// RESPONSE STRUCTURES
// ============================================================================

/// Confirmation status of a provider-reported output.
#[derive(Debug, Clone, Deserialize)]
pub struct UtxoStatus {
    /// Whether the containing transaction is confirmed in a block
    pub confirmed: bool,
    /// Block height of the containing transaction, if confirmed
    pub block_height: Option<u64>,
}

/// Unspent transaction output as reported by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderUtxo {
    /// Transaction ID
    pub txid: String,
    /// Output index
    pub vout: u32,
    /// Value in satoshis
    pub value: u64,
    /// Confirmation status
    pub status: UtxoStatus,
}

// ============================================================================
// PROVIDER CLIENT
// ============================================================================

/// Esplora-style REST provider client.
#[derive(Debug, Clone)]
pub struct EsploraProvider {
    client: reqwest::Client,
    base_url: String,
}

impl EsploraProvider {
    /// Creates a new provider client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the provider (no trailing slash required)
    /// * `timeout_ms` - Per-request timeout in milliseconds
    ///
    /// # Returns
    ///
    /// * `Ok(EsploraProvider)` - Successfully created client
    /// * `Err(SwapError)` - Failed to build the HTTP client
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .no_proxy() // Avoid macOS system-configuration issues in tests
            .build()
            .map_err(|e| SwapError::Provider(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetches all unspent outputs for an address.
    pub async fn get_utxos(&self, address: &str) -> Result<Vec<ProviderUtxo>> {
        let url = format!("{}/address/{}/utxo", self.base_url, address);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SwapError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SwapError::Provider(format!(
                "utxo query for {} returned {}",
                address,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SwapError::Provider(e.to_string()))
    }

    /// Fetches the current chain tip height.
    pub async fn get_tip_height(&self) -> Result<u64> {
        let url = format!("{}/blocks/tip/height", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SwapError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SwapError::Provider(format!(
                "tip height query returned {}",
                response.status()
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| SwapError::Provider(e.to_string()))?;
        text.trim()
            .parse()
            .map_err(|_| SwapError::Provider(format!("unparseable tip height '{}'", text)))
    }

    /// Fetches a raw transaction by id.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<u8>)` - Consensus-serialized transaction bytes
    /// * `Err(SwapError::Provider)` - Request failed or response was not hex
    pub async fn get_raw_tx(&self, txid: &str) -> Result<Vec<u8>> {
        let url = format!("{}/tx/{}/hex", self.base_url, txid);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SwapError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SwapError::Provider(format!(
                "raw tx query for {} returned {}",
                txid,
                response.status()
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| SwapError::Provider(e.to_string()))?;
        hex::decode(text.trim())
            .map_err(|_| SwapError::Provider(format!("provider returned non-hex tx for {}", txid)))
    }

    /// Broadcasts a raw transaction.
    ///
    /// A rejection is surfaced verbatim as `BroadcastFailed` with the
    /// provider's error text; retrying is the state machine's decision, not
    /// this client's.
    ///
    /// # Arguments
    ///
    /// * `raw_tx_hex` - Hex-encoded transaction
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Transaction ID assigned by the network
    /// * `Err(SwapError::BroadcastFailed)` - Provider rejected the transaction
    pub async fn broadcast(&self, raw_tx_hex: &str) -> Result<String> {
        let url = format!("{}/tx", self.base_url);
        let response = self
            .client
            .post(&url)
            .body(raw_tx_hex.to_string())
            .send()
            .await
            .map_err(|e| SwapError::BroadcastFailed(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SwapError::BroadcastFailed(error_text));
        }

        let txid = response
            .text()
            .await
            .map_err(|e| SwapError::BroadcastFailed(e.to_string()))?;
        Ok(txid.trim().to_string())
    }
}
