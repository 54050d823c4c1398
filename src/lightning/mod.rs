//! Lightning Leg Adapter
//!
//! Minimal LND REST client for the held-invoice (HODL) alternative to the
//! on-chain Bitcoin leg. A held invoice is created with the swap's hash
//! lock as its payment hash: the payer's HTLC is accepted but not settled
//! until the coordinator supplies the preimage, which ties invoice
//! settlement to the same secret that unlocks the EVM escrow.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::btc::script::sha256;
use crate::config::LightningConfig;
use crate::error::{Result, SwapError};

// ============================================================================
// INVOICE STRUCTURES
// ============================================================================

/// Lifecycle state of an LND invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceState {
    /// Created, no payment yet
    Open,
    /// Payment arrived and is being held (the HODL state)
    Accepted,
    /// Preimage released, payment settled
    Settled,
    /// Invoice canceled or expired
    Canceled,
}

/// A held invoice created for a swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeldInvoice {
    /// BOLT11 payment request
    pub payment_request: String,
    /// Payment hash (0x-prefixed hex); equals the swap's hash lock
    pub payment_hash: String,
    /// Unix timestamp when the invoice expires
    pub expires_at: i64,
    /// Invoice amount in satoshis
    pub amount_sats: u64,
}

/// Status snapshot of an invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceStatus {
    /// Current lifecycle state
    pub state: InvoiceState,
    /// Whether the invoice is settled
    pub settled: bool,
    /// Whether the invoice is canceled
    pub canceled: bool,
    /// Unix timestamp when the invoice expires
    pub expires_at: i64,
}

// ============================================================================
// LND REST TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct AddHoldInvoiceRequest {
    hash: String,
    value: String,
    memo: String,
    expiry: String,
}

#[derive(Debug, Deserialize)]
struct AddHoldInvoiceResponse {
    payment_request: String,
}

#[derive(Debug, Deserialize)]
struct LookupInvoiceResponse {
    state: String,
    settled: Option<bool>,
    creation_date: Option<String>,
    expiry: Option<String>,
}

#[derive(Debug, Serialize)]
struct SettleInvoiceRequest {
    preimage: String,
}

// ============================================================================
// CLIENT
// ============================================================================

/// LND REST client for held invoices.
#[derive(Debug, Clone)]
pub struct LndClient {
    client: reqwest::Client,
    rest_url: String,
    macaroon_hex: String,
    invoice_expiry_secs: u64,
}

impl LndClient {
    /// Creates a new client from the lightning section of the config.
    pub fn new(config: &LightningConfig, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .no_proxy() // Avoid macOS system-configuration issues in tests
            .build()
            .map_err(|e| SwapError::Lightning(e.to_string()))?;

        Ok(Self {
            client,
            rest_url: config.rest_url.trim_end_matches('/').to_string(),
            macaroon_hex: config.macaroon_hex.clone(),
            invoice_expiry_secs: config.invoice_expiry_secs,
        })
    }

    /// Creates a held invoice keyed by the swap's hash lock.
    ///
    /// # Arguments
    ///
    /// * `payment_hash` - The swap's 32-byte hash lock
    /// * `amount_sats` - Invoice amount in satoshis
    /// * `memo` - Human-readable description
    ///
    /// # Returns
    ///
    /// * `Ok(HeldInvoice)` - Created invoice with its BOLT11 request
    /// * `Err(SwapError::Lightning)` - Node rejected the request
    pub async fn create_held_invoice(
        &self,
        payment_hash: &[u8; 32],
        amount_sats: u64,
        memo: &str,
    ) -> Result<HeldInvoice> {
        let request = AddHoldInvoiceRequest {
            hash: STANDARD.encode(payment_hash),
            value: amount_sats.to_string(),
            memo: memo.to_string(),
            expiry: self.invoice_expiry_secs.to_string(),
        };

        let url = format!("{}/v2/invoices/hodl", self.rest_url);
        let response = self
            .client
            .post(&url)
            .header("Grpc-Metadata-macaroon", &self.macaroon_hex)
            .json(&request)
            .send()
            .await
            .map_err(|e| SwapError::Lightning(e.to_string()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SwapError::Lightning(format!(
                "hold invoice creation failed: {}",
                text
            )));
        }

        let body: AddHoldInvoiceResponse = response
            .json()
            .await
            .map_err(|e| SwapError::Lightning(e.to_string()))?;

        Ok(HeldInvoice {
            payment_request: body.payment_request,
            payment_hash: format!("0x{}", hex::encode(payment_hash)),
            expires_at: chrono::Utc::now().timestamp() + self.invoice_expiry_secs as i64,
            amount_sats,
        })
    }

    /// Looks up the status of an invoice by payment hash.
    pub async fn get_invoice(&self, payment_hash: &[u8; 32]) -> Result<InvoiceStatus> {
        let url = format!(
            "{}/v1/invoice/{}",
            self.rest_url,
            hex::encode(payment_hash)
        );
        let response = self
            .client
            .get(&url)
            .header("Grpc-Metadata-macaroon", &self.macaroon_hex)
            .send()
            .await
            .map_err(|e| SwapError::Lightning(e.to_string()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SwapError::Lightning(format!(
                "invoice lookup failed: {}",
                text
            )));
        }

        let body: LookupInvoiceResponse = response
            .json()
            .await
            .map_err(|e| SwapError::Lightning(e.to_string()))?;

        let state = match body.state.as_str() {
            "ACCEPTED" => InvoiceState::Accepted,
            "SETTLED" => InvoiceState::Settled,
            "CANCELED" => InvoiceState::Canceled,
            _ => InvoiceState::Open,
        };

        let creation = body
            .creation_date
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);
        let expiry = body.expiry.and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);

        Ok(InvoiceStatus {
            state,
            settled: body.settled.unwrap_or(state == InvoiceState::Settled),
            canceled: state == InvoiceState::Canceled,
            expires_at: creation + expiry,
        })
    }

    /// Settles a held invoice with the secret preimage.
    ///
    /// The preimage is verified against the expected payment hash before
    /// anything leaves the process; a mismatch is a protocol violation, not
    /// a node error.
    ///
    /// # Arguments
    ///
    /// * `preimage` - 32-byte secret
    /// * `expected_hash` - The invoice's payment hash (the swap's hash lock)
    pub async fn settle_held_invoice(
        &self,
        preimage: &[u8; 32],
        expected_hash: &[u8; 32],
    ) -> Result<()> {
        if sha256(preimage) != *expected_hash {
            return Err(SwapError::InvalidPreimage);
        }

        let request = SettleInvoiceRequest {
            preimage: STANDARD.encode(preimage),
        };

        let url = format!("{}/v2/invoices/settle", self.rest_url);
        let response = self
            .client
            .post(&url)
            .header("Grpc-Metadata-macaroon", &self.macaroon_hex)
            .json(&request)
            .send()
            .await
            .map_err(|e| SwapError::Lightning(e.to_string()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SwapError::Lightning(format!(
                "invoice settle failed: {}",
                text
            )));
        }

        Ok(())
    }
}
