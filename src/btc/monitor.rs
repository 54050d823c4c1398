//! UTXO Monitor
//!
//! Watches an HTLC address for its funding output and reports confirmation
//! depth against the current chain tip. Monitoring is best-effort and
//! polled: provider failures are reported as an explicit variant so the
//! caller can absorb them and retry on the next pass instead of failing a
//! swap over a transient outage.

use serde::{Deserialize, Serialize};

use crate::btc::provider::{EsploraProvider, ProviderUtxo};

// ============================================================================
// FUNDING STATUS
// ============================================================================

/// The selected funding output of an HTLC address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingUtxo {
    /// Funding transaction ID
    pub txid: String,
    /// Output index within the funding transaction
    pub vout: u32,
    /// Funded amount in satoshis
    pub amount: u64,
    /// Block height of the funding transaction, if confirmed
    pub block_height: Option<u64>,
    /// Confirmation depth relative to the current tip (0 while unconfirmed)
    pub confirmations: u64,
}

/// Result of one funding check against the provider.
///
/// Tagged explicitly so callers distinguish "the address is not funded"
/// from "the provider could not be reached" instead of relying on a
/// nullable shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingCheck {
    /// A funding output exists
    Funded(FundingUtxo),
    /// No unspent output at the address
    NotFunded,
    /// The provider failed; nothing can be said about the address
    ProviderError(String),
}

/// Flattened funding status, the wire shape callers of the status surface
/// have always received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcFundingStatus {
    /// Whether a funding output exists
    pub funded: bool,
    /// Confirmation depth of the funding output (0 if unfunded/unconfirmed)
    pub confirmations: u64,
    /// Funded amount in satoshis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    /// Funding transaction ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    /// Output index within the funding transaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vout: Option<u32>,
}

impl FundingCheck {
    /// Flattens this check into the wire shape.
    ///
    /// Provider errors degrade to `funded: false`; a poll loop treats that
    /// identically to an unfunded address and simply asks again later.
    pub fn to_status(&self) -> HtlcFundingStatus {
        match self {
            FundingCheck::Funded(utxo) => HtlcFundingStatus {
                funded: true,
                confirmations: utxo.confirmations,
                amount: Some(utxo.amount),
                txid: Some(utxo.txid.clone()),
                vout: Some(utxo.vout),
            },
            FundingCheck::NotFunded | FundingCheck::ProviderError(_) => HtlcFundingStatus {
                funded: false,
                confirmations: 0,
                amount: None,
                txid: None,
                vout: None,
            },
        }
    }
}

// ============================================================================
// MONITOR
// ============================================================================

/// Polls the chain-data provider for HTLC funding status.
#[derive(Debug, Clone)]
pub struct UtxoMonitor {
    provider: EsploraProvider,
}

impl UtxoMonitor {
    /// Creates a monitor over the given provider.
    pub fn new(provider: EsploraProvider) -> Self {
        Self { provider }
    }

    /// Checks the funding status of an HTLC address.
    ///
    /// Selects the earliest-confirmed unspent output as "the" funding
    /// output (ties broken by lowest block height); if nothing is confirmed
    /// yet, an unconfirmed output is reported with zero confirmations.
    ///
    /// # Arguments
    ///
    /// * `address` - HTLC funding address to check
    pub async fn check_funding(&self, address: &str) -> FundingCheck {
        let utxos = match self.provider.get_utxos(address).await {
            Ok(utxos) => utxos,
            Err(e) => {
                tracing::debug!("funding check for {} failed: {}", address, e);
                return FundingCheck::ProviderError(e.to_string());
            }
        };

        let best = match select_funding_utxo(&utxos) {
            Some(utxo) => utxo,
            None => return FundingCheck::NotFunded,
        };

        let confirmations = if best.status.confirmed {
            match self.provider.get_tip_height().await {
                // A lagging provider can report a tip behind the funding
                // height; that counts as zero confirmations, not one.
                Ok(tip) => best
                    .status
                    .block_height
                    .map(|h| if tip < h { 0 } else { tip - h + 1 })
                    .unwrap_or(0),
                Err(e) => {
                    tracing::debug!("tip height query failed: {}", e);
                    return FundingCheck::ProviderError(e.to_string());
                }
            }
        } else {
            0
        };

        FundingCheck::Funded(FundingUtxo {
            txid: best.txid.clone(),
            vout: best.vout,
            amount: best.value,
            block_height: best.status.block_height,
            confirmations,
        })
    }

    /// Fetches the current chain tip height.
    pub async fn tip_height(&self) -> crate::error::Result<u64> {
        self.provider.get_tip_height().await
    }
}

/// Selects the funding output from the provider's UTXO list.
///
/// Confirmed outputs win over unconfirmed ones; among confirmed outputs the
/// lowest block height wins. With no confirmed output the first unconfirmed
/// one is taken.
fn select_funding_utxo(utxos: &[ProviderUtxo]) -> Option<&ProviderUtxo> {
    let confirmed = utxos
        .iter()
        .filter(|u| u.status.confirmed)
        .min_by_key(|u| u.status.block_height.unwrap_or(u64::MAX));
    confirmed.or_else(|| utxos.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btc::provider::UtxoStatus;

    fn utxo(txid: &str, confirmed: bool, height: Option<u64>) -> ProviderUtxo {
        ProviderUtxo {
            txid: txid.to_string(),
            vout: 0,
            value: 100_000,
            status: UtxoStatus {
                confirmed,
                block_height: height,
            },
        }
    }

    #[test]
    fn earliest_confirmed_utxo_wins() {
        let utxos = vec![
            utxo("later", true, Some(120)),
            utxo("earlier", true, Some(100)),
            utxo("mempool", false, None),
        ];
        let best = select_funding_utxo(&utxos).unwrap();
        assert_eq!(best.txid, "earlier");
    }

    #[test]
    fn unconfirmed_utxo_is_reported_when_nothing_confirmed() {
        let utxos = vec![utxo("mempool", false, None)];
        let best = select_funding_utxo(&utxos).unwrap();
        assert_eq!(best.txid, "mempool");
    }

    #[test]
    fn empty_utxo_set_is_unfunded() {
        assert!(select_funding_utxo(&[]).is_none());
    }

    #[test]
    fn provider_error_flattens_to_unfunded_status() {
        let status = FundingCheck::ProviderError("timeout".to_string()).to_status();
        assert!(!status.funded);
        assert_eq!(status.confirmations, 0);
        assert!(status.txid.is_none());
    }
}
