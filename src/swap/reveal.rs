//! Secret Disclosure
//!
//! The coordinator holds each swap's secret from creation until the maker
//! has locked funds on both chains. Disclosure is the point of no return:
//! once the maker knows the secret they can redeem the Bitcoin HTLC, and
//! the resolver can use the on-chain reveal to claim the EVM escrow. The
//! gate therefore enforces requester identity, swap readiness, expiry, and
//! one-time release before a secret ever leaves the process.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::btc::script::sha256;
use crate::error::{Result, SwapError};
use crate::lightning::LndClient;
use crate::storage::{SwapEvent, SwapStore};
use crate::swap::{SwapState, SwapType};

// ============================================================================
// SECRET VAULT
// ============================================================================

struct VaultEntry {
    secret: [u8; 32],
    revealed: bool,
}

impl std::fmt::Debug for VaultEntry {
    // Never print the secret material
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultEntry")
            .field("revealed", &self.revealed)
            .finish()
    }
}

/// In-process store of undisclosed secrets, keyed by hash lock.
#[derive(Debug, Clone, Default)]
pub struct SecretVault {
    entries: Arc<RwLock<HashMap<String, VaultEntry>>>,
}

impl SecretVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly generated secret under its hash lock.
    pub async fn register(&self, htlc_hash: &str, secret: [u8; 32]) {
        let mut entries = self.entries.write().await;
        entries.insert(
            htlc_hash.to_string(),
            VaultEntry {
                secret,
                revealed: false,
            },
        );
    }

    /// Marks the secret revealed, failing if it already was.
    async fn take_once(&self, htlc_hash: &str) -> Result<[u8; 32]> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(htlc_hash)
            .ok_or_else(|| SwapError::SwapNotFound(htlc_hash.to_string()))?;
        if entry.revealed {
            return Err(SwapError::AlreadyRevealed);
        }
        entry.revealed = true;
        Ok(entry.secret)
    }
}

// ============================================================================
// REVEAL GATE
// ============================================================================

/// Response returned to an authorized secret request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RevealedSecret {
    /// 0x-prefixed hash lock the secret belongs to
    pub htlc_hash: String,
    /// 0x-prefixed 32-byte preimage
    pub secret: String,
    /// Swap state after disclosure
    pub state: SwapState,
}

/// Enforces the disclosure preconditions and performs the one-time release.
#[derive(Debug, Clone)]
pub struct RevealGate {
    store: SwapStore,
    vault: SecretVault,
    lnd: Option<LndClient>,
}

impl RevealGate {
    pub fn new(store: SwapStore, vault: SecretVault, lnd: Option<LndClient>) -> Self {
        Self { store, vault, lnd }
    }

    /// Records that the maker asked for the secret before it was released.
    ///
    /// Optional step: a reveal from `BTC_DEPOSIT_CONFIRMED` is equally
    /// valid, but recording the request first gives the audit trail a
    /// timestamp for when the maker signalled intent.
    pub async fn request_secret(&self, htlc_hash: &str, requester: &str) -> Result<()> {
        let record = self.store.get(htlc_hash).await?;
        self.authorize(&record.user_address, requester)?;

        self.store
            .update_if_state(
                htlc_hash,
                SwapState::BtcDepositConfirmed,
                SwapState::SecretRequested,
                |_| {},
            )
            .await?;
        Ok(())
    }

    /// Releases the secret to the maker, exactly once.
    ///
    /// Preconditions, checked in order:
    /// 1. The requester is the swap's maker.
    /// 2. The swap has not passed its deadline.
    /// 3. The secret has not been released before.
    /// 4. The Bitcoin leg is confirmed (`BTC_DEPOSIT_CONFIRMED` or
    ///    `SECRET_REQUESTED`).
    ///
    /// On success the swap moves to `SECRET_REVEALED`, the secret is stored
    /// on the record, a disclosure event (without the secret) is appended,
    /// and for lightning swaps the held invoice is settled.
    pub async fn reveal(&self, htlc_hash: &str, requester: &str) -> Result<RevealedSecret> {
        let record = self.store.get(htlc_hash).await?;
        self.authorize(&record.user_address, requester)?;

        if record.is_expired(chrono::Utc::now()) {
            return Err(SwapError::Expired);
        }
        if record.secret.is_some() {
            return Err(SwapError::AlreadyRevealed);
        }

        let from_state = match record.state {
            SwapState::BtcDepositConfirmed | SwapState::SecretRequested => record.state,
            SwapState::SecretRevealed | SwapState::SwapCompleted => {
                return Err(SwapError::AlreadyRevealed)
            }
            _ => return Err(SwapError::NotReady),
        };

        let secret = self.vault.take_once(htlc_hash).await?;

        // Internal consistency check: the vaulted secret must hash to the
        // lock the record was created under.
        let expected = parse_hash_lock(htlc_hash)?;
        if sha256(&secret) != expected {
            return Err(SwapError::InvalidPreimage);
        }

        let secret_hex = format!("0x{}", hex::encode(secret));
        let revealed_to = requester.to_string();
        let updated = self
            .store
            .update_if_state(htlc_hash, from_state, SwapState::SecretRevealed, |r| {
                r.secret = Some(secret_hex.clone());
                r.secret_revealed_at = Some(chrono::Utc::now());
                r.secret_revealed_to = Some(revealed_to.clone());
                if r.swap_type == SwapType::Lightning {
                    r.lightning_preimage = Some(secret_hex.clone());
                }
            })
            .await?;

        self.store
            .append_event(SwapEvent {
                htlc_hash: htlc_hash.to_string(),
                event_type: "secret_revealed".to_string(),
                from_state: Some(from_state),
                to_state: Some(SwapState::SecretRevealed),
                details: Some(format!("disclosed to {}", requester)),
                created_at: chrono::Utc::now(),
            })
            .await;
        tracing::info!(htlc_hash, requester, "secret disclosed");

        // Settling the held invoice is the lightning-side equivalent of the
        // maker redeeming the on-chain HTLC.
        if updated.swap_type == SwapType::Lightning {
            if let Some(lnd) = &self.lnd {
                lnd.settle_held_invoice(&secret, &expected).await?;
            }
        }

        Ok(RevealedSecret {
            htlc_hash: htlc_hash.to_string(),
            secret: format!("0x{}", hex::encode(secret)),
            state: SwapState::SecretRevealed,
        })
    }

    /// Returns the already-disclosed secret for the resolver's EVM-side
    /// claim.
    ///
    /// Only available after [`reveal`](Self::reveal) has run; the secret is
    /// public knowledge between the two parties from that point on, so no
    /// requester check applies here.
    pub async fn revealed_secret(&self, htlc_hash: &str) -> Result<RevealedSecret> {
        let record = self.store.get(htlc_hash).await?;
        match record.secret {
            Some(secret) => Ok(RevealedSecret {
                htlc_hash: htlc_hash.to_string(),
                secret,
                state: record.state,
            }),
            None => Err(SwapError::NotReady),
        }
    }

    fn authorize(&self, maker: &str, requester: &str) -> Result<()> {
        if !maker.eq_ignore_ascii_case(requester) {
            return Err(SwapError::Unauthorized);
        }
        Ok(())
    }
}

/// Parses a 0x-prefixed hash lock into its 32 raw bytes.
pub fn parse_hash_lock(htlc_hash: &str) -> Result<[u8; 32]> {
    let stripped = htlc_hash.strip_prefix("0x").unwrap_or(htlc_hash);
    let bytes = hex::decode(stripped)
        .map_err(|_| SwapError::MissingField("htlc_hash is not hex".to_string()))?;
    bytes
        .try_into()
        .map_err(|_| SwapError::MissingField("htlc_hash must be 32 bytes".to_string()))
}
