//! Swap Lifecycle Model
//!
//! Core data model for cross-chain swaps: the lifecycle state enum, the
//! fixed transition table, and the swap record persisted by the store.
//! The state machine driving records through the table lives in
//! [`machine`], authorized secret disclosure in [`reveal`].

pub mod machine;
pub mod reveal;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// SWAP STATES
// ============================================================================

/// Lifecycle states of a cross-chain swap.
///
/// Serialized in SCREAMING_SNAKE form so stored records and API payloads
/// match across deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapState {
    #[serde(rename = "CREATED")]
    Created,
    #[serde(rename = "WAITING_FOR_DEPOSIT")]
    WaitingForDeposit,
    #[serde(rename = "EVM_DEPOSIT_DETECTED")]
    EvmDepositDetected,
    #[serde(rename = "EVM_DEPOSIT_CONFIRMED")]
    EvmDepositConfirmed,
    #[serde(rename = "BTC_HTLC_CREATED")]
    BtcHtlcCreated,
    #[serde(rename = "BTC_DEPOSIT_DETECTED")]
    BtcDepositDetected,
    #[serde(rename = "BTC_DEPOSIT_CONFIRMED")]
    BtcDepositConfirmed,
    #[serde(rename = "SECRET_REQUESTED")]
    SecretRequested,
    #[serde(rename = "SECRET_REVEALED")]
    SecretRevealed,
    #[serde(rename = "SWAP_COMPLETED")]
    SwapCompleted,
    #[serde(rename = "SWAP_FAILED")]
    SwapFailed,
    #[serde(rename = "SWAP_TIMEOUT")]
    SwapTimeout,
    #[serde(rename = "SWAP_RECLAIMED")]
    SwapReclaimed,
}

impl SwapState {
    /// Returns the wire string for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapState::Created => "CREATED",
            SwapState::WaitingForDeposit => "WAITING_FOR_DEPOSIT",
            SwapState::EvmDepositDetected => "EVM_DEPOSIT_DETECTED",
            SwapState::EvmDepositConfirmed => "EVM_DEPOSIT_CONFIRMED",
            SwapState::BtcHtlcCreated => "BTC_HTLC_CREATED",
            SwapState::BtcDepositDetected => "BTC_DEPOSIT_DETECTED",
            SwapState::BtcDepositConfirmed => "BTC_DEPOSIT_CONFIRMED",
            SwapState::SecretRequested => "SECRET_REQUESTED",
            SwapState::SecretRevealed => "SECRET_REVEALED",
            SwapState::SwapCompleted => "SWAP_COMPLETED",
            SwapState::SwapFailed => "SWAP_FAILED",
            SwapState::SwapTimeout => "SWAP_TIMEOUT",
            SwapState::SwapReclaimed => "SWAP_RECLAIMED",
        }
    }

    /// Whether no further transitions can leave this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapState::SwapCompleted | SwapState::SwapFailed | SwapState::SwapReclaimed
        )
    }

    /// Checks the fixed transition table.
    ///
    /// Timeout and failure are reachable from every non-terminal state;
    /// forward progress follows the happy path one step at a time.
    pub fn can_transition_to(&self, next: SwapState) -> bool {
        use SwapState::*;

        if self.is_terminal() {
            return false;
        }
        // Any active swap can fail; any active swap except a timed-out one
        // can time out.
        if next == SwapFailed {
            return true;
        }
        if next == SwapTimeout {
            return *self != SwapTimeout;
        }

        matches!(
            (self, next),
            (Created, WaitingForDeposit)
                | (WaitingForDeposit, EvmDepositDetected)
                | (EvmDepositDetected, EvmDepositConfirmed)
                | (EvmDepositConfirmed, BtcHtlcCreated)
                | (BtcHtlcCreated, BtcDepositDetected)
                | (BtcDepositDetected, BtcDepositConfirmed)
                | (BtcDepositConfirmed, SecretRequested)
                | (BtcDepositConfirmed, SecretRevealed)
                | (SecretRequested, SecretRevealed)
                | (SecretRevealed, SwapCompleted)
                | (SwapTimeout, SwapReclaimed)
        )
    }
}

impl std::fmt::Display for SwapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// BITCOIN LEG
// ============================================================================

/// Which Bitcoin-side mechanism a swap uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapType {
    /// On-chain P2SH HTLC
    Native,
    /// Held Lightning invoice keyed by the hash lock
    Lightning,
}

// ============================================================================
// SWAP RECORD
// ============================================================================

/// Full persisted state of one swap, keyed by its hash lock.
///
/// Field names are the persisted wire contract and must not be renamed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRecord {
    /// Stable identifier
    pub id: String,
    /// 0x-prefixed SHA-256 hash lock; primary lookup key
    pub htlc_hash: String,
    /// Same value as `htlc_hash`, kept under its historical column name
    pub secret_hash: String,
    /// Current lifecycle state
    pub state: SwapState,
    /// Bitcoin-side mechanism
    pub swap_type: SwapType,
    /// Escrowed amount on the source chain, as a decimal string
    pub amount: String,
    /// Source chain label
    pub from_chain: String,
    /// Destination chain label
    pub to_chain: String,
    /// Asset locked on the source chain
    pub from_token: String,
    /// Asset delivered on the destination chain
    pub to_token: String,
    /// Maker address on the EVM chain; the only party the secret may go to
    pub user_address: String,
    /// EVM chain id of the source escrow
    pub evm_chain_id: u64,
    /// Escrow contract holding the EVM-side lock
    pub evm_escrow_address: Option<String>,
    /// Transaction hash of the detected EVM deposit
    pub evm_tx_hash: Option<String>,
    /// Block number at which the EVM deposit reached finality
    pub evm_block_number: Option<u64>,
    /// Bitcoin amount in satoshis
    pub btc_amount: u64,
    /// Maker's Bitcoin address (redeem destination)
    pub btc_recipient_address: String,
    /// P2SH funding address of the HTLC, once created
    pub btc_htlc_address: Option<String>,
    /// Hex-encoded redeem script, once created
    pub btc_htlc_script: Option<String>,
    /// Block height after which the resolver may reclaim
    pub timeout_block: u32,
    /// Funding transaction observed at the HTLC address
    pub btc_tx_id: Option<String>,
    /// Output index of the funding UTXO
    pub btc_tx_vout: Option<u32>,
    /// Value of the funding UTXO in satoshis
    pub btc_funded_amount: Option<u64>,
    /// Block height of the funding transaction
    pub btc_block_height: Option<u64>,
    /// Confirmation depth required before the deposit counts as final
    pub confirmations_required: u64,
    /// Deepest confirmation count observed; never decreases
    pub current_confirmations: u64,
    /// Redeem or reclaim transaction, once broadcast is decided
    pub claim_tx_hash: Option<String>,
    /// BOLT11 payment request for lightning swaps
    pub lightning_invoice: Option<String>,
    /// Payment hash of the held invoice; always equals `htlc_hash`
    pub lightning_payment_hash: Option<String>,
    /// Settlement preimage, populated when a lightning swap settles
    pub lightning_preimage: Option<String>,
    /// 0x-prefixed secret, populated only after authorized disclosure
    pub secret: Option<String>,
    /// When the secret was disclosed; set at most once
    pub secret_revealed_at: Option<DateTime<Utc>>,
    /// Who the secret was disclosed to
    pub secret_revealed_to: Option<String>,
    /// Human-readable failure reason, set on `SWAP_FAILED`
    pub error_message: Option<String>,
    /// Structured failure detail, set on `SWAP_FAILED`
    pub error_details: Option<serde_json::Value>,
    /// Wall-clock deadline for the whole swap
    pub expires_at: DateTime<Utc>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last state change; untouched by rejected transitions
    pub updated_at: DateTime<Utc>,
}

impl SwapRecord {
    /// Whether the swap has passed its wall-clock deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ============================================================================
// TESTS
// ============================================================================
