//! Swap Error Taxonomy
//!
//! Every user-visible failure in the coordinator carries a stable machine
//! code plus a human-readable message. The taxonomy groups errors into the
//! classes the state machine cares about: input validation, transient
//! provider failures, protocol violations, funds-path failures, and
//! authorization failures. Internal detail stays in the audit log and
//! tracing output; the reveal path only ever sees code + message.

use thiserror::Error;

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, SwapError>;

// ============================================================================
// ERROR CLASSIFICATION
// ============================================================================

/// Coarse failure class used by the state machine to decide whether an error
/// is absorbed (retried on the next poll) or recorded on the swap as terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing request input; reported synchronously, no mutation.
    Validation,
    /// Transient external-provider failure; absorbed and retried on next poll.
    Transient,
    /// Protocol violation (bad preimage, illegal transition); rejected, no mutation.
    Protocol,
    /// Failure on the funds path (broadcast, dust, unfunded); terminal for the swap.
    FundsPath,
    /// Requester is not allowed to perform the operation; swap untouched.
    Authorization,
}

// ============================================================================
// ERROR TYPE
// ============================================================================

/// Errors produced by the swap coordinator core.
#[derive(Debug, Error)]
pub enum SwapError {
    /// A required request field is missing or malformed.
    #[error("missing or invalid field: {0}")]
    MissingField(String),

    /// A swap record already exists for the supplied hash lock.
    #[error("swap already exists for hash lock {0}")]
    DuplicateSwap(String),

    /// Recipient address does not resolve to a 20-byte public-key hash.
    #[error("unsupported address type for {0}: only P2PKH and P2WPKH are accepted")]
    UnsupportedAddressType(String),

    /// Partial-fill split would produce parts below the minimum floor.
    #[error("cannot split {total} sats into {parts} parts: each part would fall below the {min} sat floor")]
    PartCountInvalid { total: u64, parts: u32, min: u64 },

    /// No confirmed funding UTXO exists for the HTLC address.
    #[error("HTLC at {0} is not funded")]
    HtlcNotFunded(String),

    /// Output value after fees is below the network dust floor.
    #[error("output of {value} sats is below the dust floor of {floor} sats")]
    DustOutput { value: u64, floor: u64 },

    /// Reclaim requested before the timeout height.
    #[error("timeout not reached: current height {current} < timeout height {timeout}")]
    TimeoutNotReached { current: u64, timeout: u64 },

    /// Transaction relay rejected the broadcast; provider text verbatim.
    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),

    /// Requested state transition is absent from the transition table.
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// SHA-256 of the supplied preimage does not match the hash lock.
    #[error("invalid preimage: hash does not match the hash lock")]
    InvalidPreimage,

    /// No swap record exists for the given hash lock.
    #[error("no swap found for hash lock {0}")]
    SwapNotFound(String),

    /// Chain-data provider request failed (network, parse, or HTTP error).
    #[error("provider error: {0}")]
    Provider(String),

    /// Lightning node request failed.
    #[error("lightning node error: {0}")]
    Lightning(String),

    /// Requester is not the swap initiator.
    #[error("requester is not authorized to receive the secret")]
    Unauthorized,

    /// The secret has already been disclosed once.
    #[error("secret has already been revealed")]
    AlreadyRevealed,

    /// The swap is not yet in a state where the secret may be disclosed.
    #[error("swap is not ready: the Bitcoin leg must be confirmed before the secret is revealed")]
    NotReady,

    /// The swap's absolute deadline has passed.
    #[error("swap has expired")]
    Expired,

    /// Wrapped transaction construction or signing failure.
    #[error("transaction build failed: {0}")]
    TxBuild(String),
}

impl SwapError {
    /// Stable machine-readable code for this error.
    ///
    /// These codes are part of the wire contract with callers and must not
    /// change between releases.
    pub fn code(&self) -> &'static str {
        match self {
            SwapError::MissingField(_) => "VALIDATION_ERROR",
            SwapError::DuplicateSwap(_) => "VALIDATION_ERROR",
            SwapError::UnsupportedAddressType(_) => "UNSUPPORTED_ADDRESS_TYPE",
            SwapError::PartCountInvalid { .. } => "PART_COUNT_INVALID",
            SwapError::HtlcNotFunded(_) => "HTLC_NOT_FUNDED",
            SwapError::DustOutput { .. } => "DUST_OUTPUT",
            SwapError::TimeoutNotReached { .. } => "TIMEOUT_NOT_REACHED",
            SwapError::BroadcastFailed(_) => "BROADCAST_FAILED",
            SwapError::InvalidTransition { .. } => "INVALID_STATE_TRANSITION",
            SwapError::InvalidPreimage => "INVALID_SECRET",
            SwapError::SwapNotFound(_) => "HTLC_NOT_FOUND",
            SwapError::Provider(_) => "BITCOIN_NODE_ERROR",
            SwapError::Lightning(_) => "LIGHTNING_NODE_ERROR",
            SwapError::Unauthorized => "AUTH_ERROR",
            SwapError::AlreadyRevealed => "ALREADY_REVEALED",
            SwapError::NotReady => "NOT_READY",
            SwapError::Expired => "HTLC_EXPIRED",
            SwapError::TxBuild(_) => "BITCOIN_TX_FAILED",
        }
    }

    /// Classifies this error into the coarse failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwapError::MissingField(_)
            | SwapError::DuplicateSwap(_)
            | SwapError::UnsupportedAddressType(_)
            | SwapError::PartCountInvalid { .. } => ErrorKind::Validation,
            SwapError::Provider(_) | SwapError::Lightning(_) => ErrorKind::Transient,
            SwapError::InvalidTransition { .. }
            | SwapError::InvalidPreimage
            | SwapError::AlreadyRevealed
            | SwapError::NotReady
            | SwapError::SwapNotFound(_) => ErrorKind::Protocol,
            SwapError::HtlcNotFunded(_)
            | SwapError::DustOutput { .. }
            | SwapError::TimeoutNotReached { .. }
            | SwapError::BroadcastFailed(_)
            | SwapError::TxBuild(_) => ErrorKind::FundsPath,
            SwapError::Unauthorized | SwapError::Expired => ErrorKind::Authorization,
        }
    }
}
