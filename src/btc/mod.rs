//! Bitcoin leg of the atomic swap
//!
//! Script construction, partial-fill splitting, funding monitoring, and the
//! redeem/reclaim transaction engine, plus the REST client for the external
//! chain-data/broadcast provider.

pub mod engine;
pub mod monitor;
pub mod partial;
pub mod provider;
pub mod script;

pub use engine::{PreparedTx, ResolverKey, TxEngine};
pub use monitor::{FundingCheck, FundingUtxo, HtlcFundingStatus, UtxoMonitor};
pub use partial::{
    build_multi_secret_script, calculate_partial_fill_amounts, generate_partial_fill_secrets,
    partial_fill_addresses, PartialFillLeg, PartialSecret,
};
pub use provider::{EsploraProvider, ProviderUtxo, UtxoStatus};
pub use script::{address_pubkey_hash, sha256, HtlcScriptParams};
