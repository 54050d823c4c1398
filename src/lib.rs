//! Swap Coordinator
//!
//! Trustless coordination engine for EVM-to-Bitcoin atomic swaps. The
//! coordinator holds each swap's secret, derives the Bitcoin HTLC from its
//! hash lock, watches the chain for funding, gates secret disclosure on
//! confirmed deposits, and reclaims funds after timeout. Safety rests on
//! the HTLC script, not on the coordinator being honest: a maker who never
//! receives the secret loses nothing, and a resolver whose counterparty
//! disappears recovers funds at the timeout height.

pub mod btc;
pub mod config;
pub mod error;
pub mod lightning;
pub mod storage;
pub mod swap;

pub use config::Config;
pub use error::{ErrorKind, Result, SwapError};
pub use storage::{SwapEvent, SwapStore};
pub use swap::machine::{CreateSwapRequest, SwapStateMachine};
pub use swap::reveal::{RevealGate, RevealedSecret, SecretVault};
pub use swap::{SwapRecord, SwapState, SwapType};
