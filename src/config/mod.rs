//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the swap
//! coordinator service. Configuration covers the Bitcoin provider endpoint
//! and network parameters, the EVM escrow chain boundary, the optional
//! Lightning node, and coordinator timing settings.
//!
//! All network parameters (fee rate, dust floor, required confirmations,
//! sweep deadline) are read once at startup and never mutated afterwards.

use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
///
/// This structure holds configuration for:
/// - Bitcoin chain-data/broadcast provider and static network parameters
/// - EVM escrow chain boundary (lock events are consumed from here)
/// - Optional Lightning node (held-invoice leg)
/// - Coordinator timing settings (polling, sweep deadline)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bitcoin-side configuration (provider, fees, confirmations)
    pub bitcoin: BitcoinConfig,
    /// EVM escrow chain configuration (boundary only, no signing here)
    pub evm: EvmChainConfig,
    /// Lightning node configuration (optional, enables the lightning swap type)
    #[serde(default)]
    pub lightning: Option<LightningConfig>,
    /// Coordinator-specific configuration (timing settings)
    pub coordinator: CoordinatorConfig,
}

/// Bitcoin provider and network parameter configuration.
///
/// The fee model is deliberately a fixed rate times a conservative size
/// estimate rather than a live fee-market query; upgrading to dynamic
/// estimation does not change any other contract in this file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoinConfig {
    /// Bitcoin network ("bitcoin", "testnet", "signet", "regtest")
    pub network: String,
    /// Base URL of the Esplora-style chain-data/broadcast provider
    pub provider_url: String,
    /// Fixed fee rate in satoshis per virtual byte
    pub fee_rate_sat_vb: u64,
    /// Conservative virtual-size estimate for a P2SH redemption, in vbytes
    pub tx_size_estimate_vb: u64,
    /// Minimum relayable output value in satoshis
    pub dust_floor_sats: u64,
    /// Confirmation depth required before a funding output counts as final
    pub confirmations_required: u32,
    /// Resolver signing key as 64 hex characters (32 bytes).
    /// Injected into the transaction engine at construction time; the key
    /// never lives in any module-level state.
    pub resolver_private_key: String,
    /// Resolver payout address for reclaimed and redeemed funds
    pub resolver_address: String,
}

/// Configuration for the EVM escrow chain boundary.
///
/// The coordinator consumes lock-confirmed signals from this chain and
/// exposes the revealed secret for the claim step. It never signs EVM
/// transactions itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// RPC endpoint URL for EVM chain communication
    pub rpc_url: String,
    /// Address of the escrow contract holding the EVM leg
    pub escrow_contract_addr: String,
    /// Chain ID (e.g., 31337 for Hardhat, 1 for Ethereum mainnet)
    pub chain_id: u64,
}

/// Configuration for the Lightning node (held-invoice leg).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightningConfig {
    /// Base URL of the LND REST endpoint
    pub rest_url: String,
    /// Hex-encoded invoice macaroon for authenticated requests
    pub macaroon_hex: String,
    /// Invoice expiry in seconds
    pub invoice_expiry_secs: u64,
}

/// Coordinator-specific configuration for timing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Polling interval for swap processing in milliseconds
    pub polling_interval_ms: u64,
    /// Timeout for provider requests in milliseconds
    pub provider_timeout_ms: u64,
    /// Wall-clock deadline in seconds after which an unfinished swap is
    /// swept into the timeout path (independent of the Bitcoin timeout block)
    pub sweep_deadline_secs: u64,
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Validates the configuration.
    ///
    /// This function ensures that:
    /// - The Bitcoin network name parses
    /// - The resolver key is 32 bytes of hex
    /// - Fee, dust, and confirmation parameters are non-zero
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(anyhow::Error)` - A parameter is missing or malformed
    pub fn validate(&self) -> anyhow::Result<()> {
        self.bitcoin
            .network
            .parse::<bitcoin::Network>()
            .map_err(|_| {
                anyhow::anyhow!(
                    "Configuration error: unknown bitcoin network '{}'",
                    self.bitcoin.network
                )
            })?;

        let key_hex = self
            .bitcoin
            .resolver_private_key
            .strip_prefix("0x")
            .unwrap_or(&self.bitcoin.resolver_private_key);
        let key_bytes = hex::decode(key_hex)
            .map_err(|_| anyhow::anyhow!("Configuration error: resolver_private_key is not hex"))?;
        if key_bytes.len() != 32 {
            anyhow::bail!(
                "Configuration error: resolver_private_key must be 32 bytes, got {}",
                key_bytes.len()
            );
        }

        if self.bitcoin.fee_rate_sat_vb == 0 {
            anyhow::bail!("Configuration error: fee_rate_sat_vb must be positive");
        }
        if self.bitcoin.tx_size_estimate_vb == 0 {
            anyhow::bail!("Configuration error: tx_size_estimate_vb must be positive");
        }
        if self.bitcoin.dust_floor_sats == 0 {
            anyhow::bail!("Configuration error: dust_floor_sats must be positive");
        }
        if self.bitcoin.confirmations_required == 0 {
            anyhow::bail!("Configuration error: confirmations_required must be at least 1");
        }
        if self.coordinator.sweep_deadline_secs == 0 {
            anyhow::bail!("Configuration error: sweep_deadline_secs must be positive");
        }

        if let Some(ref lightning) = self.lightning {
            if hex::decode(&lightning.macaroon_hex).is_err() {
                anyhow::bail!("Configuration error: lightning macaroon_hex is not hex");
            }
        }

        Ok(())
    }

    /// Returns the parsed Bitcoin network.
    ///
    /// Only valid after `validate()` has succeeded; falls back to testnet
    /// if the configured string cannot be parsed.
    pub fn network(&self) -> bitcoin::Network {
        self.bitcoin
            .network
            .parse()
            .unwrap_or(bitcoin::Network::Testnet)
    }

    /// Loads configuration from the TOML file.
    ///
    /// This function:
    /// 1. Checks if config/swap-coordinator.toml exists (or the path from
    ///    the SWAP_COORDINATOR_CONFIG_PATH environment variable)
    /// 2. If it exists, loads and parses the configuration
    /// 3. Validates the configuration
    /// 4. If it doesn't exist, returns an error asking user to copy template
    ///
    /// # Returns
    ///
    /// - `Ok(Config)` - Successfully loaded and validated configuration
    /// - `Err(anyhow::Error)` - Failed to load configuration, file doesn't exist, or validation failed
    pub fn load() -> anyhow::Result<Self> {
        // Check for custom config path via environment variable (for tests)
        let config_path = std::env::var("SWAP_COORDINATOR_CONFIG_PATH")
            .unwrap_or_else(|_| "config/swap-coordinator.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/swap-coordinator.template.toml config/swap-coordinator.toml\n\
                Then edit config/swap-coordinator.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Creates a default configuration with placeholder values.
    ///
    /// This configuration is suitable for local development and testing.
    /// For production use, the provider URLs and the resolver key must be
    /// replaced with actual values.
    #[allow(dead_code)]
    pub fn default() -> Self {
        Self {
            bitcoin: BitcoinConfig {
                network: "testnet".to_string(),
                provider_url: "https://blockstream.info/testnet/api".to_string(),
                fee_rate_sat_vb: 10,
                tx_size_estimate_vb: 300,
                dust_floor_sats: 546,
                confirmations_required: 3,
                resolver_private_key:
                    "0000000000000000000000000000000000000000000000000000000000000001".to_string(),
                resolver_address: "mipcBbFg9gMiCh81Kj8tqqdgoZub1ZJRfn".to_string(),
            },
            evm: EvmChainConfig {
                name: "Hardhat".to_string(),
                rpc_url: "http://127.0.0.1:8545".to_string(),
                escrow_contract_addr: "0x0000000000000000000000000000000000000000".to_string(),
                chain_id: 31337,
            },
            lightning: None,
            coordinator: CoordinatorConfig {
                polling_interval_ms: 2000,
                provider_timeout_ms: 30000,
                sweep_deadline_secs: 1800,
            },
        }
    }
}
