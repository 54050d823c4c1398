//! Swap Coordinator Service
//!
//! Long-running coordinator for EVM-to-Bitcoin atomic swaps. The service
//! loads its configuration, wires up the Bitcoin provider and (optionally)
//! the Lightning node, and runs two background loops: the driver loop that
//! advances every active swap, and the timeout sweeper that moves stalled
//! swaps into reclaim.
//!
//! ## Security Model
//!
//! The coordinator holds the resolver's Bitcoin key and every undisclosed
//! swap secret. Secrets leave the process exactly once, to the swap's
//! maker, and only after the Bitcoin leg is confirmed. The funds-safety
//! guarantees come from the HTLC script itself, not from this process
//! staying alive.

use anyhow::Result;
use std::time::Duration;
use tracing::info;

use swap_coordinator::btc::engine::{ResolverKey, TxEngine};
use swap_coordinator::btc::monitor::UtxoMonitor;
use swap_coordinator::btc::provider::EsploraProvider;
use swap_coordinator::lightning::LndClient;
use swap_coordinator::swap::reveal::SecretVault;
use swap_coordinator::{Config, SwapStateMachine, SwapStore};

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

/// Main application entry point that initializes and runs the coordinator.
///
/// This function:
/// 1. Initializes logging and tracing
/// 2. Loads configuration from TOML file
/// 3. Wires the provider, transaction engine, and lightning client
/// 4. Runs the swap driver and timeout sweeper until shutdown
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting Swap Coordinator Service");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("Swap Coordinator Service");
        println!();
        println!("Usage: swap-coordinator [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --testnet, -t     Use testnet configuration (config/swap-coordinator_testnet.toml)");
        println!("  --config <path>   Use custom config file path (overrides --testnet)");
        println!("  --help, -h        Show this help message");
        println!();
        println!("Environment variables:");
        println!("  SWAP_COORDINATOR_CONFIG_PATH    Path to config file (overrides --config and --testnet)");
        return Ok(());
    }

    let mut config_path = None;
    for (i, arg) in args.iter().enumerate() {
        if arg == "--config" && i + 1 < args.len() {
            config_path = Some(args[i + 1].clone());
            break;
        }
    }

    if let Some(path) = config_path {
        std::env::set_var("SWAP_COORDINATOR_CONFIG_PATH", &path);
        info!("Using custom config: {}", path);
    } else if args.iter().any(|arg| arg == "--testnet" || arg == "-t") {
        std::env::set_var(
            "SWAP_COORDINATOR_CONFIG_PATH",
            "config/swap-coordinator_testnet.toml",
        );
        info!("Using testnet configuration");
    }

    let config = Config::load()?;
    info!("Configuration loaded successfully");

    let network = config.network();
    let provider = EsploraProvider::new(
        &config.bitcoin.provider_url,
        config.coordinator.provider_timeout_ms,
    )?;
    let monitor = UtxoMonitor::new(provider.clone());
    let key = ResolverKey::from_hex(&config.bitcoin.resolver_private_key)?;
    let resolver_pubkey_hash = key.pubkey_hash();
    let engine = TxEngine::new(
        provider,
        key,
        network,
        config.bitcoin.fee_rate_sat_vb,
        config.bitcoin.tx_size_estimate_vb,
        config.bitcoin.dust_floor_sats,
    );

    let lnd = match &config.lightning {
        Some(lightning) => Some(LndClient::new(
            lightning,
            config.coordinator.provider_timeout_ms,
        )?),
        None => None,
    };

    let store = SwapStore::new();
    let vault = SecretVault::new();
    let machine = SwapStateMachine::new(
        store,
        vault,
        monitor,
        engine,
        lnd,
        network,
        resolver_pubkey_hash,
        config.bitcoin.resolver_address.clone(),
        u64::from(config.bitcoin.confirmations_required),
        config.bitcoin.dust_floor_sats,
        config.coordinator.sweep_deadline_secs as i64,
    );
    info!("Swap state machine initialized");

    // Timeout sweeper: runs at a tenth of the sweep deadline, floor 10s.
    let sweep_interval = (config.coordinator.sweep_deadline_secs / 10).max(10);
    let sweeper = machine.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(sweep_interval));
        loop {
            ticker.tick().await;
            let swept = sweeper.sweep_timeouts().await;
            if !swept.is_empty() {
                info!("swept {} swap(s) into timeout", swept.len());
            }
        }
    });

    // Driver loop: advances every active swap once per polling interval.
    info!("Starting swap driver loop");
    let mut ticker = tokio::time::interval(Duration::from_millis(
        config.coordinator.polling_interval_ms,
    ));
    loop {
        ticker.tick().await;
        for (htlc_hash, outcome) in machine.drive_all().await {
            if let Err(e) = outcome {
                tracing::warn!(htlc_hash = %htlc_hash, error = %e, "swap drive failed");
            }
        }
    }
}
