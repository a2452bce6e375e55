use std::sync::Arc;

use alloy::primitives::utils::format_ether;
use chrono::Utc;
use tracing::{info, warn};

use crate::{
    api::StatusState,
    config::Config,
    error::AppResult,
    execution::{
        evm::{EvmConfig, EvmLedger},
        ledger::LedgerClient,
        submission::SubmissionController,
    },
    price_feed::reference::{GeckoTerminalSource, ReferenceSource},
    reconcile::{
        scheduler::{Scheduler, SchedulerConfig},
        shutdown::ShutdownSignal,
        state::EngineState,
    },
};

/// Fully wired keeper, ready to start
pub struct Keeper {
    pub scheduler: Arc<Scheduler>,
    /// Present when `STATUS_BIND_ADDRESS` is set
    pub status: Option<(String, StatusState)>,
}

pub async fn initialize_keeper(config: &Config, shutdown: ShutdownSignal) -> AppResult<Keeper> {
    info!("Initializing keeper components ...");

    // Ledger
    let ledger = EvmLedger::connect(
        EvmConfig {
            rpc_url: config.rpc_url.clone(),
            contract: config.contract_address,
            scale: config.price_decimals,
            rpc_timeout: config.rpc_timeout,
            confirmation_timeout: config.confirmation_timeout,
        },
        config.signer.clone(),
    )
    .await?;
    let ledger: Arc<dyn LedgerClient> = Arc::new(ledger);

    match ledger.balance().await {
        Ok(balance) => info!(
            "💰 Operator {} balance: {} ETH",
            ledger.operator(),
            format_ether(balance)
        ),
        Err(e) => warn!("⚠️  Could not read operator balance: {}", e),
    }

    // Reference source
    let source = GeckoTerminalSource::new(
        config.price_api_url.clone(),
        config.price_decimals,
        config.fetch_timeout,
    )?;
    let source: Arc<dyn ReferenceSource> = Arc::new(source);
    info!(
        "✅ Reference source {} initialized for network: {}",
        source.name(),
        config.price_network
    );

    // Engine
    let state = EngineState::new();
    let controller = Arc::new(SubmissionController::new(
        ledger.clone(),
        config.fee.clone(),
        state.clone(),
        shutdown.clone(),
    ));
    info!(
        "✅ Submission controller ready ({:?} fees, base {} wei, +{} wei per retry, max {} attempts)",
        config.fee.mode, config.fee.base_price, config.fee.increment, config.fee.max_attempts
    );

    let scheduler = Arc::new(Scheduler::new(
        SchedulerConfig {
            network: config.price_network.clone(),
            asset: config.token_address.clone(),
            token_label: config.token_label(),
            period: config.check_interval,
            cycle_timeout: config.cycle_timeout,
            max_throttle_retries: config.max_throttle_retries,
            threshold: config.threshold,
            policy: config.update_policy,
        },
        source,
        ledger.clone(),
        controller,
        state.clone(),
        shutdown,
    ));

    let status = config.status_bind_address.clone().map(|address| {
        (
            address,
            StatusState {
                engine: state,
                token: config.token_label(),
                operator: ledger.operator(),
                threshold: config.threshold,
                check_interval: config.check_interval,
                started_at: Utc::now(),
            },
        )
    });

    info!("✓ Keeper initialized");
    Ok(Keeper { scheduler, status })
}
