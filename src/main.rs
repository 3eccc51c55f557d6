use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, WrapErr};
use tokio::sync::watch;
use tracing::{error, info};

use scrt_bridge_operator::config::Config;
use scrt_bridge_operator::confirmation::{ConfirmationTracker, WithdrawConfirmer};
use scrt_bridge_operator::db;
use scrt_bridge_operator::eth::events::{
    EVENT_SWAP, EVENT_SWAP_TOKEN, EVENT_WITHDRAW, EVENT_WITHDRAW_FAILURE,
};
use scrt_bridge_operator::eth::EthClient;
use scrt_bridge_operator::manager::ThresholdManager;
use scrt_bridge_operator::pairing::{self, NETWORK_SCRT};
use scrt_bridge_operator::scrt::chain::ScrtQueryClient;
use scrt_bridge_operator::scrt::cli::ScrtCli;
use scrt_bridge_operator::signer::SignerWorker;
use scrt_bridge_operator::watchers::{BurnWatcher, DepositHandler, EventSource};
use scrt_bridge_operator::writers::{EthWriter, Leader, ScrtWriter};
use scrt_bridge_operator::{api, metrics};

fn main() -> Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    init_logging();

    info!("Starting bridge operator");

    let config = Config::load()?;
    info!(
        leader = config.operator.leader,
        signer = %config.scrt.signer_name,
        threshold = config.operator.signature_threshold,
        pairings = config.pairings.len(),
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database.url).await?;
    info!("Database connected");

    db::run_migrations(&pool).await?;
    info!("Database migrations complete");

    let eth = Arc::new(EthClient::new(
        &config.eth.all_rpc_urls(),
        &config.eth.contract_address,
    )?);
    let cli = ScrtCli::new(&config.scrt);
    let query = Arc::new(ScrtQueryClient::new(&config.scrt.lcd_url)?);

    let adapters = Arc::new(
        config
            .pairings
            .iter()
            .map(pairing::adapter_for)
            .collect::<Result<Vec<_>>>()?,
    );

    let poll_interval = Duration::from_millis(config.operator.poll_interval_ms);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Signal handler feeds the single stop signal every worker watches.
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        });
    }

    // Status API runs detached; it serves until the process exits.
    let api_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.operator.api_port));
    let api_db = pool.clone();
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, api_db).await {
            error!(error = %e, "API server error");
        }
    });

    let mut workers: Vec<(&'static str, tokio::task::JoinHandle<Result<()>>)> = Vec::new();

    // Every participant signs.
    let signer = SignerWorker::new(
        pool.clone(),
        eth.clone(),
        cli.clone(),
        query.clone(),
        adapters.clone(),
        config.pairings.clone(),
        &config.eth.private_key,
        config.scrt.signer_name.clone(),
        config.scrt.multisig_address.clone(),
        config.eth.start_block,
        poll_interval,
    )
    .await?;
    {
        let shutdown = shutdown_rx.clone();
        workers.push((
            "signer",
            tokio::spawn(async move { signer.run(shutdown).await }),
        ));
    }

    // The leader additionally discovers swaps, watches thresholds,
    // broadcasts and confirms.
    if config.operator.leader {
        init_sequence_allocator(&pool, &cli, &config.scrt.multisig_address).await?;

        let mut event_source = EventSource::new(
            eth.clone(),
            pool.clone(),
            config.eth.start_block,
            poll_interval,
        );
        event_source.register(
            Arc::new(DepositHandler::new(
                pool.clone(),
                adapters.clone(),
                config.scrt.multisig_address.clone(),
            )),
            &[EVENT_SWAP, EVENT_SWAP_TOKEN],
            config.eth.confirmations,
        );
        event_source.register(
            Arc::new(WithdrawConfirmer::new(pool.clone(), eth.clone())),
            &[EVENT_WITHDRAW, EVENT_WITHDRAW_FAILURE],
            config.eth.confirmations,
        );
        {
            let shutdown = shutdown_rx.clone();
            workers.push((
                "event-source",
                tokio::spawn(async move { event_source.run(shutdown).await }),
            ));
        }

        let burn_watcher = BurnWatcher::new(
            pool.clone(),
            query.clone(),
            config.pairings.clone(),
            poll_interval,
        );
        {
            let shutdown = shutdown_rx.clone();
            workers.push((
                "burn-watcher",
                tokio::spawn(async move { burn_watcher.run(shutdown).await }),
            ));
        }

        let threshold_manager = ThresholdManager::new(
            pool.clone(),
            config.operator.signature_threshold,
            poll_interval,
        );
        {
            let shutdown = shutdown_rx.clone();
            workers.push((
                "threshold-manager",
                tokio::spawn(async move { threshold_manager.run(shutdown).await }),
            ));
        }

        let account = cli
            .account_info(&config.scrt.multisig_address)
            .await
            .wrap_err("Cannot fetch multisig account info")?;
        let scrt_writer = ScrtWriter::new(
            pool.clone(),
            cli.clone(),
            config.scrt.multisig_name.clone(),
            config.scrt.multisig_address.clone(),
            account.account_number,
            config.operator.signature_threshold,
        );
        let eth_writer = EthWriter::new(
            pool.clone(),
            &config.eth,
            config.operator.signature_threshold,
        )?;
        let mut leader = Leader::new(
            pool.clone(),
            scrt_writer,
            eth_writer,
            config.scrt.multisig_address.clone(),
            poll_interval,
        );
        {
            let shutdown = shutdown_rx.clone();
            workers.push((
                "leader",
                tokio::spawn(async move { leader.run(shutdown).await }),
            ));
        }

        let confirmation = ConfirmationTracker::new(
            pool.clone(),
            cli.clone(),
            eth.clone(),
            config.scrt.multisig_address.clone(),
            config.operator.broadcast_cooldown_secs,
            poll_interval,
        );
        {
            let shutdown = shutdown_rx.clone();
            workers.push((
                "confirmation-tracker",
                tokio::spawn(async move { confirmation.run(shutdown).await }),
            ));
        }
    }

    info!(workers = workers.len(), "Workers started");

    // Wait for every worker to finish its current unit of work and exit.
    for (name, handle) in workers {
        match handle.await {
            Ok(Ok(())) => info!(worker = name, "Worker exited cleanly"),
            Ok(Err(e)) => error!(worker = name, error = %e, "Worker exited with error"),
            Err(e) => error!(worker = name, error = %e, "Worker panicked"),
        }
    }

    metrics::UP.set(0.0);
    info!("Bridge operator stopped");
    Ok(())
}

/// Seed the destination-sequence allocator from authoritative chain state on
/// a fresh store. An allocator already ahead of the chain (pending swaps
/// hold sequences) is left alone.
async fn init_sequence_allocator(
    pool: &sqlx::PgPool,
    cli: &ScrtCli,
    multisig_address: &str,
) -> Result<()> {
    let account = cli
        .account_info(multisig_address)
        .await
        .wrap_err("Cannot fetch multisig account info")?;
    let baseline = account.sequence as i64 - 1;

    let key = format!("seq:{}", NETWORK_SCRT);
    let tracker = db::get_or_create_tracker(pool, &key).await?;
    if tracker.nonce < baseline {
        db::force_set_tracker(pool, &key, baseline).await?;
        info!(
            chain_sequence = account.sequence,
            "Sequence allocator seeded from chain"
        );
    }
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,scrt_bridge_operator=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
