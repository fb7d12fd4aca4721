//! Estate Settlement - service entry point
//!
//! ```text
//! ┌──────────┐    ┌────────────────────┐    ┌──────────────────────┐
//! │ Gateway  │───▶│  SettlementEngine  │───▶│    Collaborators     │
//! │  (HTTP)  │    │ ledger/investments │    │ processor, ledger,   │
//! └──────────┘    │ dividends/approvals│    │ payout rail, notices │
//!                 └─────────▲──────────┘    └──────────────────────┘
//!                           │
//!              ┌────────────┴────────────┐
//!              │ delivery worker, sweeper│
//!              └─────────────────────────┘
//! ```
//!
//! Usage: `estate_settlement [--env dev] [--port 8080] [--mock]`

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use estate_settlement::clock::SystemTimeSource;
use estate_settlement::collaborators::ledger_gateway::HttpLedgerService;
use estate_settlement::collaborators::paystack::{HttpPaymentProcessor, PaymentProcessorConfig};
use estate_settlement::collaborators::{NotificationSink, TracingNotificationSink};
use estate_settlement::config::AppConfig;
use estate_settlement::db::Database;
use estate_settlement::engine::{Collaborators, SettlementEngine};
use estate_settlement::gateway::{self, state::AppState};
use estate_settlement::ledger::{MemorySupplyLedger, PgSupplyLedger, SupplyLedger};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

fn use_mock_collaborators() -> bool {
    std::env::args().any(|a| a == "--mock")
}

/// Deterministic in-process collaborators for local runs
#[cfg(feature = "mock-collaborators")]
fn mock_collaborators(config: &AppConfig) -> anyhow::Result<Collaborators> {
    use estate_settlement::collaborators::fake::{
        FakeLedgerService, FakePaymentProcessor, FakePayoutGateway,
    };

    warn!("Using mock collaborators; no real money or tokens move");
    Ok(Collaborators {
        payments: Arc::new(FakePaymentProcessor::new(config.settlement.currency.clone())),
        ledger_service: Arc::new(FakeLedgerService::new()),
        payouts: Arc::new(FakePayoutGateway::new()),
        notifier: Arc::new(TracingNotificationSink),
    })
}

#[cfg(not(feature = "mock-collaborators"))]
fn mock_collaborators(_config: &AppConfig) -> anyhow::Result<Collaborators> {
    anyhow::bail!("--mock requires the 'mock-collaborators' feature")
}

fn http_collaborators(config: &AppConfig) -> anyhow::Result<Collaborators> {
    let processor_config = config
        .payment_processor
        .clone()
        .context("payment_processor section is required without --mock")?;
    let ledger_config = config
        .ledger_gateway
        .clone()
        .context("ledger_gateway section is required without --mock")?;

    // Payouts share the processor account and the settlement currency scale
    let processor = Arc::new(HttpPaymentProcessor::new(PaymentProcessorConfig {
        currency_decimals: config.settlement.currency_decimals,
        ..processor_config
    })?);
    let ledger_service = Arc::new(HttpLedgerService::new(ledger_config)?);
    let notifier: Arc<dyn NotificationSink> = Arc::new(TracingNotificationSink);

    Ok(Collaborators {
        payments: processor.clone(),
        ledger_service,
        payouts: processor,
        notifier,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = estate_settlement::logging::init_logging(&app_config);

    info!(
        build = env!("SETTLEMENT_BUILD"),
        "Starting Estate Settlement in {} mode",
        env
    );

    let collaborators = if use_mock_collaborators() {
        mock_collaborators(&app_config)?
    } else {
        http_collaborators(&app_config)?
    };

    let (supply, db): (Arc<dyn SupplyLedger>, Option<Database>) = match &app_config.postgres_url {
        Some(url) => {
            let db = Database::connect_with(url, app_config.postgres_max_connections)
                .await
                .with_context(|| "Failed to connect to PostgreSQL")?;
            let ledger = PgSupplyLedger::new(db.pool().clone());
            ledger.migrate().await?;
            info!("Supply ledger: PostgreSQL");
            (Arc::new(ledger), Some(db))
        }
        None => {
            warn!("postgres_url not set; supply ledger is in memory and lost on restart");
            (Arc::new(MemorySupplyLedger::new()), None)
        }
    };

    let engine = Arc::new(SettlementEngine::new(
        supply,
        collaborators,
        Arc::new(SystemTimeSource),
        app_config.settlement.clone(),
    ));

    // Spawn background workers
    let delivery_worker = engine.delivery_worker();
    tokio::spawn(async move {
        delivery_worker.run().await;
    });
    let sweeper = engine.expiry_sweeper();
    tokio::spawn(async move {
        sweeper.run().await;
    });

    let webhook_secret = app_config
        .payment_processor
        .as_ref()
        .map(|p| p.secret_key.clone());
    if webhook_secret.is_none() {
        warn!("No payment processor secret; payment webhooks are disabled");
    }

    let state = Arc::new(AppState::new(engine, webhook_secret, db));
    let port = get_port_override().unwrap_or(app_config.gateway.port);
    gateway::run_server(&app_config.gateway.host, port, state).await
}
