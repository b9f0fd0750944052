use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use common::{BrokerGateway, Config};
use engine::{Driver, Mt5BridgeClient};
use ledger::OrderLedger;
use news::InvestingCalendar;
use paper::PaperBroker;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // ── Config ──────────────────────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/rangebot.toml".to_string());
    let cfg = match Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("rangebot: {e}");
            std::process::exit(1);
        }
    };

    // ── Logging ─────────────────────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_directive()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!(config = %config_path, symbols = ?cfg.symbols, "rangebot starting");

    // ── Gateway ─────────────────────────────────────────────────────────────
    let bridge = Arc::new(Mt5BridgeClient::new(cfg.mt5.bridge_url.clone()));
    let gateway: Arc<dyn BrokerGateway> = if cfg.general.paper_trading {
        info!(equity = cfg.general.paper_equity, "Paper trading mode");
        Arc::new(PaperBroker::new(bridge, cfg.general.paper_equity))
    } else {
        info!(server = %cfg.mt5.server, login = cfg.mt5.login, "Live trading mode");
        bridge
    };
    if let Err(e) = gateway.ping().await {
        error!(error = %e, "Terminal bridge unreachable at startup");
        std::process::exit(2);
    }
    info!("Terminal bridge connected");

    // ── Ledger ──────────────────────────────────────────────────────────────
    let order_ledger = if cfg.database.enabled {
        match OrderLedger::connect(&cfg.database.url).await {
            Ok(ledger) => Some(ledger),
            Err(e) => {
                // The broker stays the source of truth; run without a mirror.
                warn!(error = %e, "Ledger unavailable, continuing without persistence");
                None
            }
        }
    } else {
        None
    };

    // ── Calendar ────────────────────────────────────────────────────────────
    let calendar_zone = match common::config::parse_zone(&cfg.news.calendar_timezone) {
        Ok(zone) => zone,
        Err(e) => {
            eprintln!("rangebot: {e}");
            std::process::exit(1);
        }
    };
    let calendar = Arc::new(InvestingCalendar::new(calendar_zone));

    // ── Driver ──────────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = match Driver::new(cfg, gateway, order_ledger, calendar, shutdown_rx) {
        Ok(driver) => driver,
        Err(e) => {
            error!(error = %e, "Driver construction failed");
            std::process::exit(1);
        }
    };
    let handle = tokio::spawn(driver.run());

    info!("All subsystems started. Waiting for shutdown signal.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Signal listener failed");
    }
    info!("Shutdown signal received, finishing the current cycle");
    let _ = shutdown_tx.send(true);
    let _ = handle.await;
    info!("rangebot stopped");
}
