//! Top-level execution loop: one driver task that, each cycle, reconciles
//! and monitors positions, then — only when flat, inside the trading
//! window, on a trading day, and under the daily caps — runs the strategy
//! pipeline for every configured symbol. The cycle cadence is recomputed
//! from scratch every pass; there are no timers or callbacks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use common::{BrokerGateway, CandleReader, Config, Result};
use ledger::OrderLedger;
use news::{CalendarSource, NewsGate};
use strategy::pipeline::{CadenceRequest, Pipeline};
use strategy::{SessionSchedule, SessionTracker, StrategyKind, TradingHours};

use crate::monitor::PositionMonitor;

/// How long a per-symbol news gate stays fresh before it is re-scraped,
/// in minutes.
const GATE_REFRESH_MIN: i64 = 10;

/// Reconnect probes per cycle before giving up until the next cycle.
const RECONNECT_ATTEMPTS: u32 = 3;

pub struct Driver {
    config: Config,
    gateway: Arc<dyn BrokerGateway>,
    reader: CandleReader,
    monitor: PositionMonitor,
    ledger: Option<OrderLedger>,
    calendar: Arc<dyn CalendarSource>,
    tracker: SessionTracker,
    hours: TradingHours,
    pipelines: Vec<Pipeline>,
    gates: HashMap<String, (NewsGate, DateTime<Utc>)>,
    shutdown: watch::Receiver<bool>,
}

impl Driver {
    pub fn new(
        config: Config,
        gateway: Arc<dyn BrokerGateway>,
        ledger: Option<OrderLedger>,
        calendar: Arc<dyn CalendarSource>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let schedule = SessionSchedule::from_config(&config.strategy_schedule, &config.strategy.name)?;
        let hours = TradingHours::from_config(&config.trading_hours)?;
        let monitor = PositionMonitor::new(
            gateway.clone(),
            ledger.clone(),
            &config.position_monitoring.trailing_stop,
            &config.position_monitoring.auto_close,
        )?;
        let reader = CandleReader::new(
            gateway.clone(),
            chrono_tz::America::New_York,
            config.mt5.broker_utc_offset_minutes,
        );
        let pipelines = config
            .symbols
            .iter()
            .map(|symbol| {
                Pipeline::new(
                    symbol,
                    config.strategy_config.clone(),
                    config.risk_management.clone(),
                    config.news.clone(),
                )
            })
            .collect();

        Ok(Self {
            config,
            gateway,
            reader,
            monitor,
            ledger,
            calendar,
            tracker: SessionTracker::new(schedule),
            hours,
            pipelines,
            gates: HashMap::new(),
            shutdown,
        })
    }

    /// Drive cycles until the shutdown signal flips. The current cycle
    /// always finishes; ledger writes are awaited inline so nothing is
    /// left pending on exit.
    pub async fn run(mut self) {
        info!(symbols = ?self.config.symbols, "Execution loop started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let now = Utc::now();
            let sleep = self.cycle(now).await;
            debug!(sleep_secs = sleep.as_secs(), "Cycle complete");
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = self.shutdown.changed() => break,
            }
        }
        info!("Execution loop stopped");
    }

    /// One full cycle. Returns how long to sleep before the next one.
    pub async fn cycle(&mut self, now: DateTime<Utc>) -> Duration {
        if !self.ensure_connected().await {
            return Duration::from_secs(5);
        }

        let report = self.monitor.run_cycle(now).await;

        // The flat-all action owns any cycle it fires in; with positions
        // still open, this cycle is monitor-only as well.
        if report.open_count > 0 || !report.auto_closed.is_empty() {
            return sleep_policy(true, false, false);
        }

        if !self.hours.contains(now) {
            debug!("Outside trading hours, monitoring only");
            return sleep_policy(false, false, false);
        }

        if !self.daily_caps_permit(now).await {
            return sleep_policy(false, false, false);
        }

        let (strategy_name, change) = self.tracker.observe(now);
        if let Some(change) = &change {
            info!(
                from = change.from.as_deref().unwrap_or("-"),
                to = change.to.as_deref().unwrap_or("-"),
                strategy = %change.strategy,
                "Session changed"
            );
        }
        let strategy = StrategyKind::from_name(&strategy_name).unwrap_or(StrategyKind::Default);

        let mut intensive = false;
        let mut intermediate = false;
        for i in 0..self.pipelines.len() {
            let symbol = self.pipelines[i].symbol().to_string();
            let gate = self.gate_for(&symbol, now).await;

            let (is_trading_day, reason, _) = gate.trading_day(now);
            if !is_trading_day {
                debug!(symbol = %symbol, %reason, "Not a trading day");
                continue;
            }

            let outcome = self.pipelines[i]
                .run(
                    strategy,
                    &self.gateway,
                    &self.reader,
                    &gate,
                    self.ledger.as_ref(),
                    now,
                )
                .await;
            match outcome.cadence {
                CadenceRequest::Intensive => intensive = true,
                CadenceRequest::Intermediate => intermediate = true,
                CadenceRequest::None => {}
            }
            if let Some(executed) = outcome.executed {
                info!(
                    symbol = %executed.symbol,
                    ticket = executed.ticket,
                    strategy = %executed.strategy,
                    rr = executed.rr,
                    "Pipeline executed an order"
                );
                // A fill means monitor-only cadence from the next cycle on.
                return sleep_policy(true, false, false);
            }
        }

        sleep_policy(false, intensive, intermediate)
    }

    async fn ensure_connected(&self) -> bool {
        for attempt in 1..=RECONNECT_ATTEMPTS {
            match self.gateway.ping().await {
                Ok(()) => return true,
                Err(e) if attempt < RECONNECT_ATTEMPTS => {
                    warn!(attempt, error = %e, "Terminal unreachable, backing off");
                    tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                }
                Err(e) => {
                    error!(error = %e, "Terminal unreachable, skipping cycle");
                }
            }
        }
        false
    }

    async fn daily_caps_permit(&self, now: DateTime<Utc>) -> bool {
        let Some(ledger) = &self.ledger else {
            return true;
        };
        let day_start = strategy::pipeline::ny_day_start(now);
        match ledger.count_today(day_start, None).await {
            Ok(count) if count >= self.config.risk_management.max_trades_per_day => {
                debug!(count, "Daily trade limit reached, monitoring only");
                false
            }
            Ok(_) => {
                if self.config.risk_management.close_day_on_first_tp {
                    match ledger.first_tp_today(day_start, None).await {
                        Ok(true) => {
                            debug!("First TP banked, done for the day");
                            return false;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!(error = %e, "Ledger unavailable, suppressing analysis");
                            return false;
                        }
                    }
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "Ledger unavailable, suppressing analysis");
                false
            }
        }
    }

    /// Per-symbol news gate, re-scraped once it goes stale. A failed
    /// scrape yields the unavailable gate, which blocks analysis but not
    /// monitoring.
    async fn gate_for(&mut self, symbol: &str, now: DateTime<Utc>) -> NewsGate {
        if let Some((gate, refreshed)) = self.gates.get(symbol) {
            if now - *refreshed < chrono::Duration::minutes(GATE_REFRESH_MIN) {
                return gate.clone();
            }
        }
        let gate = NewsGate::load(self.calendar.as_ref(), symbol, now)
            .await
            .unwrap_or_else(|_| NewsGate::unavailable());
        self.gates.insert(symbol.to_string(), (gate.clone(), now));
        gate
    }
}

/// The cadence table: open positions beat everything, then intensive, then
/// intermediate, then the idle default.
fn sleep_policy(has_open_positions: bool, intensive: bool, intermediate: bool) -> Duration {
    if has_open_positions {
        Duration::from_secs(5)
    } else if intensive {
        Duration::from_secs(1)
    } else if intermediate {
        Duration::from_secs(10)
    } else {
        Duration::from_secs(60)
    }
}
