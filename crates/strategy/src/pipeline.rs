//! The per-symbol, per-tick decision pipeline:
//! news gate → high-timeframe pattern → entry-FVG confirmation →
//! risk-validated order.
//!
//! The pipeline never propagates an error into the driver loop. Every
//! abort is logged with its reason and surfaces only through the returned
//! cadence request.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use chrono_tz::America::New_York;
use tracing::{debug, info, warn};

use common::config::{NewsConfig, RiskConfig, StrategyTuning};
use common::{
    BrokerGateway, CandleAnchor, CandleReader, Direction, Error, OrderRequest, Result, Timeframe,
};
use ledger::{NewOrder, OrderLedger};
use news::NewsGate;

use crate::detectors::fvg::{self, Fvg};
use crate::detectors::{
    confirmation, crt_continuation, crt_extreme, crt_revision, daily_levels, turtle_soup,
    HtfSignal, StrategyKind,
};
use crate::sizing;

/// What the pipeline wants from the execution loop's sleep policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CadenceRequest {
    #[default]
    None,
    /// Stage 2 holds but no entry FVG of the expected kind yet: 10 s.
    Intermediate,
    /// An expected FVG exists and entry/exit confirmation is pending: 1 s.
    Intensive,
}

/// A submitted order, echoed back to the driver for logging.
#[derive(Debug, Clone)]
pub struct ExecutedOrder {
    pub ticket: u64,
    pub symbol: String,
    pub strategy: StrategyKind,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub volume: f64,
    pub rr: f64,
}

#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub cadence: CadenceRequest,
    pub executed: Option<ExecutedOrder>,
}

/// Per-symbol pipeline state. Only the monitoring flags live here; orders
/// and positions are reconstituted from the broker and the ledger after a
/// restart.
pub struct Pipeline {
    symbol: String,
    tuning: StrategyTuning,
    risk: RiskConfig,
    news: NewsConfig,
    intensive: bool,
    intermediate: bool,
}

impl Pipeline {
    pub fn new(symbol: &str, tuning: StrategyTuning, risk: RiskConfig, news: NewsConfig) -> Self {
        Self {
            symbol: symbol.to_string(),
            tuning,
            risk,
            news,
            intensive: false,
            intermediate: false,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Run one tick of the pipeline under the given strategy.
    pub async fn run(
        &mut self,
        strategy: StrategyKind,
        gateway: &Arc<dyn BrokerGateway>,
        reader: &CandleReader,
        gate: &NewsGate,
        ledger: Option<&OrderLedger>,
        now: DateTime<Utc>,
    ) -> PipelineOutcome {
        match self
            .run_inner(strategy, gateway, reader, gate, ledger, now)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(symbol = %self.symbol, strategy = %strategy, error = %e, "Pipeline aborted");
                PipelineOutcome::default()
            }
        }
    }

    async fn run_inner(
        &mut self,
        strategy: StrategyKind,
        gateway: &Arc<dyn BrokerGateway>,
        reader: &CandleReader,
        gate: &NewsGate,
        ledger: Option<&OrderLedger>,
        now: DateTime<Utc>,
    ) -> Result<PipelineOutcome> {
        if strategy == StrategyKind::Default {
            self.clear_monitoring();
            return Ok(PipelineOutcome::default());
        }

        // ── Stage 1: news gate ───────────────────────────────────────────
        if self.news.enabled {
            let verdict = gate.may_trade(
                now,
                Duration::minutes(self.news.block_minutes_before),
                Duration::minutes(self.news.block_minutes_after),
                true,
            );
            if !verdict.allowed {
                info!(symbol = %self.symbol, reason = %verdict.reason, "Analysis suspended by news gate");
                return Ok(PipelineOutcome::default());
            }
        }

        // ── Stage 2: high-timeframe pattern ──────────────────────────────
        let Some(signal) = self.detect_htf(strategy, gateway, reader, now).await? else {
            if self.intensive || self.intermediate {
                debug!(symbol = %self.symbol, strategy = %strategy, "Pattern gone, monitoring cancelled");
            }
            self.clear_monitoring();
            return Ok(PipelineOutcome::default());
        };

        if matches!(
            strategy,
            StrategyKind::CrtContinuation | StrategyKind::CrtRevision | StrategyKind::CrtExtreme
        ) {
            self.log_confirmations(gateway).await;
        }

        // ── Stage 3: entry FVG on the configured timeframe ───────────────
        let entry_tf = self.tuning.crt_entry_timeframe;
        let bars = gateway.rates(&self.symbol, entry_tf, 3).await?;
        if bars.len() < 3 {
            return Err(Error::InsufficientHistory(format!(
                "{}: need 3 {entry_tf} bars for the entry FVG",
                self.symbol
            )));
        }
        let tick = gateway.tick(&self.symbol).await?;
        let fvg = fvg::detect(&bars[0], &bars[1], &bars[2], tick.bid);

        let fvg = match fvg {
            Some(f) if f.kind == signal.direction => f,
            _ => {
                // Pattern holds but the confirming gap has not appeared.
                self.intensive = false;
                self.intermediate = true;
                debug!(
                    symbol = %self.symbol,
                    strategy = %strategy,
                    "No entry FVG of the expected kind yet"
                );
                return Ok(PipelineOutcome {
                    cadence: CadenceRequest::Intermediate,
                    executed: None,
                });
            }
        };

        let confirmed = fvg.entered && fvg.exited && fvg.exit_direction == Some(signal.direction);
        if !confirmed {
            self.intermediate = false;
            self.intensive = true;
            debug!(
                symbol = %self.symbol,
                strategy = %strategy,
                fvg_bottom = fvg.bottom,
                fvg_top = fvg.top,
                entered = fvg.entered,
                "Entry FVG found, waiting for confirmation"
            );
            return Ok(PipelineOutcome {
                cadence: CadenceRequest::Intensive,
                executed: None,
            });
        }

        // ── Stage 4: risk-validated order ────────────────────────────────
        let outcome = self
            .execute(strategy, &signal, &fvg, tick, gateway, ledger, now)
            .await?;
        self.clear_monitoring();
        Ok(outcome)
    }

    /// Optional confirmation reads next to a CRT signal. Advisory only:
    /// they annotate the log, they do not gate the trade.
    async fn log_confirmations(&self, gateway: &Arc<dyn BrokerGateway>) {
        if self.tuning.crt_use_vayas {
            if let Ok(bars) = gateway
                .rates(&self.symbol, self.tuning.crt_high_timeframe, 2)
                .await
            {
                if bars.len() >= 2 {
                    match confirmation::vayas(&bars[0], &bars[1]) {
                        Some(v) => info!(
                            symbol = %self.symbol,
                            exhausted = %v.exhausted,
                            "Vayas pattern: trend exhaustion"
                        ),
                        None => debug!(symbol = %self.symbol, "No vayas pattern"),
                    }
                }
            }
        }
        if self.tuning.crt_use_engulfing {
            if let Ok(bars) = gateway
                .rates(&self.symbol, self.tuning.crt_entry_timeframe, 2)
                .await
            {
                if bars.len() >= 2 {
                    if let Some(e) = confirmation::engulfing(&bars[0], &bars[1]) {
                        info!(
                            symbol = %self.symbol,
                            direction = %e.direction,
                            "Engulfing confirmation candle"
                        );
                    }
                }
            }
        }
    }

    async fn detect_htf(
        &self,
        strategy: StrategyKind,
        gateway: &Arc<dyn BrokerGateway>,
        reader: &CandleReader,
        now: DateTime<Utc>,
    ) -> Result<Option<HtfSignal>> {
        match strategy {
            StrategyKind::Default => Ok(None),
            StrategyKind::TurtleSoup => {
                let Some((c1, c5)) = self.key_candles(reader, Timeframe::H4, now).await? else {
                    return Ok(None);
                };
                let c9 = match self.key_candle(reader, Timeframe::H4, 9, now).await? {
                    Some(bar) => bar,
                    None => return Ok(None),
                };
                Ok(turtle_soup::detect(&c1, &c5, &c9).map(|s| s.into_signal(&c1, &c5, &c9)))
            }
            StrategyKind::CrtContinuation => {
                let Some((c1, c5)) = self.crt_candles(gateway, reader, now).await? else {
                    return Ok(None);
                };
                Ok(crt_continuation::detect(&c1, &c5).map(|s| s.into_signal(&c1, &c5)))
            }
            StrategyKind::CrtRevision => {
                let Some((c1, c5)) = self.crt_candles(gateway, reader, now).await? else {
                    return Ok(None);
                };
                Ok(crt_revision::detect(&c1, &c5).map(|s| s.into_signal(&c1, &c5)))
            }
            StrategyKind::CrtExtreme => {
                let Some((c1, c5)) = self.crt_candles(gateway, reader, now).await? else {
                    return Ok(None);
                };
                Ok(crt_extreme::detect(&c1, &c5).map(|s| s.into_signal(&c1, &c5)))
            }
            StrategyKind::DailyLevels => {
                let lookback = self.tuning.crt_lookback.max(1);
                let bars = gateway
                    .rates(&self.symbol, Timeframe::D1, lookback + 1)
                    .await?;
                if bars.len() < 2 {
                    return Ok(None);
                }
                // The last daily bar is forming; levels come from closed days.
                let previous = &bars[..bars.len() - 1];
                let info = gateway.symbol_info(&self.symbol).await?;
                let tick = gateway.tick(&self.symbol).await?;
                let tolerance = info.pip() * self.tuning.level_tolerance_pips;
                Ok(daily_levels::detect(previous, tick.bid, tolerance).map(|l| l.into_signal()))
            }
        }
    }

    /// The 1 AM and 5 AM key candles on the strategy's high timeframe. On
    /// D1 there are no intraday anchors; the two most recent closed daily
    /// bars play the c1/c5 roles.
    async fn crt_candles(
        &self,
        gateway: &Arc<dyn BrokerGateway>,
        reader: &CandleReader,
        now: DateTime<Utc>,
    ) -> Result<Option<(common::Bar, common::Bar)>> {
        match self.tuning.crt_high_timeframe {
            Timeframe::D1 => {
                let bars = gateway.rates(&self.symbol, Timeframe::D1, 3).await?;
                if bars.len() < 3 {
                    return Ok(None);
                }
                Ok(Some((
                    bars[bars.len() - 3].clone(),
                    bars[bars.len() - 2].clone(),
                )))
            }
            timeframe => self.key_candles(reader, timeframe, now).await,
        }
    }

    async fn key_candles(
        &self,
        reader: &CandleReader,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<Option<(common::Bar, common::Bar)>> {
        let Some(c1) = self.key_candle(reader, timeframe, 1, now).await? else {
            return Ok(None);
        };
        let Some(c5) = self.key_candle(reader, timeframe, 5, now).await? else {
            return Ok(None);
        };
        Ok(Some((c1, c5)))
    }

    async fn key_candle(
        &self,
        reader: &CandleReader,
        timeframe: Timeframe,
        ny_hour: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<common::Bar>> {
        let anchor = CandleAnchor::Clock(NaiveTime::from_hms_opt(ny_hour, 0, 0).expect("valid"));
        match reader.get_candle(&self.symbol, timeframe, anchor, now).await {
            Ok(bar) => Ok(Some(bar)),
            Err(Error::InsufficientHistory(reason)) => {
                debug!(symbol = %self.symbol, %reason, "Key candle unavailable");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        strategy: StrategyKind,
        signal: &HtfSignal,
        fvg: &Fvg,
        tick: common::Tick,
        gateway: &Arc<dyn BrokerGateway>,
        ledger: Option<&OrderLedger>,
        now: DateTime<Utc>,
    ) -> Result<PipelineOutcome> {
        // Daily caps come from the durable ledger so they survive restarts.
        if let Some(ledger) = ledger {
            let day_start = ny_day_start(now);
            let trades_today = ledger.count_today(day_start, None).await?;
            if trades_today >= self.risk.max_trades_per_day {
                info!(
                    symbol = %self.symbol,
                    trades_today,
                    limit = self.risk.max_trades_per_day,
                    "Daily trade limit reached"
                );
                return Ok(PipelineOutcome::default());
            }
            if self.risk.close_day_on_first_tp && ledger.first_tp_today(day_start, None).await? {
                info!(symbol = %self.symbol, "First trade closed on TP, done for the day");
                return Ok(PipelineOutcome::default());
            }
        }

        if !gateway
            .open_positions(Some(&self.symbol))
            .await?
            .is_empty()
        {
            debug!(symbol = %self.symbol, "Position already open, not re-entering");
            return Ok(PipelineOutcome::default());
        }

        let account = gateway.account().await?;
        let info = gateway.symbol_info(&self.symbol).await?;
        if !account.trade_allowed || !info.trade_enabled {
            warn!(symbol = %self.symbol, "AutoTrading not permitted by the terminal");
            return Ok(PipelineOutcome::default());
        }

        let plan = sizing::plan_levels(
            signal.direction,
            tick,
            fvg,
            signal.target_price,
            self.tuning.min_rr,
        )?;
        if plan.risk < info.stop_distance() {
            return Err(Error::Validation(format!(
                "stop {:.5} too close to entry {:.5} for the broker's stop level",
                plan.stop_loss, plan.entry
            )));
        }

        let volume = sizing::position_volume(
            account.equity,
            self.risk.risk_per_trade_percent,
            plan.risk,
            &info,
            self.risk.max_position_size,
        )?;

        let request = OrderRequest {
            symbol: self.symbol.clone(),
            side: plan.side,
            volume,
            price: None,
            stop_loss: Some(info.normalize_price(plan.stop_loss)),
            take_profit: Some(info.normalize_price(plan.take_profit)),
            comment: format!("{} {} FVG", strategy, self.tuning.crt_entry_timeframe),
        };

        let receipt = gateway.send_order(&request).await?;
        info!(
            symbol = %self.symbol,
            strategy = %strategy,
            side = %plan.side,
            ticket = receipt.ticket,
            entry = receipt.fill_price,
            sl = request.stop_loss.unwrap_or_default(),
            tp = request.take_profit.unwrap_or_default(),
            volume = receipt.volume,
            rr = plan.rr,
            "Order executed"
        );

        if let Some(ledger) = ledger {
            let context = serde_json::json!({
                "pattern": signal.context,
                "fvg": fvg.context_json(),
                "tick": { "bid": tick.bid, "ask": tick.ask },
            });
            let record = NewOrder {
                ticket: receipt.ticket,
                symbol: self.symbol.clone(),
                side: plan.side,
                entry: receipt.fill_price,
                volume: receipt.volume,
                stop_loss: request.stop_loss.unwrap_or_default(),
                take_profit: request.take_profit.unwrap_or_default(),
                strategy: strategy.name().to_string(),
                risk_reward: plan.rr,
                comment: request.comment.clone(),
                extra: context,
            };
            if let Err(e) = ledger.insert_open(&record, now).await {
                warn!(ticket = receipt.ticket, error = %e, "Ledger write failed, broker remains truth");
            }
            if let Err(e) = ledger
                .log(
                    "INFO",
                    "pipeline",
                    "order executed",
                    Some(&self.symbol),
                    Some(strategy.name()),
                    Some(record.extra.clone()),
                )
                .await
            {
                debug!(error = %e, "Ledger log write failed");
            }
        }

        Ok(PipelineOutcome {
            cadence: CadenceRequest::None,
            executed: Some(ExecutedOrder {
                ticket: receipt.ticket,
                symbol: self.symbol.clone(),
                strategy,
                entry: receipt.fill_price,
                stop_loss: request.stop_loss.unwrap_or_default(),
                take_profit: request.take_profit.unwrap_or_default(),
                volume: receipt.volume,
                rr: plan.rr,
            }),
        })
    }

    fn clear_monitoring(&mut self) {
        self.intensive = false;
        self.intermediate = false;
    }
}

/// Midnight of the current New-York date, as UTC. Daily caps and the
/// flat-all guard both count from here.
pub fn ny_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::TimeZone;
    let local = now.with_timezone(&New_York).date_naive();
    New_York
        .from_local_datetime(&local.and_hms_opt(0, 0, 0).expect("midnight"))
        .earliest()
        .expect("NY midnight always exists")
        .with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use common::Bar;
    use paper::SimBroker;

    const SYMBOL: &str = "EURUSD";

    // 2025-01-15 (EST, UTC-5): 1am NY = 06:00 UTC, 5am = 10:00, 9am = 14:00.
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 15, 0, 0).unwrap()
    }

    fn h4(open: f64, high: f64, low: f64, close: f64, hour: u32) -> Bar {
        Bar {
            symbol: SYMBOL.into(),
            timeframe: Timeframe::H4,
            open_time: NaiveDate::from_ymd_opt(2025, 1, 15)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            open,
            high,
            low,
            close,
            volume: 1000,
        }
    }

    fn m5(open: f64, high: f64, low: f64, close: f64, minute: u32) -> Bar {
        Bar {
            symbol: SYMBOL.into(),
            timeframe: Timeframe::M5,
            open_time: NaiveDate::from_ymd_opt(2025, 1, 15)
                .unwrap()
                .and_hms_opt(14, minute, 0)
                .unwrap(),
            open,
            high,
            low,
            close,
            volume: 100,
        }
    }

    async fn broker() -> Arc<SimBroker> {
        let broker = Arc::new(SimBroker::new(10_000.0));
        broker.add_symbol(SimBroker::fx_symbol(SYMBOL)).await;
        broker
    }

    /// Turtle-soup sweep: 9 AM bar takes out the 1 AM high.
    async fn seed_turtle_soup(broker: &SimBroker) {
        broker
            .set_bars(
                SYMBOL,
                Timeframe::H4,
                vec![
                    h4(1.0975, 1.1000, 1.0950, 1.0985, 6),
                    h4(1.0985, 1.0990, 1.0960, 1.0970, 10),
                    h4(1.0970, 1.1005, 1.0980, 1.0990, 14),
                ],
            )
            .await;
    }

    /// Bearish M5 gap [1.0985, 1.0988], touched, price exited below.
    async fn seed_confirmed_bearish_fvg(broker: &SimBroker) {
        broker
            .set_bars(
                SYMBOL,
                Timeframe::M5,
                vec![
                    m5(1.0992, 1.0995, 1.0988, 1.0990, 40),
                    m5(1.0990, 1.0991, 1.0984, 1.0985, 45),
                    m5(1.0985, 1.0986, 1.0983, 1.0984, 50),
                ],
            )
            .await;
        broker.set_tick(SYMBOL, 1.0984, 1.09842).await;
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(
            SYMBOL,
            StrategyTuning::default(),
            RiskConfig::default(),
            NewsConfig::default(),
        )
    }

    fn reader(gateway: Arc<SimBroker>) -> CandleReader {
        // Offset pinned to zero: broker-naive times equal UTC in tests.
        CandleReader::new(gateway, chrono_tz::America::New_York, Some(0))
    }

    fn open_gate() -> NewsGate {
        NewsGate::from_events(Vec::new(), now() - Duration::hours(1))
    }

    async fn ledger() -> ledger::OrderLedger {
        ledger::OrderLedger::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn turtle_soup_short_executes_with_min_rr() {
        let broker = broker().await;
        seed_turtle_soup(&broker).await;
        seed_confirmed_bearish_fvg(&broker).await;

        let gateway: Arc<dyn BrokerGateway> = broker.clone();
        let reader = reader(broker.clone());
        let ledger = ledger().await;
        let gate = open_gate();
        let mut pipeline = pipeline();

        let outcome = pipeline
            .run(
                StrategyKind::TurtleSoup,
                &gateway,
                &reader,
                &gate,
                Some(&ledger),
                now(),
            )
            .await;

        let executed = outcome.executed.expect("order should fire");
        assert_eq!(executed.strategy, StrategyKind::TurtleSoup);
        assert!((executed.entry - 1.0984).abs() < 1e-6);
        // TP at the swept 1 AM low, SL one gap-size above the gap top.
        assert!((executed.take_profit - 1.0950).abs() < 1e-6);
        assert!(executed.stop_loss > 1.0988);
        assert!(executed.rr >= 2.0);

        // Mirrored into the ledger and live at the broker.
        let rows = ledger.list_open().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ticket as u64, executed.ticket);
        assert_eq!(rows[0].strategy, "turtle_soup_fvg");
        assert_eq!(broker.open_positions(None).await.unwrap().len(), 1);

        // Invariants on every emitted order.
        assert!(executed.rr >= 2.0);
        let steps = executed.volume / 0.01;
        assert!((steps - steps.round()).abs() < 1e-6);
    }

    #[tokio::test]
    async fn unconfirmed_fvg_requests_intensive_monitoring() {
        let broker = broker().await;
        seed_turtle_soup(&broker).await;
        broker
            .set_bars(
                SYMBOL,
                Timeframe::M5,
                vec![
                    m5(1.0992, 1.0995, 1.0988, 1.0990, 40),
                    m5(1.0990, 1.0991, 1.0984, 1.0985, 45),
                    m5(1.0985, 1.0987, 1.0983, 1.0986, 50),
                ],
            )
            .await;
        // Price still inside the gap: confirmation pending.
        broker.set_tick(SYMBOL, 1.0986, 1.09862).await;

        let gateway: Arc<dyn BrokerGateway> = broker.clone();
        let reader = reader(broker.clone());
        let gate = open_gate();
        let mut pipeline = pipeline();

        let outcome = pipeline
            .run(StrategyKind::TurtleSoup, &gateway, &reader, &gate, None, now())
            .await;
        assert_eq!(outcome.cadence, CadenceRequest::Intensive);
        assert!(outcome.executed.is_none());
    }

    #[tokio::test]
    async fn missing_fvg_requests_intermediate_monitoring() {
        let broker = broker().await;
        seed_turtle_soup(&broker).await;
        // Overlapping M5 bars: no gap at all.
        broker
            .set_bars(
                SYMBOL,
                Timeframe::M5,
                vec![
                    m5(1.0990, 1.0995, 1.0985, 1.0992, 40),
                    m5(1.0992, 1.0996, 1.0988, 1.0990, 45),
                    m5(1.0990, 1.0994, 1.0986, 1.0989, 50),
                ],
            )
            .await;
        broker.set_tick(SYMBOL, 1.0989, 1.09892).await;

        let gateway: Arc<dyn BrokerGateway> = broker.clone();
        let reader = reader(broker.clone());
        let gate = open_gate();
        let mut pipeline = pipeline();

        let outcome = pipeline
            .run(StrategyKind::TurtleSoup, &gateway, &reader, &gate, None, now())
            .await;
        assert_eq!(outcome.cadence, CadenceRequest::Intermediate);
    }

    #[tokio::test]
    async fn wrong_kind_fvg_is_not_an_entry() {
        let broker = broker().await;
        seed_turtle_soup(&broker).await; // direction Bearish
        // Bullish gap instead of the required bearish one.
        broker
            .set_bars(
                SYMBOL,
                Timeframe::M5,
                vec![
                    m5(1.0975, 1.0980, 1.0970, 1.0978, 40),
                    m5(1.0978, 1.0990, 1.0976, 1.0988, 45),
                    m5(1.0988, 1.0995, 1.0985, 1.0992, 50),
                ],
            )
            .await;
        broker.set_tick(SYMBOL, 1.0992, 1.09922).await;

        let gateway: Arc<dyn BrokerGateway> = broker.clone();
        let reader = reader(broker.clone());
        let gate = open_gate();
        let mut pipeline = pipeline();

        let outcome = pipeline
            .run(StrategyKind::TurtleSoup, &gateway, &reader, &gate, None, now())
            .await;
        assert_eq!(outcome.cadence, CadenceRequest::Intermediate);
        assert!(outcome.executed.is_none());
    }

    #[tokio::test]
    async fn news_window_blocks_stage_one() {
        let broker = broker().await;
        seed_turtle_soup(&broker).await;
        seed_confirmed_bearish_fvg(&broker).await;

        let gateway: Arc<dyn BrokerGateway> = broker.clone();
        let reader = reader(broker.clone());
        // High-impact event 3 minutes from now.
        let event = common::NewsEvent {
            time: now() + Duration::minutes(3),
            currency: "USD".into(),
            title: "CPI".into(),
            impact: 3,
            is_holiday: false,
            actual: None,
            forecast: None,
            previous: None,
        };
        let gate = NewsGate::from_events(vec![event], now() - Duration::hours(1));
        let mut pipeline = pipeline();

        let outcome = pipeline
            .run(StrategyKind::TurtleSoup, &gateway, &reader, &gate, None, now())
            .await;
        assert!(outcome.executed.is_none());
        assert_eq!(outcome.cadence, CadenceRequest::None);
        assert!(broker.open_positions(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn daily_trade_limit_suppresses_orders() {
        let broker = broker().await;
        seed_turtle_soup(&broker).await;
        seed_confirmed_bearish_fvg(&broker).await;

        let gateway: Arc<dyn BrokerGateway> = broker.clone();
        let reader = reader(broker.clone());
        let ledger = ledger().await;
        for ticket in [1, 2] {
            ledger
                .insert_open(
                    &ledger::NewOrder {
                        ticket,
                        symbol: SYMBOL.into(),
                        side: common::OrderSide::Sell,
                        entry: 1.1,
                        volume: 0.1,
                        stop_loss: 1.11,
                        take_profit: 1.08,
                        strategy: "turtle_soup_fvg".into(),
                        risk_reward: 2.0,
                        comment: String::new(),
                        extra: serde_json::json!({}),
                    },
                    now() - Duration::hours(2),
                )
                .await
                .unwrap();
        }
        let gate = open_gate();
        let mut pipeline = pipeline(); // max_trades_per_day = 2

        let outcome = pipeline
            .run(
                StrategyKind::TurtleSoup,
                &gateway,
                &reader,
                &gate,
                Some(&ledger),
                now(),
            )
            .await;
        assert!(outcome.executed.is_none());
        assert!(broker.open_positions(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_position_on_symbol_blocks_reentry() {
        let broker = broker().await;
        seed_turtle_soup(&broker).await;
        seed_confirmed_bearish_fvg(&broker).await;
        broker
            .send_order(&OrderRequest {
                symbol: SYMBOL.into(),
                side: common::OrderSide::Sell,
                volume: 0.1,
                price: None,
                stop_loss: None,
                take_profit: None,
                comment: "pre-existing".into(),
            })
            .await
            .unwrap();

        let gateway: Arc<dyn BrokerGateway> = broker.clone();
        let reader = reader(broker.clone());
        let gate = open_gate();
        let mut pipeline = pipeline();

        let outcome = pipeline
            .run(StrategyKind::TurtleSoup, &gateway, &reader, &gate, None, now())
            .await;
        assert!(outcome.executed.is_none());
        assert_eq!(broker.open_positions(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalidated_pattern_clears_intensive_state() {
        let broker = broker().await;
        seed_turtle_soup(&broker).await;
        broker
            .set_bars(
                SYMBOL,
                Timeframe::M5,
                vec![
                    m5(1.0992, 1.0995, 1.0988, 1.0990, 40),
                    m5(1.0990, 1.0991, 1.0984, 1.0985, 45),
                    m5(1.0985, 1.0987, 1.0983, 1.0986, 50),
                ],
            )
            .await;
        broker.set_tick(SYMBOL, 1.0986, 1.09862).await;

        let gateway: Arc<dyn BrokerGateway> = broker.clone();
        let reader = reader(broker.clone());
        let gate = open_gate();
        let mut pipeline = pipeline();

        let outcome = pipeline
            .run(StrategyKind::TurtleSoup, &gateway, &reader, &gate, None, now())
            .await;
        assert_eq!(outcome.cadence, CadenceRequest::Intensive);

        // The 9 AM bar no longer sweeps anything: pattern invalidated.
        broker
            .set_bars(
                SYMBOL,
                Timeframe::H4,
                vec![
                    h4(1.0975, 1.1000, 1.0950, 1.0985, 6),
                    h4(1.0985, 1.0990, 1.0960, 1.0970, 10),
                    h4(1.0970, 1.0995, 1.0980, 1.0990, 14),
                ],
            )
            .await;
        let outcome = pipeline
            .run(StrategyKind::TurtleSoup, &gateway, &reader, &gate, None, now())
            .await;
        assert_eq!(outcome.cadence, CadenceRequest::None);
    }

    #[tokio::test]
    async fn crt_continuation_long_forces_target_to_min_rr() {
        let broker = broker().await;
        // Seed scenario 2 key candles.
        broker
            .set_bars(
                SYMBOL,
                Timeframe::H4,
                vec![
                    h4(1.10800, 1.11000, 1.10700, 1.10900, 6),
                    h4(1.11020, 1.11150, 1.11000, 1.11120, 10),
                    h4(1.11120, 1.11140, 1.11000, 1.11060, 14),
                ],
            )
            .await;
        // Bullish M5 gap [1.11000, 1.11050] entered and exited upward.
        broker
            .set_bars(
                SYMBOL,
                Timeframe::M5,
                vec![
                    m5(1.10980, 1.11000, 1.10960, 1.10990, 40),
                    m5(1.10990, 1.11070, 1.10985, 1.11060, 45),
                    m5(1.11060, 1.11070, 1.11050, 1.11060, 50),
                ],
            )
            .await;
        broker.set_tick(SYMBOL, 1.11060, 1.11062).await;

        let gateway: Arc<dyn BrokerGateway> = broker.clone();
        let reader = reader(broker.clone());
        let gate = open_gate();
        let mut pipeline = pipeline();

        let outcome = pipeline
            .run(
                StrategyKind::CrtContinuation,
                &gateway,
                &reader,
                &gate,
                None,
                now(),
            )
            .await;

        let executed = outcome.executed.expect("order should fire");
        assert_eq!(executed.strategy, StrategyKind::CrtContinuation);
        // Raw rr to the 1.11150 target is below 2, so the target extends.
        assert!(executed.take_profit > 1.11150);
        assert!((executed.rr - 2.0).abs() < 1e-9);
    }
}
