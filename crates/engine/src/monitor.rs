//! Position monitor: ledger/broker reconciliation, the hard end-of-day
//! flat-all, and trailing-stop advancement. Runs every cycle, including
//! while analysis is suspended.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, error, info, warn};

use common::config::{parse_hhmm, parse_zone, AutoCloseConfig, TrailingStopConfig};
use common::{BrokerGateway, CloseReason, OrderSide, Position, Result};
use ledger::OrderLedger;

#[derive(Debug, Default)]
pub struct MonitorReport {
    pub open_count: usize,
    /// Tickets closed by the flat-all pass this cycle.
    pub auto_closed: Vec<u64>,
    /// Tickets whose stop was advanced this cycle.
    pub trailed: Vec<u64>,
    /// Tickets reconciled from broker history into the ledger.
    pub reconciled: Vec<u64>,
}

pub struct PositionMonitor {
    gateway: Arc<dyn BrokerGateway>,
    ledger: Option<OrderLedger>,
    trailing: TrailingStopConfig,
    auto_close_enabled: bool,
    flat_time: NaiveTime,
    flat_zone: Tz,
    /// Date (in the flat zone) of the last fully successful flatten.
    flattened_on: Option<NaiveDate>,
}

impl PositionMonitor {
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        ledger: Option<OrderLedger>,
        trailing: &TrailingStopConfig,
        auto_close: &AutoCloseConfig,
    ) -> Result<Self> {
        Ok(Self {
            gateway,
            ledger,
            trailing: trailing.clone(),
            auto_close_enabled: auto_close.enabled,
            flat_time: parse_hhmm(&auto_close.time)?,
            flat_zone: parse_zone(&auto_close.timezone)?,
            flattened_on: None,
        })
    }

    /// One monitor cycle: reconcile, then flat-all if due, then trail.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> MonitorReport {
        let mut report = MonitorReport::default();

        let mut positions = match self.gateway.open_positions(None).await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "Cannot list broker positions, skipping monitor cycle");
                return report;
            }
        };

        if let Err(e) = self.reconcile(&positions, now, &mut report).await {
            warn!(error = %e, "Reconciliation incomplete");
        }

        if self.flat_due(now) {
            self.flatten_all(&positions, now, &mut report).await;
            // Whatever survived the flatten still gets its stops managed.
            positions = match self.gateway.open_positions(None).await {
                Ok(positions) => positions,
                Err(_) => Vec::new(),
            };
        }

        if self.trailing.enabled {
            for position in &positions {
                match self.trail_position(position).await {
                    Ok(true) => report.trailed.push(position.ticket),
                    Ok(false) => {}
                    Err(e) => {
                        warn!(ticket = position.ticket, error = %e, "Trailing-stop update failed")
                    }
                }
            }
        }

        report.open_count = positions.len();
        report
    }

    /// Mark ledger rows closed for every ticket the broker no longer
    /// reports open, inferring why it closed from the historical deal.
    /// Re-running against an unchanged broker state is a no-op.
    async fn reconcile(
        &self,
        broker_open: &[Position],
        now: DateTime<Utc>,
        report: &mut MonitorReport,
    ) -> Result<()> {
        let Some(ledger) = &self.ledger else {
            return Ok(());
        };

        for row in ledger.list_open().await? {
            let ticket = row.ticket as u64;
            if broker_open.iter().any(|p| p.ticket == ticket) {
                continue;
            }

            let deal = match self.gateway.history_deal(ticket).await {
                Ok(Some(deal)) => deal,
                Ok(None) => {
                    debug!(ticket, "No historical deal yet, retrying next cycle");
                    continue;
                }
                Err(e) => {
                    warn!(ticket, error = %e, "Deal lookup failed");
                    continue;
                }
            };

            let reason = self.infer_close_reason(&row, deal.close_price, deal.close_time);
            match ledger
                .mark_closed(ticket, deal.close_price, reason, deal.close_time)
                .await
            {
                Ok(true) => {
                    info!(
                        ticket,
                        symbol = %row.symbol,
                        reason = %reason,
                        close_price = deal.close_price,
                        "Ledger synchronized with broker close"
                    );
                    report.reconciled.push(ticket);
                    let _ = ledger
                        .log(
                            "INFO",
                            "monitor",
                            "order closed at broker",
                            Some(&row.symbol),
                            Some(&row.strategy),
                            Some(serde_json::json!({
                                "ticket": ticket,
                                "reason": reason.to_string(),
                                "close_price": deal.close_price,
                                "observed_at": now.to_rfc3339(),
                            })),
                        )
                        .await;
                }
                Ok(false) => {}
                Err(e) => warn!(ticket, error = %e, "Ledger close write failed"),
            }
        }
        Ok(())
    }

    /// TP/SL by price proximity; the flat-all window overrides both, and
    /// anything else was closed by hand.
    fn infer_close_reason(
        &self,
        row: &ledger::OrderRow,
        close_price: f64,
        close_time: DateTime<Utc>,
    ) -> CloseReason {
        if self.auto_close_enabled
            && close_time.with_timezone(&self.flat_zone).time() >= self.flat_time
        {
            return CloseReason::AutoClose;
        }
        // One part in ten thousand of the entry covers a pip on anything
        // the bot trades.
        let tolerance = (row.entry.abs() * 1e-4).max(f64::EPSILON);
        if (close_price - row.take_profit).abs() <= tolerance {
            CloseReason::Tp
        } else if (close_price - row.stop_loss).abs() <= tolerance {
            CloseReason::Sl
        } else {
            CloseReason::Manual
        }
    }

    fn flat_due(&self, now: DateTime<Utc>) -> bool {
        if !self.auto_close_enabled {
            return false;
        }
        let local = now.with_timezone(&self.flat_zone);
        if local.time() < self.flat_time {
            return false;
        }
        self.flattened_on != Some(local.date_naive())
    }

    /// Close everything, retrying failed tickets on subsequent cycles
    /// until the day's guard is set. Transient failures never give up the
    /// flatten: the guard only latches once every close succeeded.
    async fn flatten_all(
        &mut self,
        positions: &[Position],
        now: DateTime<Utc>,
        report: &mut MonitorReport,
    ) {
        let today = now.with_timezone(&self.flat_zone).date_naive();
        let mut all_closed = true;

        for position in positions {
            match self.gateway.close(position.ticket).await {
                Ok(fill) => {
                    info!(
                        ticket = position.ticket,
                        symbol = %position.symbol,
                        close_price = fill.close_price,
                        "Position flattened at end of day"
                    );
                    report.auto_closed.push(position.ticket);
                    if let Some(ledger) = &self.ledger {
                        if let Err(e) = ledger
                            .mark_closed(position.ticket, fill.close_price, CloseReason::AutoClose, now)
                            .await
                        {
                            warn!(ticket = position.ticket, error = %e, "Ledger close write failed");
                        }
                    }
                }
                Err(e) => {
                    all_closed = false;
                    error!(
                        ticket = position.ticket,
                        symbol = %position.symbol,
                        error = %e,
                        "Flatten failed, will retry next cycle"
                    );
                }
            }
        }

        if all_closed {
            self.flattened_on = Some(today);
            if !positions.is_empty() {
                info!(count = positions.len(), "End-of-day flatten complete");
            }
        }
    }

    /// Advance the stop to lock in half the move once price has covered
    /// the trigger fraction of the entry→TP distance. Only ever moves the
    /// stop in the trade's favor, and respects the broker's minimum stop
    /// distance from the market.
    async fn trail_position(&self, position: &Position) -> Result<bool> {
        if position.take_profit <= 0.0 {
            return Ok(false);
        }

        let total_move = match position.side {
            OrderSide::Buy => position.take_profit - position.entry,
            OrderSide::Sell => position.entry - position.take_profit,
        };
        if total_move <= 0.0 {
            return Ok(false);
        }

        let covered = match position.side {
            OrderSide::Buy => position.current_price - position.entry,
            OrderSide::Sell => position.entry - position.current_price,
        };
        let progress = (covered / total_move).clamp(0.0, 1.0);
        if progress < self.trailing.trigger_percent {
            return Ok(false);
        }

        let new_stop = match position.side {
            OrderSide::Buy => position.entry + total_move * self.trailing.sl_percent,
            OrderSide::Sell => position.entry - total_move * self.trailing.sl_percent,
        };

        let improves = match position.side {
            OrderSide::Buy => position.stop_loss <= 0.0 || new_stop > position.stop_loss,
            OrderSide::Sell => position.stop_loss <= 0.0 || new_stop < position.stop_loss,
        };
        if !improves {
            return Ok(false);
        }

        let info = self.gateway.symbol_info(&position.symbol).await?;
        let min_distance = info.stop_distance();
        let far_enough = match position.side {
            OrderSide::Buy => position.current_price - new_stop >= min_distance,
            OrderSide::Sell => new_stop - position.current_price >= min_distance,
        };
        if !far_enough {
            debug!(
                ticket = position.ticket,
                new_stop, "Trailing stop inside the broker's stop level, skipped"
            );
            return Ok(false);
        }

        let new_stop = info.normalize_price(new_stop);
        self.gateway
            .modify(position.ticket, new_stop, position.take_profit)
            .await?;
        info!(
            ticket = position.ticket,
            symbol = %position.symbol,
            progress_pct = progress * 100.0,
            old_sl = position.stop_loss,
            new_sl = new_stop,
            "Trailing stop advanced"
        );
        if let Some(ledger) = &self.ledger {
            let _ = ledger
                .log(
                    "INFO",
                    "monitor",
                    "trailing stop advanced",
                    Some(&position.symbol),
                    None,
                    Some(serde_json::json!({
                        "ticket": position.ticket,
                        "old_sl": position.stop_loss,
                        "new_sl": new_stop,
                        "progress": progress,
                    })),
                )
                .await;
        }
        Ok(true)
    }
}
