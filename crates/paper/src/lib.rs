use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    AccountInfo, Bar, BrokerGateway, ClosedFill, Deal, Error, OrderReceipt, OrderRequest,
    OrderSide, Position, Result, SymbolInfo, Tick, Timeframe,
};

/// Simulated broker terminal.
///
/// Fills at the current quote, assigns sequential tickets, and keeps closed
/// positions as historical deals. No real orders are ever sent. Used for
/// paper mode and as the gateway double in tests: symbol metadata, quotes,
/// and bar history are all injectable.
pub struct SimBroker {
    equity: RwLock<f64>,
    symbols: RwLock<HashMap<String, SymbolInfo>>,
    ticks: RwLock<HashMap<String, Tick>>,
    bars: RwLock<HashMap<(String, Timeframe), Vec<Bar>>>,
    positions: RwLock<Vec<Position>>,
    deals: RwLock<HashMap<u64, Deal>>,
    next_ticket: AtomicU64,
    online: AtomicBool,
}

impl SimBroker {
    pub fn new(equity: f64) -> Self {
        info!(equity, "SimBroker initialized");
        Self {
            equity: RwLock::new(equity),
            symbols: RwLock::new(HashMap::new()),
            ticks: RwLock::new(HashMap::new()),
            bars: RwLock::new(HashMap::new()),
            positions: RwLock::new(Vec::new()),
            deals: RwLock::new(HashMap::new()),
            next_ticket: AtomicU64::new(1000),
            online: AtomicBool::new(true),
        }
    }

    /// Five-digit FX defaults for a symbol.
    pub fn fx_symbol(name: &str) -> SymbolInfo {
        SymbolInfo {
            name: name.to_string(),
            digits: 5,
            point: 0.00001,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
            stop_level_points: 10,
            contract_size: 100_000.0,
            trade_enabled: true,
        }
    }

    pub async fn add_symbol(&self, info: SymbolInfo) {
        self.symbols.write().await.insert(info.name.clone(), info);
    }

    pub async fn set_tick(&self, symbol: &str, bid: f64, ask: f64) {
        self.ticks
            .write()
            .await
            .insert(symbol.to_string(), Tick { bid, ask });
        for position in self.positions.write().await.iter_mut() {
            if position.symbol == symbol {
                position.current_price = match position.side {
                    OrderSide::Buy => bid,
                    OrderSide::Sell => ask,
                };
            }
        }
    }

    /// Replace the bar history for one (symbol, timeframe), oldest first.
    pub async fn set_bars(&self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) {
        self.bars
            .write()
            .await
            .insert((symbol.to_string(), timeframe), bars);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Terminal-side settlement: the position leaves the market at `price`
    /// (TP/SL hit, or a manual close in the terminal) without the bot
    /// having asked for it.
    pub async fn settle(&self, ticket: u64, price: f64) {
        self.settle_at(ticket, price, Utc::now()).await;
    }

    /// `settle` with an explicit close time, for tests that pin the clock.
    pub async fn settle_at(&self, ticket: u64, price: f64, at: chrono::DateTime<Utc>) {
        let mut positions = self.positions.write().await;
        if let Some(idx) = positions.iter().position(|p| p.ticket == ticket) {
            let position = positions.remove(idx);
            let profit = match position.side {
                OrderSide::Buy => (price - position.entry) * position.volume,
                OrderSide::Sell => (position.entry - price) * position.volume,
            };
            self.deals.write().await.insert(
                ticket,
                Deal {
                    ticket,
                    close_price: price,
                    close_time: at,
                    profit,
                },
            );
        }
    }

    fn check_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Gateway("simulated terminal offline".into()))
        }
    }
}

#[async_trait]
impl BrokerGateway for SimBroker {
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo> {
        self.check_online()?;
        self.symbols
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or_else(|| Error::Gateway(format!("unknown symbol '{symbol}'")))
    }

    async fn tick(&self, symbol: &str) -> Result<Tick> {
        self.check_online()?;
        self.ticks
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| Error::Gateway(format!("no quote for '{symbol}'")))
    }

    async fn rates(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>> {
        self.check_online()?;
        let bars = self.bars.read().await;
        let history = bars
            .get(&(symbol.to_string(), timeframe))
            .cloned()
            .unwrap_or_default();
        let start = history.len().saturating_sub(count);
        Ok(history[start..].to_vec())
    }

    async fn account(&self) -> Result<AccountInfo> {
        self.check_online()?;
        Ok(AccountInfo {
            equity: *self.equity.read().await,
            trade_allowed: true,
        })
    }

    async fn send_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        self.check_online()?;
        let tick = self.tick(&request.symbol).await?;
        let fill_price = request.price.unwrap_or(match request.side {
            OrderSide::Buy => tick.ask,
            OrderSide::Sell => tick.bid,
        });

        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        debug!(
            symbol = %request.symbol,
            side = %request.side,
            volume = request.volume,
            fill = fill_price,
            ticket,
            "Simulated fill"
        );

        self.positions.write().await.push(Position {
            ticket,
            symbol: request.symbol.clone(),
            side: request.side,
            volume: request.volume,
            entry: fill_price,
            current_price: fill_price,
            stop_loss: request.stop_loss.unwrap_or(0.0),
            take_profit: request.take_profit.unwrap_or(0.0),
            profit: 0.0,
            opened_at: Utc::now(),
        });

        Ok(OrderReceipt {
            ticket,
            fill_price,
            volume: request.volume,
        })
    }

    async fn modify(&self, ticket: u64, stop_loss: f64, take_profit: f64) -> Result<()> {
        self.check_online()?;
        let mut positions = self.positions.write().await;
        let position = positions
            .iter_mut()
            .find(|p| p.ticket == ticket)
            .ok_or_else(|| Error::Gateway(format!("position {ticket} not found")))?;
        position.stop_loss = stop_loss;
        position.take_profit = take_profit;
        Ok(())
    }

    async fn close(&self, ticket: u64) -> Result<ClosedFill> {
        self.check_online()?;
        let position = {
            let positions = self.positions.read().await;
            positions
                .iter()
                .find(|p| p.ticket == ticket)
                .cloned()
                .ok_or_else(|| Error::Gateway(format!("position {ticket} not found")))?
        };
        let tick = self.tick(&position.symbol).await?;
        let close_price = match position.side {
            OrderSide::Buy => tick.bid,
            OrderSide::Sell => tick.ask,
        };
        self.settle(ticket, close_price).await;
        Ok(ClosedFill {
            ticket,
            close_price,
        })
    }

    async fn open_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>> {
        self.check_online()?;
        let positions = self.positions.read().await;
        Ok(positions
            .iter()
            .filter(|p| symbol.map_or(true, |s| p.symbol == s))
            .cloned()
            .collect())
    }

    async fn history_deal(&self, ticket: u64) -> Result<Option<Deal>> {
        self.check_online()?;
        Ok(self.deals.read().await.get(&ticket).cloned())
    }

    async fn ping(&self) -> Result<()> {
        self.check_online()
    }
}

/// Paper-trading gateway: live market data from the real terminal, orders
/// routed into a `SimBroker`. The quote is mirrored into the simulator on
/// every read so fills and closes land on the latest price.
pub struct PaperBroker {
    data: Arc<dyn BrokerGateway>,
    sim: SimBroker,
}

impl PaperBroker {
    pub fn new(data: Arc<dyn BrokerGateway>, equity: f64) -> Self {
        Self {
            data,
            sim: SimBroker::new(equity),
        }
    }

    async fn mirror_tick(&self, symbol: &str) -> Result<Tick> {
        let tick = self.data.tick(symbol).await?;
        if self.sim.symbol_info(symbol).await.is_err() {
            let info = self.data.symbol_info(symbol).await?;
            self.sim.add_symbol(info).await;
        }
        self.sim.set_tick(symbol, tick.bid, tick.ask).await;
        Ok(tick)
    }
}

#[async_trait]
impl BrokerGateway for PaperBroker {
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo> {
        self.data.symbol_info(symbol).await
    }

    async fn tick(&self, symbol: &str) -> Result<Tick> {
        self.mirror_tick(symbol).await
    }

    async fn rates(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>> {
        self.data.rates(symbol, timeframe, count).await
    }

    async fn account(&self) -> Result<AccountInfo> {
        self.sim.account().await
    }

    async fn send_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        self.mirror_tick(&request.symbol).await?;
        self.sim.send_order(request).await
    }

    async fn modify(&self, ticket: u64, stop_loss: f64, take_profit: f64) -> Result<()> {
        self.sim.modify(ticket, stop_loss, take_profit).await
    }

    async fn close(&self, ticket: u64) -> Result<ClosedFill> {
        let symbol = self
            .sim
            .open_positions(None)
            .await?
            .iter()
            .find(|p| p.ticket == ticket)
            .map(|p| p.symbol.clone())
            .ok_or_else(|| Error::Gateway(format!("position {ticket} not found")))?;
        self.mirror_tick(&symbol).await?;
        self.sim.close(ticket).await
    }

    async fn open_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>> {
        self.sim.open_positions(symbol).await
    }

    async fn history_deal(&self, ticket: u64) -> Result<Option<Deal>> {
        self.sim.history_deal(ticket).await
    }

    async fn ping(&self) -> Result<()> {
        self.data.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn broker() -> SimBroker {
        let broker = SimBroker::new(10_000.0);
        broker.add_symbol(SimBroker::fx_symbol("EURUSD")).await;
        broker.set_tick("EURUSD", 1.10000, 1.10010).await;
        broker
    }

    fn market_buy(volume: f64) -> OrderRequest {
        OrderRequest {
            symbol: "EURUSD".into(),
            side: OrderSide::Buy,
            volume,
            price: None,
            stop_loss: Some(1.09500),
            take_profit: Some(1.11000),
            comment: "test".into(),
        }
    }

    #[tokio::test]
    async fn buy_fills_at_ask_and_opens_position() {
        let broker = broker().await;
        let receipt = broker.send_order(&market_buy(0.10)).await.unwrap();
        assert!((receipt.fill_price - 1.10010).abs() < 1e-9);

        let open = broker.open_positions(Some("EURUSD")).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].ticket, receipt.ticket);
        assert!((open[0].take_profit - 1.11000).abs() < 1e-9);
    }

    #[tokio::test]
    async fn tickets_are_unique_and_increasing() {
        let broker = broker().await;
        let a = broker.send_order(&market_buy(0.10)).await.unwrap();
        let b = broker.send_order(&market_buy(0.10)).await.unwrap();
        assert!(b.ticket > a.ticket);
    }

    #[tokio::test]
    async fn close_fills_at_bid_and_records_deal() {
        let broker = broker().await;
        let receipt = broker.send_order(&market_buy(0.10)).await.unwrap();
        broker.set_tick("EURUSD", 1.10500, 1.10510).await;

        let fill = broker.close(receipt.ticket).await.unwrap();
        assert!((fill.close_price - 1.10500).abs() < 1e-9);
        assert!(broker
            .open_positions(None)
            .await
            .unwrap()
            .is_empty());

        let deal = broker.history_deal(receipt.ticket).await.unwrap().unwrap();
        assert!((deal.close_price - 1.10500).abs() < 1e-9);
        assert!(deal.profit > 0.0);
    }

    #[tokio::test]
    async fn settle_removes_position_without_close_call() {
        let broker = broker().await;
        let receipt = broker.send_order(&market_buy(0.10)).await.unwrap();
        broker.settle(receipt.ticket, 1.11000).await;

        assert!(broker.open_positions(None).await.unwrap().is_empty());
        assert!(broker.history_deal(receipt.ticket).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn paper_broker_reads_live_data_and_simulates_fills() {
        let live = Arc::new(broker().await);
        let paper = PaperBroker::new(live.clone(), 5_000.0);

        assert!((paper.account().await.unwrap().equity - 5_000.0).abs() < 1e-9);
        assert!((paper.tick("EURUSD").await.unwrap().bid - 1.10000).abs() < 1e-9);

        let receipt = paper.send_order(&market_buy(0.10)).await.unwrap();
        // Filled by the simulator at the live ask.
        assert!((receipt.fill_price - 1.10010).abs() < 1e-9);
        // The live account saw no order.
        assert!(live.open_positions(None).await.unwrap().is_empty());
        assert_eq!(paper.open_positions(None).await.unwrap().len(), 1);

        live.set_tick("EURUSD", 1.10500, 1.10510).await;
        let fill = paper.close(receipt.ticket).await.unwrap();
        assert!((fill.close_price - 1.10500).abs() < 1e-9);
    }

    #[tokio::test]
    async fn offline_terminal_rejects_calls() {
        let broker = broker().await;
        broker.set_online(false);
        assert!(broker.ping().await.is_err());
        assert!(broker.tick("EURUSD").await.is_err());
        broker.set_online(true);
        assert!(broker.ping().await.is_ok());
    }
}
