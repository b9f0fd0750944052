use async_trait::async_trait;

use crate::types::{
    AccountInfo, Bar, ClosedFill, Deal, OrderReceipt, OrderRequest, Position, SymbolInfo, Tick,
    Timeframe,
};
use crate::Result;

/// Abstraction over the broker terminal.
///
/// `Mt5BridgeClient` in `crates/engine` implements this for live trading,
/// `SimBroker` in `crates/paper` for paper mode and tests. The broker is the
/// source of truth for live position state; the ledger only mirrors it.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Instrument metadata: digits, point, volume limits, stop level.
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo>;

    /// Latest bid/ask quote.
    async fn tick(&self, symbol: &str) -> Result<Tick>;

    /// Most recent `count` bars, oldest first. The last bar may be forming.
    async fn rates(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>>;

    /// Account equity and trading permission.
    async fn account(&self) -> Result<AccountInfo>;

    /// Submit a market order and return the fill receipt.
    async fn send_order(&self, request: &OrderRequest) -> Result<OrderReceipt>;

    /// Modify SL/TP on an open position.
    async fn modify(&self, ticket: u64, stop_loss: f64, take_profit: f64) -> Result<()>;

    /// Close an open position at market.
    async fn close(&self, ticket: u64) -> Result<ClosedFill>;

    /// Open positions, optionally filtered by symbol.
    async fn open_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>>;

    /// Historical deal for a ticket that is no longer open.
    async fn history_deal(&self, ticket: u64) -> Result<Option<Deal>>;

    /// Cheap connectivity probe used by the driver's reconnect logic.
    async fn ping(&self) -> Result<()>;
}
