//! REST client for the local MT5 terminal bridge.
//!
//! The terminal itself only speaks its own wire protocol; a small bridge
//! process exposes it over HTTP on localhost. Every call carries a 5 s
//! timeout and is retried a bounded number of times on retryable failures
//! (transport errors and the terminal's "market closed" retcode).

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use common::{
    AccountInfo, Bar, BrokerGateway, ClosedFill, Deal, Error, OrderReceipt, OrderRequest,
    OrderSide, Position, Result, SymbolInfo, Tick, Timeframe,
};

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
const MAX_ATTEMPTS: usize = 3;

pub struct Mt5BridgeClient {
    http: Client,
    base_url: String,
}

impl Mt5BridgeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.into(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut last = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let result = async {
                let response = self
                    .http
                    .get(&url)
                    .query(query)
                    .send()
                    .await
                    .map_err(|e| Error::Gateway(e.to_string()))?;
                decode(response).await
            }
            .await;
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!(path, attempt, error = %e, "Bridge call failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(500 * attempt as u64)).await;
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| Error::Gateway("no response".into())))
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut last = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let result = async {
                let response = self
                    .http
                    .post(&url)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| Error::Gateway(e.to_string()))?;
                decode(response).await
            }
            .await;
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!(path, attempt, error = %e, "Bridge call failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(500 * attempt as u64)).await;
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| Error::Gateway("no response".into())))
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Gateway(e.to_string()))?;
    if !status.is_success() {
        // The bridge reports terminal rejections as a retcode envelope.
        if let Ok(rejection) = serde_json::from_str::<BridgeRejection>(&body) {
            return Err(Error::GatewayRejected {
                retcode: rejection.retcode,
                message: rejection.message,
            });
        }
        return Err(Error::Http(format!("HTTP {status}: {body}")));
    }
    serde_json::from_str(&body).map_err(|e| Error::Gateway(format!("bad bridge payload: {e}")))
}

#[async_trait]
impl BrokerGateway for Mt5BridgeClient {
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo> {
        self.get_json("/symbol_info", &[("symbol", symbol.to_string())])
            .await
    }

    async fn tick(&self, symbol: &str) -> Result<Tick> {
        self.get_json("/tick", &[("symbol", symbol.to_string())]).await
    }

    async fn rates(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>> {
        let rows: Vec<RateRow> = self
            .get_json(
                "/rates",
                &[
                    ("symbol", symbol.to_string()),
                    ("timeframe", timeframe.as_str().to_string()),
                    ("count", count.to_string()),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_bar(symbol, timeframe))
            .collect())
    }

    async fn account(&self) -> Result<AccountInfo> {
        self.get_json("/account", &[]).await
    }

    async fn send_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        // Snap to the terminal's grid before submitting; a misaligned
        // volume or un-normalized price earns an instant rejection.
        let info = self.symbol_info(&request.symbol).await?;
        let body = OrderBody {
            symbol: request.symbol.clone(),
            side: request.side,
            volume: info.snap_volume(request.volume),
            price: request.price.map(|p| info.normalize_price(p)),
            sl: request.stop_loss.map(|p| info.normalize_price(p)),
            tp: request.take_profit.map(|p| info.normalize_price(p)),
            comment: request.comment.clone(),
        };
        debug!(symbol = %body.symbol, side = %body.side, volume = body.volume, "Submitting order");
        self.post_json("/order", &body).await
    }

    async fn modify(&self, ticket: u64, stop_loss: f64, take_profit: f64) -> Result<()> {
        let _: Acknowledged = self
            .post_json(
                "/position/modify",
                &ModifyBody {
                    ticket,
                    sl: stop_loss,
                    tp: take_profit,
                },
            )
            .await?;
        Ok(())
    }

    async fn close(&self, ticket: u64) -> Result<ClosedFill> {
        self.post_json("/position/close", &TicketBody { ticket }).await
    }

    async fn open_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>> {
        let query = match symbol {
            Some(symbol) => vec![("symbol", symbol.to_string())],
            None => Vec::new(),
        };
        let rows: Vec<PositionRow> = self.get_json("/positions", &query).await?;
        rows.into_iter().map(PositionRow::into_position).collect()
    }

    async fn history_deal(&self, ticket: u64) -> Result<Option<Deal>> {
        let row: Option<DealRow> = self
            .get_json("/history_deal", &[("ticket", ticket.to_string())])
            .await?;
        row.map(DealRow::into_deal).transpose()
    }

    async fn ping(&self) -> Result<()> {
        let _: Acknowledged = self.get_json("/ping", &[]).await?;
        Ok(())
    }
}

// ─── Wire types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct BridgeRejection {
    retcode: i64,
    message: String,
}

#[derive(Deserialize)]
struct Acknowledged {
    #[allow(dead_code)]
    ok: bool,
}

#[derive(Serialize)]
struct OrderBody {
    symbol: String,
    side: OrderSide,
    volume: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sl: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tp: Option<f64>,
    comment: String,
}

#[derive(Serialize)]
struct ModifyBody {
    ticket: u64,
    sl: f64,
    tp: f64,
}

#[derive(Serialize)]
struct TicketBody {
    ticket: u64,
}

/// One OHLC row. `time` is epoch seconds carrying the terminal's local
/// clock, the way the terminal reports bar opens.
#[derive(Deserialize)]
struct RateRow {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    tick_volume: u64,
}

impl RateRow {
    fn into_bar(self, symbol: &str, timeframe: Timeframe) -> Bar {
        let open_time = DateTime::from_timestamp(self.time, 0)
            .unwrap_or(DateTime::UNIX_EPOCH)
            .naive_utc();
        Bar {
            symbol: symbol.to_string(),
            timeframe,
            open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.tick_volume,
        }
    }
}

#[derive(Deserialize)]
struct PositionRow {
    ticket: u64,
    symbol: String,
    #[serde(rename = "type")]
    side: OrderSide,
    volume: f64,
    price_open: f64,
    price_current: f64,
    sl: f64,
    tp: f64,
    profit: f64,
    time: i64,
}

impl PositionRow {
    fn into_position(self) -> Result<Position> {
        let opened_at = DateTime::from_timestamp(self.time, 0)
            .ok_or_else(|| Error::Gateway(format!("position {} has a bad timestamp", self.ticket)))?;
        Ok(Position {
            ticket: self.ticket,
            symbol: self.symbol,
            side: self.side,
            volume: self.volume,
            entry: self.price_open,
            current_price: self.price_current,
            stop_loss: self.sl,
            take_profit: self.tp,
            profit: self.profit,
            opened_at,
        })
    }
}

#[derive(Deserialize)]
struct DealRow {
    ticket: u64,
    price: f64,
    time: i64,
    profit: f64,
}

impl DealRow {
    fn into_deal(self) -> Result<Deal> {
        let close_time = DateTime::from_timestamp(self.time, 0)
            .ok_or_else(|| Error::Gateway(format!("deal {} has a bad timestamp", self.ticket)))?;
        Ok(Deal {
            ticket: self.ticket,
            close_price: self.price,
            close_time,
            profit: self.profit,
        })
    }
}
